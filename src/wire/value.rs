//! Zero-copy read access to encoded values.
//!
//! A [`Val`] is a borrowed view of one encoded value. Nothing is decoded up
//! front: coercions such as [`as_int`](Val::as_int) read the payload on
//! demand and fail with [`OpoError::Type`] when the tag does not match.
//!
//! Trees can be walked two ways. [`first_member`](Val::first_member) and
//! [`next_sibling`](Val::next_sibling) (or the [`members`](Val::members) and
//! [`entries`](Val::entries) iterators) step through one container at a time.
//! [`iterate`](Val::iterate) drives a [`Visitor`] depth first over a whole
//! value using an explicit stack, so hostile nesting cannot exhaust the call
//! stack.
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    dict::Dictionary,
    error::{OpoError, Result},
};

use super::{MAX_DEPTH, header, is_array, is_key, is_object, read_uint, tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    Null,
    Bool,
    Int,
    Decimal,
    String,
    Key,
    Uuid,
    Time,
    Object,
    Array,
}

impl ValKind {
    pub fn name(self) -> &'static str {
        match self {
            ValKind::Null => "null",
            ValKind::Bool => "bool",
            ValKind::Int => "int",
            ValKind::Decimal => "decimal",
            ValKind::String => "string",
            ValKind::Key => "key",
            ValKind::Uuid => "uuid",
            ValKind::Time => "time",
            ValKind::Object => "object",
            ValKind::Array => "array",
        }
    }

    fn of(t: u8) -> Option<Self> {
        Some(match t {
            tag::NULL => ValKind::Null,
            tag::TRUE | tag::FALSE => ValKind::Bool,
            tag::INT1 | tag::INT2 | tag::INT4 | tag::INT8 => ValKind::Int,
            tag::DEC => ValKind::Decimal,
            tag::STR1 | tag::STR2 | tag::STR4 | tag::DICT_STR => ValKind::String,
            t if is_key(t) => ValKind::Key,
            tag::UUID => ValKind::Uuid,
            tag::TIME => ValKind::Time,
            t if is_object(t) => ValKind::Object,
            t if is_array(t) => ValKind::Array,
            _ => return None,
        })
    }
}

impl fmt::Display for ValKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callbacks for [`Val::iterate`]. Returning `false` from any of them stops
/// the walk; no further callbacks are made.
pub trait Visitor {
    fn begin_object(&mut self) -> bool {
        true
    }

    fn end_object(&mut self) -> bool {
        true
    }

    fn begin_array(&mut self) -> bool {
        true
    }

    fn end_array(&mut self) -> bool {
        true
    }

    /// Called with the key of the object member that follows.
    fn key(&mut self, _key: &str) -> bool {
        true
    }

    fn null(&mut self) -> bool {
        true
    }

    fn boolean(&mut self, _value: bool) -> bool {
        true
    }

    fn fixnum(&mut self, _value: i64) -> bool {
        true
    }

    /// Receives both the parsed value and its exact text.
    fn decimal(&mut self, _value: f64, _text: &str) -> bool {
        true
    }

    fn string(&mut self, _value: &str) -> bool {
        true
    }

    fn uuid(&mut self, _value: Uuid) -> bool {
        true
    }

    /// Nanoseconds since the Unix epoch.
    fn time(&mut self, _nanos: i64) -> bool {
        true
    }
}

/// How an [`iterate`](Val::iterate) call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Completed,
    /// A visitor callback returned `false`.
    Halted,
}

#[derive(Clone, Copy)]
pub struct Val<'a> {
    /// Starts at the value's tag; may run past its end.
    bytes: &'a [u8],
    /// Position of `bytes` in the enclosing buffer, for error reporting.
    base: usize,
    dict: Option<&'a Dictionary>,
}

impl fmt::Debug for Val<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Val");
        match self.kind() {
            Ok(kind) => d.field("kind", &kind),
            Err(_) => d.field("kind", &"corrupt"),
        };
        d.field("offset", &self.base).finish()
    }
}

impl<'a> Val<'a> {
    /// Views `bytes` as an encoded value starting at its first byte.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            base: 0,
            dict: None,
        }
    }

    pub fn with_dictionary(bytes: &'a [u8], dict: Option<&'a Dictionary>) -> Self {
        Self {
            bytes,
            base: 0,
            dict,
        }
    }

    pub(crate) fn at(bytes: &'a [u8], base: usize, dict: Option<&'a Dictionary>) -> Self {
        Self { bytes, base, dict }
    }

    pub fn dictionary(&self) -> Option<&'a Dictionary> {
        self.dict
    }

    /// Offset of this value in the buffer it was read from.
    pub fn offset(&self) -> usize {
        self.base
    }

    fn tag(&self) -> Result<u8> {
        self.bytes
            .first()
            .copied()
            .ok_or_else(|| OpoError::parse(self.base, "value is empty"))
    }

    /// Tag, header length and payload, checked against the available bytes.
    fn parts(&self) -> Result<(u8, usize, &'a [u8])> {
        let t = self.tag()?;
        let Some((head, body)) = header(self.bytes, self.base)? else {
            return Err(OpoError::parse(self.base, "value header is truncated"));
        };
        let end = head
            .checked_add(body)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                OpoError::parse(
                    self.base,
                    format!(
                        "value of {} bytes overruns the {} available",
                        head.saturating_add(body),
                        self.bytes.len()
                    ),
                )
            })?;
        Ok((t, head, &self.bytes[head..end]))
    }

    pub fn kind(&self) -> Result<ValKind> {
        let t = self.tag()?;
        ValKind::of(t).ok_or_else(|| {
            OpoError::parse(
                self.base,
                format!("corrupt message format, unknown tag 0x{t:02x}"),
            )
        })
    }

    /// Number of bytes the value occupies, tag included.
    pub fn byte_size(&self) -> Result<usize> {
        let (_, head, body) = self.parts()?;
        Ok(head + body.len())
    }

    /// The value's exact encoding.
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        let size = self.byte_size()?;
        Ok(&self.bytes[..size])
    }

    /// Member count for containers (pairs for objects), text length for
    /// strings, keys and decimals, and payload size for the rest.
    pub fn logical_size(&self) -> Result<usize> {
        let (t, _, body) = self.parts()?;
        match t {
            t if is_object(t) || is_array(t) => {
                let mut count = 0;
                for member in self.members()? {
                    member?;
                    count += 1;
                }
                Ok(if is_object(t) { count / 2 } else { count })
            }
            tag::DICT_STR | tag::DICT_KEY => Ok(self.text()?.len()),
            _ => match ValKind::of(t) {
                Some(ValKind::String | ValKind::Key) => Ok(body.len() - 1),
                _ => Ok(body.len()),
            },
        }
    }

    /// Members of an object (pairs) or array.
    pub fn member_count(&self) -> Result<usize> {
        self.container()?;
        self.logical_size()
    }

    fn type_error(&self, expected: &'static str) -> OpoError {
        OpoError::Type {
            expected,
            found: self.kind().map(ValKind::name).unwrap_or("corrupt value"),
        }
    }

    pub fn is_null(&self) -> bool {
        self.tag().is_ok_and(|t| t == tag::NULL)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.tag()? {
            tag::TRUE => Ok(true),
            tag::FALSE => Ok(false),
            _ => Err(self.type_error("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        let (t, _, body) = self.parts()?;
        match t {
            tag::INT1 => Ok(body[0] as i8 as i64),
            tag::INT2 => Ok(read_uint(body, 2) as u16 as i16 as i64),
            tag::INT4 => Ok(read_uint(body, 4) as u32 as i32 as i64),
            tag::INT8 => Ok(read_uint(body, 8) as i64),
            _ => Err(self.type_error("int")),
        }
    }

    /// Decimal text exactly as encoded.
    pub fn as_decimal_str(&self) -> Result<&'a str> {
        let (t, _, body) = self.parts()?;
        if t != tag::DEC {
            return Err(self.type_error("decimal"));
        }
        std::str::from_utf8(body)
            .map_err(|_| OpoError::parse(self.base, "decimal text is not ascii"))
    }

    pub fn as_double(&self) -> Result<f64> {
        let text = self.as_decimal_str()?;
        text.parse::<f64>()
            .map_err(|_| OpoError::parse(self.base, format!("'{text}' is not a decimal")))
    }

    pub fn as_str(&self) -> Result<&'a str> {
        match self.kind()? {
            ValKind::String => self.text(),
            _ => Err(self.type_error("string")),
        }
    }

    pub fn as_key(&self) -> Result<&'a str> {
        match self.kind()? {
            ValKind::Key => self.text(),
            _ => Err(self.type_error("key")),
        }
    }

    /// Text of a string or key, resolving dictionary references.
    fn text(&self) -> Result<&'a str> {
        let (t, _, body) = self.parts()?;
        if t == tag::DICT_STR || t == tag::DICT_KEY {
            let index = body[0];
            return self
                .dict
                .and_then(|d| d.word_at(index))
                .ok_or_else(|| {
                    OpoError::parse(self.base, format!("dictionary index {index} is not defined"))
                });
        }
        let (text, nul) = body.split_at(body.len() - 1);
        if nul != [0] {
            return Err(OpoError::parse(self.base, "string is not terminated"));
        }
        std::str::from_utf8(text)
            .map_err(|_| OpoError::parse(self.base, "string is not valid utf-8"))
    }

    pub fn as_uuid(&self) -> Result<Uuid> {
        let (t, _, body) = self.parts()?;
        if t != tag::UUID {
            return Err(self.type_error("uuid"));
        }
        let bytes: [u8; 16] = body
            .try_into()
            .map_err(|_| OpoError::parse(self.base, "uuid payload is not 16 bytes"))?;
        Ok(Uuid::from_bytes(bytes))
    }

    /// Canonical lowercase hyphenated form.
    pub fn as_uuid_str(&self) -> Result<String> {
        Ok(self.as_uuid()?.hyphenated().to_string())
    }

    /// Nanoseconds since the Unix epoch.
    pub fn as_time(&self) -> Result<i64> {
        let (t, _, body) = self.parts()?;
        if t != tag::TIME {
            return Err(self.type_error("time"));
        }
        Ok(read_uint(body, 8) as i64)
    }

    /// `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ` in UTC.
    pub fn as_time_str(&self) -> Result<String> {
        Ok(time_string(self.as_time()?))
    }

    /// Container payload and where it starts in the enclosing buffer.
    fn container(&self) -> Result<(&'a [u8], usize)> {
        let (t, head, body) = self.parts()?;
        if !is_object(t) && !is_array(t) {
            return Err(self.type_error("object or array"));
        }
        Ok((body, self.base + head))
    }

    /// First member of an object or array. Object members alternate between
    /// keys and values.
    pub fn first_member(&self) -> Result<Option<Val<'a>>> {
        let (body, start) = self.container()?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(Val::at(body, start, self.dict)))
    }

    /// Member following `member` in this container.
    pub fn next_sibling(&self, member: &Val<'a>) -> Result<Option<Val<'a>>> {
        let (body, start) = self.container()?;
        let Some(at) = member
            .base
            .checked_sub(start)
            .filter(|at| *at < body.len())
        else {
            return Err(OpoError::Argument(format!(
                "value at offset {} is not a member of the container at offset {}",
                member.base, self.base
            )));
        };
        let next = at + Val::at(&body[at..], member.base, self.dict).byte_size()?;
        if next >= body.len() {
            return Ok(None);
        }
        Ok(Some(Val::at(&body[next..], start + next, self.dict)))
    }

    /// Iterates the members of an object or array. Object members alternate
    /// between keys and values; see [`entries`](Val::entries) for pairs.
    pub fn members(&self) -> Result<Members<'a>> {
        let (body, start) = self.container()?;
        Ok(Members {
            body,
            start,
            pos: 0,
            dict: self.dict,
            failed: false,
        })
    }

    /// Iterates the key and value pairs of an object.
    pub fn entries(&self) -> Result<Entries<'a>> {
        if !is_object(self.tag()?) {
            return Err(self.type_error("object"));
        }
        Ok(Entries {
            members: self.members()?,
        })
    }

    /// Looks up a value by a dotted path such as `results.0.name`. Path
    /// segments select object members by key or array members by index.
    pub fn get(&self, path: &str) -> Option<Val<'a>> {
        let mut current = *self;
        for segment in path.split('.') {
            current = match current.kind().ok()? {
                ValKind::Object => current.entries().ok()?.find_map(|entry| {
                    let (key, value) = entry.ok()?;
                    (key.as_key().ok()? == segment).then_some(value)
                })?,
                ValKind::Array => {
                    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                        return None;
                    }
                    let index: usize = segment.parse().ok()?;
                    current.members().ok()?.nth(index)?.ok()?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Walks the value depth first, calling `visitor` for every node.
    ///
    /// # Errors
    ///
    /// [`OpoError::Parse`] on malformed input, including nesting deeper than
    /// [`MAX_DEPTH`].
    pub fn iterate<V: Visitor + ?Sized>(&self, visitor: &mut V) -> Result<Walk> {
        let total = self.byte_size()?;
        let bytes = &self.bytes[..total];

        // End offsets of open containers and whether each is an object.
        let mut open: Vec<(usize, bool)> = Vec::new();
        let mut pos = 0;

        loop {
            while let Some(&(end, object)) = open.last() {
                if pos < end {
                    break;
                }
                if pos > end {
                    return Err(OpoError::parse(
                        self.base + pos,
                        "member overruns its container",
                    ));
                }
                open.pop();
                let go = if object {
                    visitor.end_object()
                } else {
                    visitor.end_array()
                };
                if !go {
                    return Ok(Walk::Halted);
                }
            }
            if pos >= total {
                return Ok(Walk::Completed);
            }

            let limit = open.last().map_or(total, |(end, _)| *end);
            let node = Val::at(&bytes[pos..limit], self.base + pos, self.dict);
            let (t, head, body) = node.parts()?;

            let kind = node.kind()?;
            let end = pos + head + body.len();
            let container = matches!(kind, ValKind::Object | ValKind::Array);
            pos = if container { pos + head } else { end };

            let go = match kind {
                ValKind::Object | ValKind::Array => {
                    if open.len() >= MAX_DEPTH {
                        return Err(OpoError::parse(
                            node.base,
                            format!("too deeply nested, limit is {MAX_DEPTH}"),
                        ));
                    }
                    let object = is_object(t);
                    open.push((end, object));
                    if object {
                        visitor.begin_object()
                    } else {
                        visitor.begin_array()
                    }
                }
                ValKind::Null => visitor.null(),
                ValKind::Bool => visitor.boolean(node.as_bool()?),
                ValKind::Int => visitor.fixnum(node.as_int()?),
                ValKind::Decimal => {
                    let text = node.as_decimal_str()?;
                    visitor.decimal(node.as_double()?, text)
                }
                ValKind::String => visitor.string(node.text()?),
                ValKind::Key => visitor.key(node.text()?),
                ValKind::Uuid => visitor.uuid(node.as_uuid()?),
                ValKind::Time => visitor.time(node.as_time()?),
            };
            if !go {
                return Ok(Walk::Halted);
            }
        }
    }
}

/// Formats nanoseconds since the epoch as `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`.
pub fn time_string(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos)
        .format("%Y-%m-%dT%H:%M:%S%.9fZ")
        .to_string()
}

/// Parses a `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ` string back into nanoseconds.
pub fn parse_time_string(s: &str) -> Option<i64> {
    if s.len() != super::TIME_STR_LEN || !s.ends_with('Z') {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()?
        .with_timezone(&Utc)
        .timestamp_nanos_opt()
}

/// Iterator over the members of a container.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    body: &'a [u8],
    start: usize,
    pos: usize,
    dict: Option<&'a Dictionary>,
    failed: bool,
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<Val<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.body.len() {
            return None;
        }
        let member = Val::at(&self.body[self.pos..], self.start + self.pos, self.dict);
        match member.byte_size() {
            Ok(size) => {
                self.pos += size;
                Some(Ok(member))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over the key and value pairs of an object.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    members: Members<'a>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(Val<'a>, Val<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = match self.members.next()? {
            Ok(key) => key,
            Err(e) => return Some(Err(e)),
        };
        match self.members.next() {
            Some(Ok(value)) => Some(Ok((key, value))),
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.members.failed = true;
                Some(Err(OpoError::parse(key.base, "object key has no value")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        Builder,
        sample::{SAMPLE_TIME, SAMPLE_UUID, build_sample},
    };

    fn sample() -> Vec<u8> {
        let mut b = Builder::new();
        build_sample(&mut b);
        b.as_bytes()[8..].to_vec()
    }

    /// Renders visited nodes the way the reference tests expect.
    #[derive(Default)]
    struct Render {
        out: String,
        stop_at: Option<i64>,
    }

    impl Visitor for Render {
        fn begin_object(&mut self) -> bool {
            self.out.push_str("{ ");
            true
        }

        fn end_object(&mut self) -> bool {
            self.out.push_str("} ");
            true
        }

        fn begin_array(&mut self) -> bool {
            self.out.push_str("[ ");
            true
        }

        fn end_array(&mut self) -> bool {
            self.out.push_str("] ");
            true
        }

        fn key(&mut self, key: &str) -> bool {
            self.out.push_str(key);
            self.out.push(':');
            true
        }

        fn null(&mut self) -> bool {
            self.out.push_str("null ");
            true
        }

        fn boolean(&mut self, value: bool) -> bool {
            self.out.push_str(&format!("{value} "));
            true
        }

        fn fixnum(&mut self, value: i64) -> bool {
            self.out.push_str(&format!("{value} "));
            self.stop_at != Some(value)
        }

        fn decimal(&mut self, _value: f64, text: &str) -> bool {
            self.out.push_str(text);
            self.out.push(' ');
            true
        }

        fn string(&mut self, value: &str) -> bool {
            self.out.push_str(value);
            self.out.push(' ');
            true
        }

        fn uuid(&mut self, value: Uuid) -> bool {
            self.out.push_str(&format!("{value} "));
            true
        }

        fn time(&mut self, nanos: i64) -> bool {
            self.out.push_str(&time_string(nanos));
            self.out.push(' ');
            true
        }
    }

    #[test]
    fn iterate_sample() {
        let bytes = sample();
        let mut render = Render::default();
        let walk = Val::new(&bytes).iterate(&mut render).unwrap();

        assert_eq!(walk, Walk::Completed);
        assert_eq!(
            render.out,
            "{ nil:null yes:true no:false int:12345 array:[ -23 1.23 string \
             123e4567-e89b-12d3-a456-426655440000 2017-03-14T15:09:26.123456789Z ] } "
        );
    }

    #[test]
    fn iterate_halts() {
        let bytes = sample();
        let mut render = Render {
            stop_at: Some(12345),
            ..Default::default()
        };
        let walk = Val::new(&bytes).iterate(&mut render).unwrap();

        assert_eq!(walk, Walk::Halted);
        assert_eq!(render.out, "{ nil:null yes:true no:false int:12345 ");
    }

    #[test]
    fn coercions() {
        let bytes = sample();
        let top = Val::new(&bytes);

        assert_eq!(top.kind().unwrap(), ValKind::Object);
        assert_eq!(top.logical_size().unwrap(), 5);
        assert!(top.get("nil").unwrap().is_null());
        assert!(top.get("yes").unwrap().as_bool().unwrap());
        assert!(!top.get("no").unwrap().as_bool().unwrap());
        assert_eq!(top.get("int").unwrap().as_int().unwrap(), 12345);
        assert_eq!(top.get("array.0").unwrap().as_int().unwrap(), -23);
        assert_eq!(top.get("array.1").unwrap().as_double().unwrap(), 1.23);
        assert_eq!(top.get("array.1").unwrap().as_decimal_str().unwrap(), "1.23");
        assert_eq!(top.get("array.2").unwrap().as_str().unwrap(), "string");
        assert_eq!(top.get("array.2").unwrap().logical_size().unwrap(), 6);

        let uuid = top.get("array.3").unwrap().as_uuid().unwrap();
        assert_eq!(uuid.as_u128() >> 64, 0x123e4567e89b12d3);
        assert_eq!(uuid.as_u128() as u64, 0xa456426655440000);
        assert_eq!(top.get("array.3").unwrap().as_uuid_str().unwrap(), SAMPLE_UUID);

        let time = top.get("array.4").unwrap();
        assert_eq!(time.as_time().unwrap(), SAMPLE_TIME);
        assert_eq!(time.as_time_str().unwrap(), "2017-03-14T15:09:26.123456789Z");
    }

    #[test]
    fn type_mismatch() {
        let bytes = sample();
        let top = Val::new(&bytes);

        let err = top.get("int").unwrap().as_str().unwrap_err();
        assert_eq!(
            err.to_string(),
            "type error: expected string, found int"
        );
        assert_eq!(top.as_int().unwrap_err().kind(), crate::ErrorKind::Type);
        assert_eq!(
            top.get("yes").unwrap().first_member().unwrap_err().kind(),
            crate::ErrorKind::Type
        );
    }

    #[test]
    fn path_misses() {
        let bytes = sample();
        let top = Val::new(&bytes);

        assert!(top.get("missing").is_none());
        assert!(top.get("array.5").is_none());
        assert!(top.get("array.+1").is_none());
        assert!(top.get("array.x").is_none());
        assert!(top.get("int.0").is_none());
    }

    #[test]
    fn navigate_members() {
        let bytes = sample();
        let array = Val::new(&bytes).get("array").unwrap();

        let mut sizes = Vec::new();
        let mut member = array.first_member().unwrap();
        while let Some(m) = member {
            sizes.push(m.byte_size().unwrap());
            member = array.next_sibling(&m).unwrap();
        }
        assert_eq!(sizes, vec![2, 6, 9, 17, 9]);

        let from_iter: Vec<usize> = array
            .members()
            .unwrap()
            .map(|m| m.unwrap().byte_size().unwrap())
            .collect();
        assert_eq!(sizes, from_iter);
    }

    #[test]
    fn entries_pair_keys_and_values() {
        let bytes = sample();
        let keys: Vec<&str> = Val::new(&bytes)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().0.as_key().unwrap())
            .collect();
        assert_eq!(keys, vec!["nil", "yes", "no", "int", "array"]);
    }

    #[test]
    fn narrow_containers_decode() {
        // Array with a 1-byte length holding 1 and "x".
        let bytes = [tag::ARRAY1, 6, tag::INT1, 1, tag::STR1, 1, b'x', 0];
        let top = Val::new(&bytes);
        assert_eq!(top.byte_size().unwrap(), 8);
        assert_eq!(top.logical_size().unwrap(), 2);
        assert_eq!(top.get("1").unwrap().as_str().unwrap(), "x");

        // Object with a 2-byte length holding "k": true.
        let bytes = [tag::OBJ2, 0, 5, tag::KEY1, 1, b'k', 0, tag::TRUE];
        assert!(Val::new(&bytes).get("k").unwrap().as_bool().unwrap());
    }

    #[test]
    fn member_overrunning_container_is_rejected() {
        // Container claims 3 bytes but its only member needs 5.
        let bytes = [tag::ARRAY4, 0, 0, 0, 3, tag::INT4, 0, 0, 0, 1];
        let err = Val::new(&bytes[..])
            .iterate(&mut Render::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
    }

    #[test]
    #[should_panic(expected = "unknown tag 0x01")]
    fn unknown_tag_is_rejected() {
        let bytes = [tag::ARRAY4, 0, 0, 0, 1, 0x01];
        Val::new(&bytes[..]).iterate(&mut Render::default()).unwrap();
    }

    #[test]
    #[should_panic(expected = "too deeply nested")]
    fn depth_limit() {
        let depth = MAX_DEPTH + 1;
        let mut bytes = Vec::new();
        for level in 0..depth {
            let remaining = ((depth - level - 1) * 5) as u32;
            bytes.push(tag::ARRAY4);
            bytes.extend_from_slice(&remaining.to_be_bytes());
        }
        Val::new(&bytes).iterate(&mut Render::default()).unwrap();
    }

    #[derive(Default)]
    struct Tally {
        open: usize,
        deepest: usize,
        closed: usize,
        scalars: usize,
    }

    impl Visitor for Tally {
        fn begin_object(&mut self) -> bool {
            self.open += 1;
            self.deepest = self.deepest.max(self.open);
            true
        }

        fn end_object(&mut self) -> bool {
            self.open -= 1;
            self.closed += 1;
            true
        }

        fn begin_array(&mut self) -> bool {
            self.begin_object()
        }

        fn end_array(&mut self) -> bool {
            self.end_object()
        }

        fn fixnum(&mut self, _value: i64) -> bool {
            self.scalars += 1;
            true
        }

        fn string(&mut self, _value: &str) -> bool {
            self.scalars += 1;
            true
        }
    }

    #[test]
    fn declared_size_matches_walk_at_every_depth() {
        for depth in 1..=MAX_DEPTH {
            let mut b = Builder::new();
            // Arrays on even levels, objects on odd ones, one scalar each.
            for level in 0..depth {
                if level % 2 == 0 {
                    b.push_array((level > 0).then_some("a")).unwrap();
                    b.push_int(None, level as i64).unwrap();
                } else {
                    b.push_object(None).unwrap();
                    b.push_string(Some("s"), "x").unwrap();
                }
            }
            b.finish().unwrap();
            let mut bytes = b.as_bytes()[8..].to_vec();
            let size = bytes.len();
            // Trailing bytes belong to the next frame and are never read.
            bytes.extend_from_slice(&[tag::NULL; 3]);

            let val = Val::new(&bytes);
            assert_eq!(val.byte_size().unwrap(), size, "depth {depth}");

            let mut tally = Tally::default();
            assert_eq!(val.iterate(&mut tally).unwrap(), Walk::Completed);
            assert_eq!(tally.deepest, depth, "depth {depth}");
            assert_eq!(tally.closed, depth);
            assert_eq!(tally.open, 0);
            assert_eq!(tally.scalars, depth);
        }
    }

    #[test]
    fn dictionary_forms_resolve() {
        let dict = Dictionary::new(["name", "Ann"]).unwrap();
        let bytes = [
            tag::OBJ4, 0, 0, 0, 4, tag::DICT_KEY, 0, tag::DICT_STR, 1,
        ];
        let top = Val::with_dictionary(&bytes, Some(&dict));
        assert_eq!(top.get("name").unwrap().as_str().unwrap(), "Ann");

        let err = Val::new(&bytes).get("name");
        assert!(err.is_none());
        let err = Val::new(&bytes[5..]).as_key().unwrap_err();
        assert!(err.to_string().contains("dictionary index 0"));
    }

    #[test]
    fn time_strings() {
        assert_eq!(time_string(0), "1970-01-01T00:00:00.000000000Z");
        assert_eq!(
            parse_time_string("2017-03-14T15:09:26.123456789Z"),
            Some(SAMPLE_TIME)
        );
        assert_eq!(parse_time_string("2017-03-14T15:09:26Z"), None);
    }
}
