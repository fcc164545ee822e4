//! Message construction.
//!
//! A [`Builder`] writes one framed value into a growable buffer. Containers
//! are opened with [`push_object`](Builder::push_object) or
//! [`push_array`](Builder::push_array); their 4-byte length field is written
//! as zero and backpatched when the container is closed, either explicitly
//! with [`pop`](Builder::pop) or implicitly by [`finish`](Builder::finish).
//!
//! Every push takes an optional key. Directly inside an object the key is
//! required; inside an array or at the top level it must be absent.
//!
//! # Example
//! ```rust
//! use opo::wire::Builder;
//!
//! let mut b = Builder::new();
//! b.push_object(None).unwrap();
//! b.push_int(Some("rid"), 7).unwrap();
//! b.push_array(Some("where")).unwrap();
//! b.push_string(None, "EQ").unwrap();
//! b.push_string(None, "kind").unwrap();
//! b.push_string(None, "Trade").unwrap();
//! let msg = b.take().unwrap();
//!
//! let top = msg.value();
//! assert_eq!(top.get("rid").unwrap().as_int().unwrap(), 7);
//! assert_eq!(top.get("where.2").unwrap().as_str().unwrap(), "Trade");
//! ```
use std::sync::Arc;

use log::trace;
use uuid::Uuid;

use crate::{
    dict::Dictionary,
    error::{OpoError, Result},
};

use super::{ID_SIZE, MAX_DEPTH, Message, UUID_STR_LEN, Val, Visitor, tag};

/// Smallest buffer an owned builder starts with.
const MIN_BUF: usize = 1024;

/// Fixed amount the buffer grows by, on top of what the pending write needs.
const GROW_INC: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Open {
    object: bool,
    /// Offset of the 4-byte length field.
    len_at: usize,
}

#[derive(Debug)]
pub struct Builder {
    buf: Vec<u8>,
    stack: Vec<Open>,
    dict: Option<Arc<Dictionary>>,
    has_top: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with its own buffer.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(MIN_BUF);
        buf.resize(ID_SIZE, 0);
        Self {
            buf,
            stack: Vec::new(),
            dict: None,
            has_top: false,
        }
    }

    /// Creates a builder that writes into a caller supplied buffer. Existing
    /// contents are discarded; the allocation is reused.
    pub fn with_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        buf.resize(ID_SIZE, 0);
        Self {
            buf,
            stack: Vec::new(),
            dict: None,
            has_top: false,
        }
    }

    pub fn with_dictionary(mut self, dict: Arc<Dictionary>) -> Self {
        self.dict = Some(dict);
        self
    }

    pub fn set_dictionary(&mut self, dict: Option<Arc<Dictionary>>) {
        self.dict = dict;
    }

    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dict.as_ref()
    }

    /// Bytes written so far, including the id header.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_top
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Closes every open container, writes the frame length into the id
    /// region and returns it. The client overwrites that region with the
    /// correlation id when the message is sent.
    pub fn finish(&mut self) -> Result<usize> {
        while !self.stack.is_empty() {
            self.pop()?;
        }
        let len = self.buf.len();
        self.buf[..ID_SIZE].copy_from_slice(&(len as u64).to_be_bytes());
        Ok(len)
    }

    /// Finishes the message and hands the buffer over, leaving the builder
    /// empty and ready for the next message.
    pub fn take(&mut self) -> Result<Message> {
        if !self.has_top {
            return Err(OpoError::Argument("message has no value".to_string()));
        }
        self.finish()?;

        let mut fresh = Vec::with_capacity(MIN_BUF);
        fresh.resize(ID_SIZE, 0);
        let buf = std::mem::replace(&mut self.buf, fresh);
        self.has_top = false;

        Ok(Message::from_built(buf))
    }

    pub fn push_null(&mut self, key: Option<&str>) -> Result<()> {
        self.begin(key, 1)?;
        self.buf.push(tag::NULL);
        Ok(())
    }

    pub fn push_bool(&mut self, key: Option<&str>, value: bool) -> Result<()> {
        self.begin(key, 1)?;
        self.buf.push(if value { tag::TRUE } else { tag::FALSE });
        Ok(())
    }

    pub fn push_int(&mut self, key: Option<&str>, value: i64) -> Result<()> {
        if let Ok(v) = i8::try_from(value) {
            self.begin(key, 2)?;
            self.buf.push(tag::INT1);
            self.buf.push(v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.begin(key, 3)?;
            self.buf.push(tag::INT2);
            self.buf.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.begin(key, 5)?;
            self.buf.push(tag::INT4);
            self.buf.extend_from_slice(&v.to_be_bytes());
        } else {
            self.begin(key, 9)?;
            self.buf.push(tag::INT8);
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
        Ok(())
    }

    pub fn push_double(&mut self, key: Option<&str>, value: f64) -> Result<()> {
        let text = format_decimal(value);
        self.begin(key, 2 + text.len())?;
        self.buf.push(tag::DEC);
        self.buf.push(text.len() as u8);
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }

    /// Pushes decimal text verbatim. The text must be at most 255 bytes.
    pub fn push_decimal_str(&mut self, key: Option<&str>, text: &str) -> Result<()> {
        if text.len() > u8::MAX as usize {
            return Err(OpoError::Overflow(format!(
                "decimal text is limited to 255 bytes, got {}",
                text.len()
            )));
        }
        self.begin(key, 2 + text.len())?;
        self.buf.push(tag::DEC);
        self.buf.push(text.len() as u8);
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }

    pub fn push_string(&mut self, key: Option<&str>, value: &str) -> Result<()> {
        let dict_index = self.dict.as_ref().and_then(|d| d.index_of(value));
        let size = text_size(value, dict_index)?;
        self.begin(key, size)?;
        self.write_text(value, dict_index, false);
        Ok(())
    }

    pub fn push_uuid(&mut self, key: Option<&str>, value: Uuid) -> Result<()> {
        self.begin(key, 17)?;
        self.buf.push(tag::UUID);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Pushes a uuid given in canonical `8-4-4-4-12` hyphenated hex form.
    pub fn push_uuid_str(&mut self, key: Option<&str>, value: &str) -> Result<()> {
        if value.len() != UUID_STR_LEN {
            return Err(OpoError::Argument(format!(
                "'{value}' is not a {UUID_STR_LEN} character uuid"
            )));
        }
        let uuid = Uuid::parse_str(value)
            .map_err(|e| OpoError::Argument(format!("invalid uuid '{value}': {e}")))?;
        self.push_uuid(key, uuid)
    }

    /// Pushes a time as nanoseconds since the Unix epoch.
    pub fn push_time(&mut self, key: Option<&str>, nanos: i64) -> Result<()> {
        self.begin(key, 9)?;
        self.buf.push(tag::TIME);
        self.buf.extend_from_slice(&nanos.to_be_bytes());
        Ok(())
    }

    pub fn push_object(&mut self, key: Option<&str>) -> Result<()> {
        self.open(key, true)
    }

    pub fn push_array(&mut self, key: Option<&str>) -> Result<()> {
        self.open(key, false)
    }

    /// Closes the innermost open container.
    pub fn pop(&mut self) -> Result<()> {
        let Some(open) = self.stack.pop() else {
            return Err(OpoError::Argument("nothing left to pop".to_string()));
        };
        let body = self.buf.len() - (open.len_at + 4);
        let Ok(len) = u32::try_from(body) else {
            self.stack.push(open);
            return Err(OpoError::Overflow(format!(
                "container of {body} bytes exceeds the 4-byte length limit"
            )));
        };
        self.buf[open.len_at..open.len_at + 4].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }

    /// Embeds an already encoded value.
    ///
    /// The bytes are copied verbatim when the value was decoded without a
    /// dictionary or with this builder's dictionary. Otherwise the value is
    /// re-encoded so dictionary references resolve against this builder's
    /// table.
    pub fn push_value(&mut self, key: Option<&str>, value: Val<'_>) -> Result<()> {
        let same_dict = match (value.dictionary(), self.dict.as_deref()) {
            (None, _) => true,
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            (Some(_), None) => false,
        };

        if same_dict {
            let bytes = value.as_bytes()?;
            self.begin(key, bytes.len())?;
            self.buf.extend_from_slice(bytes);
            return Ok(());
        }

        trace!("re-encoding embedded value against builder dictionary");
        let mark = self.buf.len();
        let depth = self.stack.len();
        let had_top = self.has_top;
        let mut rebuild = Rebuild {
            builder: self,
            key: key.map(str::to_string),
            err: None,
        };
        let walk = value.iterate(&mut rebuild);
        let err = rebuild.err.take();
        match (walk, err) {
            (_, Some(e)) | (Err(e), _) => {
                self.buf.truncate(mark);
                self.stack.truncate(depth);
                self.has_top = had_top;
                Err(e)
            }
            (Ok(_), None) => Ok(()),
        }
    }

    fn open(&mut self, key: Option<&str>, object: bool) -> Result<()> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(OpoError::Overflow(format!(
                "too deeply nested, limit is {MAX_DEPTH}"
            )));
        }
        self.begin(key, 5)?;
        self.buf.push(if object { tag::OBJ4 } else { tag::ARRAY4 });
        let len_at = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        self.stack.push(Open { object, len_at });
        Ok(())
    }

    /// Validates the key for the current position, reserves room for the key
    /// and a value of `size` bytes, and writes the key.
    fn begin(&mut self, key: Option<&str>, size: usize) -> Result<()> {
        let dict_index = match (self.stack.last(), key) {
            (Some(open), Some(k)) if open.object => self.dict.as_ref().and_then(|d| d.index_of(k)),
            (Some(open), None) if open.object => {
                return Err(OpoError::Argument(
                    "a key is required for values inside an object".to_string(),
                ));
            }
            (Some(_), Some(k)) => {
                return Err(OpoError::Argument(format!(
                    "can only push a key to an object, not an array (key '{k}')"
                )));
            }
            (Some(_), None) => None,
            (None, Some(k)) => {
                return Err(OpoError::Argument(format!(
                    "can only push a key to an object (key '{k}')"
                )));
            }
            (None, None) => {
                if self.has_top {
                    return Err(OpoError::Argument(
                        "a message holds exactly one top-level value".to_string(),
                    ));
                }
                None
            }
        };

        let key_size = match key {
            Some(k) => text_size(k, dict_index)?,
            None => 0,
        };
        self.assure(key_size + size)?;

        if let Some(k) = key {
            self.write_text(k, dict_index, true);
        }
        if self.stack.is_empty() {
            self.has_top = true;
        }
        Ok(())
    }

    fn assure(&mut self, size: usize) -> Result<()> {
        if self.buf.capacity() - self.buf.len() < size {
            let additional = GROW_INC + size;
            self.buf
                .try_reserve(additional)
                .map_err(|_| OpoError::Memory {
                    size: self.buf.len() + additional,
                })?;
        }
        Ok(())
    }

    fn write_text(&mut self, text: &str, dict_index: Option<u8>, key: bool) {
        if let Some(index) = dict_index {
            self.buf.push(if key { tag::DICT_KEY } else { tag::DICT_STR });
            self.buf.push(index);
            return;
        }

        let len = text.len();
        if len <= u8::MAX as usize {
            self.buf.push(if key { tag::KEY1 } else { tag::STR1 });
            self.buf.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.push(if key { tag::KEY2 } else { tag::STR2 });
            self.buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            self.buf.push(if key { tag::KEY4 } else { tag::STR4 });
            self.buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.push(0);
    }
}

/// Encoded size of a string or key.
fn text_size(text: &str, dict_index: Option<u8>) -> Result<usize> {
    if dict_index.is_some() {
        return Ok(2);
    }
    let len = text.len();
    let width = if len <= u8::MAX as usize {
        1
    } else if len <= u16::MAX as usize {
        2
    } else if len <= u32::MAX as usize {
        4
    } else {
        return Err(OpoError::Overflow(format!(
            "string of {len} bytes exceeds the 4-byte length limit"
        )));
    };
    Ok(1 + width + len + 1)
}

/// Text form of a decimal: `%.1f` when the value is integral, `%.15g`
/// otherwise.
pub(crate) fn format_decimal(value: f64) -> String {
    if value == value as i64 as f64 {
        format!("{value:.1}")
    } else {
        format_general(value, 15)
    }
}

/// `%.<precision>g` formatting.
fn format_general(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let p = precision.max(1);
    let digits = p - 1;
    let sci = format!("{value:.digits$e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= p as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let decimals = (p as i32 - 1 - exp) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Replays a walked value into a builder.
struct Rebuild<'b> {
    builder: &'b mut Builder,
    key: Option<String>,
    err: Option<OpoError>,
}

impl Rebuild<'_> {
    fn apply(&mut self, f: impl FnOnce(&mut Builder, Option<&str>) -> Result<()>) -> bool {
        let key = self.key.take();
        match f(self.builder, key.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                self.err = Some(e);
                false
            }
        }
    }
}

impl Visitor for Rebuild<'_> {
    fn begin_object(&mut self) -> bool {
        self.apply(|b, k| b.push_object(k))
    }

    fn end_object(&mut self) -> bool {
        self.apply(|b, _| b.pop())
    }

    fn begin_array(&mut self) -> bool {
        self.apply(|b, k| b.push_array(k))
    }

    fn end_array(&mut self) -> bool {
        self.apply(|b, _| b.pop())
    }

    fn key(&mut self, key: &str) -> bool {
        self.key = Some(key.to_string());
        true
    }

    fn null(&mut self) -> bool {
        self.apply(|b, k| b.push_null(k))
    }

    fn boolean(&mut self, value: bool) -> bool {
        self.apply(|b, k| b.push_bool(k, value))
    }

    fn fixnum(&mut self, value: i64) -> bool {
        self.apply(|b, k| b.push_int(k, value))
    }

    fn decimal(&mut self, _value: f64, text: &str) -> bool {
        self.apply(|b, k| b.push_decimal_str(k, text))
    }

    fn string(&mut self, value: &str) -> bool {
        self.apply(|b, k| b.push_string(k, value))
    }

    fn uuid(&mut self, value: Uuid) -> bool {
        self.apply(|b, k| b.push_uuid(k, value))
    }

    fn time(&mut self, nanos: i64) -> bool {
        self.apply(|b, k| b.push_time(k, nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::sample::{SAMPLE_TIME, build_sample};

    #[test]
    fn sample_layout() {
        let mut b = Builder::new();
        build_sample(&mut b);
        let bytes = b.as_bytes();

        assert_eq!(
            u64::from_be_bytes(bytes[..8].try_into().unwrap()),
            bytes.len() as u64
        );
        assert_eq!(bytes[8], tag::OBJ4);
        let body = u32::from_be_bytes(bytes[9..13].try_into().unwrap()) as usize;
        assert_eq!(13 + body, bytes.len());
        // nil: key "nil" then null
        assert_eq!(&bytes[13..19], &[tag::KEY1, 3, b'n', b'i', b'l', 0]);
        assert_eq!(bytes[19], tag::NULL);
        // int: 12345 fits two bytes
        let int_at = bytes
            .windows(3)
            .position(|w| w == [tag::INT2, 0x30, 0x39])
            .unwrap();
        assert!(int_at > 19);
        // array contents: -23, "1.23", "string", uuid, time
        let dec_at = bytes.windows(6).position(|w| w == b"d\x041.23").unwrap();
        assert_eq!(&bytes[dec_at - 2..dec_at], &[tag::INT1, 0xe9]);
        assert_eq!(bytes[bytes.len() - 9], tag::TIME);
        assert_eq!(
            &bytes[bytes.len() - 8..],
            &SAMPLE_TIME.to_be_bytes()
        );
    }

    #[test]
    fn owned_and_supplied_buffers_match() {
        let mut owned = Builder::new();
        build_sample(&mut owned);

        let mut supplied = Builder::with_buffer(vec![0xaa; 16]);
        build_sample(&mut supplied);

        assert_eq!(owned.as_bytes(), supplied.as_bytes());
    }

    #[test]
    fn small_buffer_grows() {
        let mut b = Builder::with_buffer(Vec::with_capacity(4));
        b.push_array(None).unwrap();
        for i in 0..2000 {
            b.push_int(None, i).unwrap();
        }
        let len = b.finish().unwrap();
        assert!(len > 4000);
        let msg = b.take().unwrap();
        assert_eq!(msg.value().logical_size().unwrap(), 2000);
    }

    #[test]
    fn implicit_close_matches_explicit() {
        let build = |explicit: bool| {
            let mut b = Builder::new();
            b.push_object(None).unwrap();
            b.push_array(Some("a")).unwrap();
            b.push_object(None).unwrap();
            b.push_array(Some("b")).unwrap();
            b.push_int(None, 1).unwrap();
            if explicit {
                for _ in 0..4 {
                    b.pop().unwrap();
                }
            }
            b.finish().unwrap();
            b.as_bytes().to_vec()
        };

        assert_eq!(build(true), build(false));
    }

    #[test]
    fn int_widths() {
        let cases: &[(i64, u8, usize)] = &[
            (0, tag::INT1, 2),
            (127, tag::INT1, 2),
            (-128, tag::INT1, 2),
            (128, tag::INT2, 3),
            (-129, tag::INT2, 3),
            (32767, tag::INT2, 3),
            (32768, tag::INT4, 5),
            (2147483647, tag::INT4, 5),
            (-32768, tag::INT2, 3),
            (-32769, tag::INT4, 5),
            (2147483648, tag::INT8, 9),
            (-2147483648, tag::INT4, 5),
            (-2147483649, tag::INT8, 9),
            (i64::MAX, tag::INT8, 9),
            (i64::MIN, tag::INT8, 9),
        ];

        for (value, t, size) in cases {
            let mut b = Builder::new();
            b.push_int(None, *value).unwrap();
            assert_eq!(b.as_bytes()[8], *t, "tag for {value}");
            assert_eq!(b.len() - 8, *size, "size for {value}");

            let msg = b.take().unwrap();
            let val = msg.value();
            assert_eq!(val.as_int().unwrap(), *value);
            assert_eq!(val.byte_size().unwrap(), *size);
            assert_eq!(val.logical_size().unwrap(), size - 1);
        }
    }

    #[test]
    fn string_widths() {
        let mut b = Builder::new();
        b.push_string(None, &"z".repeat(255)).unwrap();
        assert_eq!(b.as_bytes()[8], tag::STR1);
        assert_eq!(*b.as_bytes().last().unwrap(), 0);

        let mut b = Builder::new();
        b.push_string(None, &"z".repeat(256)).unwrap();
        assert_eq!(b.as_bytes()[8], tag::STR2);
        assert_eq!(b.len(), 8 + 1 + 2 + 256 + 1);

        let mut b = Builder::new();
        b.push_string(None, &"z".repeat(70000)).unwrap();
        assert_eq!(b.as_bytes()[8], tag::STR4);
    }

    #[test]
    fn decimal_text() {
        assert_eq!(format_decimal(1.23), "1.23");
        assert_eq!(format_decimal(2.0), "2.0");
        assert_eq!(format_decimal(-7.0), "-7.0");
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(1.0e20), "1e+20");
        assert_eq!(format_decimal(1.5e-7), "1.5e-07");
        assert_eq!(format_decimal(0.0001), "0.0001");
        assert_eq!(format_decimal(123456.789), "123456.789");
        assert_eq!(format_decimal(f64::INFINITY), "inf");
    }

    #[test]
    #[should_panic(expected = "a key is required")]
    fn object_requires_key() {
        let mut b = Builder::new();
        b.push_object(None).unwrap();
        b.push_int(None, 1).unwrap();
    }

    #[test]
    #[should_panic(expected = "not an array")]
    fn array_rejects_key() {
        let mut b = Builder::new();
        b.push_array(None).unwrap();
        b.push_int(Some("x"), 1).unwrap();
    }

    #[test]
    fn rejected_push_writes_nothing() {
        let mut b = Builder::new();
        b.push_array(None).unwrap();
        let before = b.len();
        assert!(b.push_string(Some("x"), "y").is_err());
        assert_eq!(b.len(), before);
    }

    #[test]
    fn single_top_level_value() {
        let mut b = Builder::new();
        b.push_int(None, 1).unwrap();
        let err = b.push_int(None, 2).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Argument);
    }

    #[test]
    fn pop_without_container() {
        let mut b = Builder::new();
        let err = b.pop().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Argument);
    }

    #[test]
    fn depth_limit() {
        let mut b = Builder::new();
        for _ in 0..MAX_DEPTH {
            b.push_array(None).unwrap();
        }
        let before = b.len();
        let err = b.push_array(None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Overflow);
        assert_eq!(b.len(), before);
        assert_eq!(b.depth(), MAX_DEPTH);

        b.finish().unwrap();
        let msg = b.take().unwrap();
        assert_eq!(msg.value().byte_size().unwrap(), before - 8);
    }

    #[test]
    #[should_panic(expected = "not a 36 character uuid")]
    fn uuid_must_be_canonical() {
        let mut b = Builder::new();
        b.push_uuid_str(None, "123e4567e89b12d3a456426655440000").unwrap();
    }

    #[test]
    fn dictionary_substitution() {
        let dict = Arc::new(
            Dictionary::new(["yes", "no", "int", "array", "string", "a string"]).unwrap(),
        );
        let mut b = Builder::new().with_dictionary(dict.clone());
        b.push_object(None).unwrap();
        b.push_bool(Some("yes"), true).unwrap();
        b.push_bool(Some("no"), false).unwrap();
        b.push_int(Some("int"), 1234).unwrap();
        b.push_array(Some("array")).unwrap();
        b.pop().unwrap();
        b.push_string(Some("string"), "a string").unwrap();
        b.finish().unwrap();

        assert_eq!(
            &b.as_bytes()[13..],
            &[
                tag::DICT_KEY, 0, tag::TRUE,
                tag::DICT_KEY, 1, tag::FALSE,
                tag::DICT_KEY, 2, tag::INT2, 0x04, 0xd2,
                tag::DICT_KEY, 3, tag::ARRAY4, 0, 0, 0, 0,
                tag::DICT_KEY, 4, tag::DICT_STR, 5,
            ]
        );
    }

    #[test]
    fn take_resets_builder() {
        let mut b = Builder::new();
        b.push_object(None).unwrap();
        b.push_int(Some("a"), 1).unwrap();
        let first = b.take().unwrap();
        assert!(b.is_empty());
        assert_eq!(b.len(), 8);

        b.push_object(None).unwrap();
        b.push_int(Some("a"), 1).unwrap();
        let second = b.take().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn push_value_copies_and_reencodes() {
        let mut child = Builder::new();
        child.push_array(None).unwrap();
        child.push_string(None, "string").unwrap();
        child.push_int(None, -23).unwrap();
        let child = child.take().unwrap();

        let mut b = Builder::new();
        b.push_object(None).unwrap();
        b.push_value(Some("array"), child.value()).unwrap();
        let msg = b.take().unwrap();
        assert_eq!(msg.value().get("array.0").unwrap().as_str().unwrap(), "string");

        // Decoded with one table, embedded under another.
        let theirs = Dictionary::new(["string"]).unwrap();
        let ours = Arc::new(Dictionary::new(["other"]).unwrap());
        let mut src = Builder::new().with_dictionary(Arc::new(theirs.clone()));
        src.push_array(None).unwrap();
        src.push_string(None, "string").unwrap();
        let src = src.take().unwrap();

        let mut b = Builder::new().with_dictionary(ours.clone());
        b.push_object(None).unwrap();
        b.push_value(Some("other"), src.value_with(Some(&theirs))).unwrap();
        let msg = b.take().unwrap();

        let bytes = msg.as_bytes();
        assert_eq!(&bytes[13..15], &[tag::DICT_KEY, 0]);
        assert_eq!(
            msg.value_with(Some(&ours))
                .get("other.0")
                .unwrap()
                .as_str()
                .unwrap(),
            "string"
        );
    }
}
