//! Conversion between messages and `serde_json` documents.
//!
//! JSON has no uuid or time type, so the mapping leans on string shape: a
//! canonical lowercase uuid string becomes a uuid value and a
//! `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ` string becomes a time value. Going the
//! other way both are rendered back to exactly those strings.
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::{
    dict::Dictionary,
    error::{OpoError, Result},
};

use super::{
    Builder, MAX_DEPTH, Message, TIME_STR_LEN, UUID_STR_LEN, Val, Visitor, Walk,
    value::{parse_time_string, time_string},
};

/// Encodes a JSON document as a message. The id is stamped when sent.
pub fn to_message(doc: &Value, dict: Option<&Dictionary>) -> Result<Message> {
    let mut b = Builder::new();
    if let Some(dict) = dict {
        b.set_dictionary(Some(std::sync::Arc::new(dict.clone())));
    }
    push_json(&mut b, None, doc, 0)?;
    b.take()
}

/// Pushes a JSON document into an existing builder.
pub fn push_json(b: &mut Builder, key: Option<&str>, doc: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(OpoError::Overflow(format!(
            "too deeply nested, limit is {MAX_DEPTH}"
        )));
    }
    match doc {
        Value::Null => b.push_null(key),
        Value::Bool(v) => b.push_bool(key, *v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                b.push_int(key, i)
            } else if let Some(u) = n.as_u64() {
                b.push_decimal_str(key, &u.to_string())
            } else {
                b.push_double(key, n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => {
            if let Some(uuid) = as_uuid(s) {
                b.push_uuid(key, uuid)
            } else if let Some(nanos) = as_time(s) {
                b.push_time(key, nanos)
            } else {
                b.push_string(key, s)
            }
        }
        Value::Array(items) => {
            b.push_array(key)?;
            for item in items {
                push_json(b, None, item, depth + 1)?;
            }
            b.pop()
        }
        Value::Object(members) => {
            b.push_object(key)?;
            for (k, v) in members {
                push_json(b, Some(k), v, depth + 1)?;
            }
            b.pop()
        }
    }
}

fn as_uuid(s: &str) -> Option<Uuid> {
    let shaped = s.len() == UUID_STR_LEN
        && s.bytes().enumerate().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == b'-',
            _ => c.is_ascii_digit() || (b'a'..=b'f').contains(&c),
        });
    if shaped { Uuid::parse_str(s).ok() } else { None }
}

fn as_time(s: &str) -> Option<i64> {
    if s.len() != TIME_STR_LEN {
        return None;
    }
    parse_time_string(s)
}

/// Decodes a message's value into a JSON document.
pub fn from_message(msg: &Message, dict: Option<&Dictionary>) -> Result<Value> {
    from_value(msg.value_with(dict))
}

pub fn from_value(val: Val<'_>) -> Result<Value> {
    let mut tree = Tree::default();
    match val.iterate(&mut tree)? {
        Walk::Completed => tree
            .done
            .ok_or_else(|| OpoError::parse(val.offset(), "value produced no document")),
        Walk::Halted => Err(OpoError::parse(val.offset(), "malformed object member")),
    }
}

/// Assembles a JSON tree from visitor callbacks.
#[derive(Default)]
struct Tree {
    open: Vec<(Value, Option<String>)>,
    key: Option<String>,
    done: Option<Value>,
}

impl Tree {
    fn add(&mut self, value: Value) -> bool {
        let key = self.key.take();
        match self.open.last_mut() {
            Some((Value::Object(map), _)) => match key {
                Some(k) => {
                    map.insert(k, value);
                    true
                }
                None => false,
            },
            Some((Value::Array(items), _)) => {
                items.push(value);
                true
            }
            Some(_) => false,
            None => {
                self.done = Some(value);
                true
            }
        }
    }

    fn close(&mut self) -> bool {
        match self.open.pop() {
            Some((value, key)) => {
                self.key = key;
                self.add(value)
            }
            None => false,
        }
    }
}

impl Visitor for Tree {
    fn begin_object(&mut self) -> bool {
        let key = self.key.take();
        self.open.push((Value::Object(Map::new()), key));
        true
    }

    fn end_object(&mut self) -> bool {
        self.close()
    }

    fn begin_array(&mut self) -> bool {
        let key = self.key.take();
        self.open.push((Value::Array(Vec::new()), key));
        true
    }

    fn end_array(&mut self) -> bool {
        self.close()
    }

    fn key(&mut self, key: &str) -> bool {
        self.key = Some(key.to_string());
        true
    }

    fn null(&mut self) -> bool {
        self.add(Value::Null)
    }

    fn boolean(&mut self, value: bool) -> bool {
        self.add(Value::Bool(value))
    }

    fn fixnum(&mut self, value: i64) -> bool {
        self.add(Value::Number(value.into()))
    }

    fn decimal(&mut self, value: f64, text: &str) -> bool {
        let number = match text.parse::<u64>() {
            Ok(u) => Some(Number::from(u)),
            Err(_) => Number::from_f64(value),
        };
        self.add(number.map_or(Value::Null, Value::Number))
    }

    fn string(&mut self, value: &str) -> bool {
        self.add(Value::String(value.to_string()))
    }

    fn uuid(&mut self, value: Uuid) -> bool {
        self.add(Value::String(value.hyphenated().to_string()))
    }

    fn time(&mut self, nanos: i64) -> bool {
        self.add(Value::String(time_string(nanos)))
    }
}
