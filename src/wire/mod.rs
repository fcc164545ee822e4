//! Binary document wire format.
//!
//! Documents are trees of objects, arrays and scalars much like JSON, packed
//! into a tagged byte encoding that can be walked without parsing into an
//! intermediate tree.
//!
//! # Binary Format
//!
//! Every value starts with a single tag byte followed by its payload. All
//! multi-byte integers are big-endian.
//!
//! ```text
//! Z                      null
//! t / f                  true / false
//! i 2 4 8   <n bytes>    integer, smallest two's complement width
//! s S B     <len> <bytes> 00     string, 1/2/4-byte length
//! k K Y     <len> <bytes> 00     key, 1/2/4-byte length
//! d         <len:1> <ascii>      decimal text
//! u         <16 bytes>           uuid
//! T         <8 bytes>            time, signed nanoseconds since the epoch
//! {  [      <len:4> <members>    object / array
//! o  a      <len:1> <members>    (accepted when decoding)
//! O  A      <len:2> <members>    (accepted when decoding)
//! q  Q      <index:1>            dictionary string / key
//! ```
//!
//! The terminating NUL after string and key bytes is not counted in the
//! length. Container lengths count the bytes of their members only.
//!
//! A [`Message`] prefixes one value with an 8-byte correlation id. Because
//! every value is self-describing, a frame's total length can be computed from
//! its first few bytes, which is what the client relies on to split a TCP
//! stream back into frames.
//!
//! # Key Components
//!
//! - [`Builder`]: writes a message into a growable buffer.
//! - [`Val`]: zero-copy read access to an encoded value.
//! - [`Message`]: an owned, framed value.
//! - [`json`]: conversion to and from `serde_json` documents.
pub mod builder;
pub mod json;
pub mod message;
pub mod value;

pub use builder::Builder;
pub use message::Message;
pub use value::{Val, ValKind, Visitor, Walk};

use crate::error::{OpoError, Result};

/// Deepest container nesting the builder and the walker accept.
pub const MAX_DEPTH: usize = 512;

/// Size of the correlation id that starts every message.
pub const ID_SIZE: usize = 8;

/// Length of a canonical hyphenated uuid string.
pub const UUID_STR_LEN: usize = 36;

/// Length of a `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ` time string.
pub const TIME_STR_LEN: usize = 30;

pub(crate) mod tag {
    pub const NULL: u8 = b'Z';
    pub const TRUE: u8 = b't';
    pub const FALSE: u8 = b'f';
    pub const INT1: u8 = b'i';
    pub const INT2: u8 = b'2';
    pub const INT4: u8 = b'4';
    pub const INT8: u8 = b'8';
    pub const STR1: u8 = b's';
    pub const STR2: u8 = b'S';
    pub const STR4: u8 = b'B';
    pub const KEY1: u8 = b'k';
    pub const KEY2: u8 = b'K';
    pub const KEY4: u8 = b'Y';
    pub const DEC: u8 = b'd';
    pub const UUID: u8 = b'u';
    pub const TIME: u8 = b'T';
    pub const OBJ1: u8 = b'o';
    pub const OBJ2: u8 = b'O';
    pub const OBJ4: u8 = b'{';
    pub const ARRAY1: u8 = b'a';
    pub const ARRAY2: u8 = b'A';
    pub const ARRAY4: u8 = b'[';
    pub const DICT_STR: u8 = b'q';
    pub const DICT_KEY: u8 = b'Q';
}

/// How the bytes following a tag are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    /// Fixed number of payload bytes.
    Fixed(usize),
    /// Length field of the given width, that many bytes, then a NUL.
    Text(usize),
    /// One length byte then that many ASCII bytes.
    Decimal,
    /// Length field of the given width then that many member bytes.
    Container(usize),
}

pub(crate) fn layout(t: u8) -> Option<Layout> {
    Some(match t {
        tag::NULL | tag::TRUE | tag::FALSE => Layout::Fixed(0),
        tag::INT1 | tag::DICT_STR | tag::DICT_KEY => Layout::Fixed(1),
        tag::INT2 => Layout::Fixed(2),
        tag::INT4 => Layout::Fixed(4),
        tag::INT8 | tag::TIME => Layout::Fixed(8),
        tag::UUID => Layout::Fixed(16),
        tag::STR1 | tag::KEY1 => Layout::Text(1),
        tag::STR2 | tag::KEY2 => Layout::Text(2),
        tag::STR4 | tag::KEY4 => Layout::Text(4),
        tag::DEC => Layout::Decimal,
        tag::OBJ1 | tag::ARRAY1 => Layout::Container(1),
        tag::OBJ2 | tag::ARRAY2 => Layout::Container(2),
        tag::OBJ4 | tag::ARRAY4 => Layout::Container(4),
        _ => return None,
    })
}

pub(crate) fn is_object(t: u8) -> bool {
    matches!(t, tag::OBJ1 | tag::OBJ2 | tag::OBJ4)
}

pub(crate) fn is_array(t: u8) -> bool {
    matches!(t, tag::ARRAY1 | tag::ARRAY2 | tag::ARRAY4)
}

pub(crate) fn is_key(t: u8) -> bool {
    matches!(t, tag::KEY1 | tag::KEY2 | tag::KEY4 | tag::DICT_KEY)
}

/// Reads a big-endian unsigned integer of `width` bytes.
pub(crate) fn read_uint(bytes: &[u8], width: usize) -> u64 {
    bytes[..width]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Header length and payload length of the value at the start of `bytes`.
///
/// Returns `Ok(None)` when `bytes` is too short to tell. The payload itself
/// does not need to be present.
pub(crate) fn header(bytes: &[u8], offset: usize) -> Result<Option<(usize, usize)>> {
    let Some(&t) = bytes.first() else {
        return Ok(None);
    };
    let Some(layout) = layout(t) else {
        return Err(OpoError::parse(
            offset,
            format!("corrupt message format, unknown tag 0x{t:02x}"),
        ));
    };

    Ok(match layout {
        Layout::Fixed(n) => Some((1, n)),
        Layout::Decimal => bytes.get(1).map(|len| (2, *len as usize)),
        Layout::Text(width) => {
            if bytes.len() < 1 + width {
                None
            } else {
                Some((1 + width, read_uint(&bytes[1..], width) as usize + 1))
            }
        }
        Layout::Container(width) => {
            if bytes.len() < 1 + width {
                None
            } else {
                Some((1 + width, read_uint(&bytes[1..], width) as usize))
            }
        }
    })
}

/// Total span of the value at the start of `bytes`, or `None` if more bytes
/// are needed to know it.
pub(crate) fn span(bytes: &[u8], offset: usize) -> Result<Option<usize>> {
    Ok(header(bytes, offset)?.map(|(head, body)| head + body))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_from_header_only() {
        assert_eq!(span(&[tag::NULL], 0).unwrap(), Some(1));
        assert_eq!(span(&[tag::INT8], 0).unwrap(), Some(9));
        assert_eq!(span(&[tag::STR2, 0x01], 0).unwrap(), None);
        assert_eq!(span(&[tag::STR2, 0x01, 0x00], 0).unwrap(), Some(1 + 2 + 256 + 1));
        assert_eq!(span(&[tag::OBJ4, 0, 0, 0, 7], 0).unwrap(), Some(12));
        assert_eq!(span(&[tag::ARRAY1, 3], 0).unwrap(), Some(5));
        assert_eq!(span(&[tag::DEC], 0).unwrap(), None);
        assert_eq!(span(&[], 0).unwrap(), None);
    }

    #[test]
    #[should_panic(expected = "unknown tag 0x01")]
    fn span_unknown_tag() {
        span(&[0x01], 0).unwrap();
    }

    #[test]
    fn read_uint_widths() {
        assert_eq!(read_uint(&[0x12, 0x34], 2), 0x1234);
        assert_eq!(read_uint(&[0, 0, 1, 0, 0xff], 4), 256);
        assert_eq!(read_uint(&[0xff; 8], 8), u64::MAX);
    }
}
