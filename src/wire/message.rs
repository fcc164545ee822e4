//! Framed messages.
//!
//! A [`Message`] owns one frame: an 8-byte big-endian correlation id followed
//! by exactly one encoded value. Frames carry no separate length field; the
//! value's own header says how long it is, which is what
//! [`Message::frame_size`] reads.
use std::fmt;

use crate::{
    dict::Dictionary,
    error::{ErrorKind, OpoError, Result},
};

use super::{ID_SIZE, Val, span, tag};

#[derive(Clone, PartialEq, Eq)]
pub struct Message(Vec<u8>);

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("len", &self.0.len())
            .finish()
    }
}

impl Message {
    /// Total frame length given the first bytes of a frame, or `None` if
    /// more bytes are needed to tell.
    ///
    /// # Errors
    ///
    /// [`OpoError::Parse`] when the value tag is not recognized.
    pub fn frame_size(prefix: &[u8]) -> Result<Option<usize>> {
        if prefix.len() <= ID_SIZE {
            return Ok(None);
        }
        Ok(span(&prefix[ID_SIZE..], ID_SIZE)?.map(|n| n + ID_SIZE))
    }

    /// Wraps a complete frame, checking that it holds exactly one value.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match Self::frame_size(&bytes)? {
            Some(size) if size == bytes.len() => Ok(Self(bytes)),
            Some(size) => Err(OpoError::parse(
                0,
                format!("frame is {} bytes, its value says {size}", bytes.len()),
            )),
            None => Err(OpoError::parse(0, "frame is truncated")),
        }
    }

    pub(crate) fn from_built(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Response synthesized for a query the server skipped:
    /// `{"code": <lost code>, "error": "no response"}` stamped with `id`.
    pub fn lost(id: u64) -> Self {
        const ERROR: &[u8] = b"no response";

        let mut body = Vec::with_capacity(32);
        body.extend_from_slice(&[tag::KEY1, 4]);
        body.extend_from_slice(b"code\0");
        body.extend_from_slice(&[tag::INT1, ErrorKind::Lost.code() as u8]);
        body.extend_from_slice(&[tag::KEY1, 5]);
        body.extend_from_slice(b"error\0");
        body.extend_from_slice(&[tag::STR1, ERROR.len() as u8]);
        body.extend_from_slice(ERROR);
        body.push(0);

        let mut frame = Vec::with_capacity(ID_SIZE + 5 + body.len());
        frame.extend_from_slice(&id.to_be_bytes());
        frame.push(tag::OBJ4);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Self(frame)
    }

    pub fn id(&self) -> u64 {
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&self.0[..ID_SIZE]);
        u64::from_be_bytes(id)
    }

    pub fn set_id(&mut self, id: u64) {
        self.0[..ID_SIZE].copy_from_slice(&id.to_be_bytes());
    }

    pub fn value(&self) -> Val<'_> {
        Val::at(&self.0[ID_SIZE..], ID_SIZE, None)
    }

    /// Value view that resolves dictionary references against `dict`.
    pub fn value_with<'a>(&'a self, dict: Option<&'a Dictionary>) -> Val<'a> {
        Val::at(&self.0[ID_SIZE..], ID_SIZE, dict)
    }

    /// The whole frame, id included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() <= ID_SIZE
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
