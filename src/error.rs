//! Error taxonomy shared by the codec and the client.
//!
//! Every failure maps onto a closed set of [`ErrorKind`]s. Calls return an
//! [`OpoError`]; conditions found on the receive thread (unmatched or
//! duplicate responses, read failures) only travel as a kind through the
//! status callback. The numeric [`code`](ErrorKind::code) is what a
//! synthesized lost response carries in its payload.
use std::{fmt, io};

use thiserror::Error;

/// Closed classification of everything that can go wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    Memory = 1,
    Argument = 2,
    Overflow = 3,
    Parse = 4,
    Type = 5,
    NotFound = 6,
    TooMany = 7,
    Read = 8,
    Write = 9,
    Network = 10,
    Lock = 11,
    Thread = 12,
    Busy = 13,
    Timeout = 14,
    /// No response arrived before a later one was seen.
    Lost = 15,
}

impl ErrorKind {
    /// Stable numeric code used on the wire.
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => ErrorKind::Memory,
            2 => ErrorKind::Argument,
            3 => ErrorKind::Overflow,
            4 => ErrorKind::Parse,
            5 => ErrorKind::Type,
            6 => ErrorKind::NotFound,
            7 => ErrorKind::TooMany,
            8 => ErrorKind::Read,
            9 => ErrorKind::Write,
            10 => ErrorKind::Network,
            11 => ErrorKind::Lock,
            12 => ErrorKind::Thread,
            13 => ErrorKind::Busy,
            14 => ErrorKind::Timeout,
            15 => ErrorKind::Lost,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Memory => "memory error",
            ErrorKind::Argument => "invalid argument",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Parse => "parse error",
            ErrorKind::Type => "type error",
            ErrorKind::NotFound => "not found",
            ErrorKind::TooMany => "too many",
            ErrorKind::Read => "read failed",
            ErrorKind::Write => "write failed",
            ErrorKind::Network => "network error",
            ErrorKind::Lock => "lock error",
            ErrorKind::Thread => "thread error",
            ErrorKind::Busy => "busy",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Lost => "no response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum OpoError {
    #[error("memory allocation failed for size {size}")]
    Memory { size: usize },

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("type error: expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("network error, {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("lock poisoned: {0}")]
    Lock(&'static str),

    #[error("failed to start receiving thread: {0}")]
    Thread(#[source] io::Error),

    #[error("busy: {0}")]
    Busy(String),
}

impl OpoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpoError::Memory { .. } => ErrorKind::Memory,
            OpoError::Argument(_) => ErrorKind::Argument,
            OpoError::Overflow(_) => ErrorKind::Overflow,
            OpoError::Parse { .. } => ErrorKind::Parse,
            OpoError::Type { .. } => ErrorKind::Type,
            OpoError::Write(_) => ErrorKind::Write,
            OpoError::Network { .. } => ErrorKind::Network,
            OpoError::Lock(_) => ErrorKind::Lock,
            OpoError::Thread(_) => ErrorKind::Thread,
            OpoError::Busy(_) => ErrorKind::Busy,
        }
    }

    pub(crate) fn parse(offset: usize, reason: impl Into<String>) -> Self {
        OpoError::Parse {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 1..=15 {
            let kind = ErrorKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(16), None);
    }

    #[test]
    fn error_kind_mapping() {
        let err = OpoError::parse(3, "corrupt message format");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(
            err.to_string(),
            "parse error at offset 3: corrupt message format"
        );

        let err = OpoError::Write(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind(), ErrorKind::Write);
    }

    #[test]
    fn status_only_kinds_keep_their_codes() {
        // Reported through the status callback, never returned from a call.
        assert_eq!(ErrorKind::NotFound.code(), 6);
        assert_eq!(ErrorKind::TooMany.code(), 7);
        assert_eq!(ErrorKind::Read.code(), 8);
        assert_eq!(ErrorKind::Timeout.code(), 14);
        assert_eq!(ErrorKind::Read.to_string(), "read failed");
    }
}
