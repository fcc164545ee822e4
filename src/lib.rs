//! Client for a length-framed binary document protocol.
//!
//! Documents are encoded with [`wire::Builder`], read back through
//! [`wire::Val`] views, and exchanged with a server over a [`Client`] that
//! matches every response to the query that caused it.
pub mod client;
pub mod dict;
pub mod error;
pub mod wire;

pub use client::{Client, ClientOptions, QueryCallback};
pub use dict::Dictionary;
pub use error::{ErrorKind, OpoError, Result};
pub use wire::{Builder, Message, Val, ValKind, Visitor, Walk};
