//! Framed Wire Codec
//!
//! Everything that crosses a socket is built from length-prefixed typed
//! elements written into a bounded buffer. An envelope (kind, id, sender
//! address) leads every datagram; payload elements follow.
//!
//! ## Guarantees
//! - **Network byte order**: all numerics are serialized with explicit
//!   big-endian byte operations. The codec never reinterprets host memory.
//! - **All-or-nothing writes**: an append that does not fit fails with
//!   [`CodecError::BufferFull`] and leaves the buffer untouched.
//! - **Safe reads**: a failed parse never advances the read cursor, so the
//!   caller can report the error and retry or discard the whole datagram.

pub mod buffer;
pub mod element;
pub mod envelope;


pub use buffer::{MsgBuffer, MAX_MSG_SIZE};
pub use element::{MsgElement, TAG_STRING, TAG_U16, TAG_U32, TAG_U64};
pub use envelope::MsgEnvelope;

use thiserror::Error;

/// Errors produced while serializing to or parsing from a [`MsgBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer does not have room for the element being appended.
    #[error("buffer full: needed {needed} bytes, {remaining} remaining")]
    BufferFull { needed: usize, remaining: usize },

    /// A string element longer than the u16 length prefix can describe.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// Truncated input, an unknown type tag, or a length that over-runs the
    /// readable region.
    #[error("parse error: {0}")]
    Parse(String),
}

impl CodecError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        CodecError::Parse(msg.into())
    }
}
