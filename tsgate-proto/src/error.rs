use std::io;

use thiserror::Error;

/// The reasons why a sequence of bytes cannot be decoded into a PDU.
///
/// [`MalformedPdu::Incomplete`] is the only recoverable variant: it means the buffer ends before
/// the packet does, and decoding may be retried once more bytes are available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedPdu {
    #[error("incomplete packet, {needed} more bytes are needed")]
    Incomplete { needed: usize },

    #[error("unknown packet type {0:#06x}")]
    UnknownType(u16),

    #[error("declared packet length {0} is out of range")]
    BadLength(usize),

    #[error("field truncated, expected {expected} bytes but only {remaining} remain in the packet")]
    Truncated { expected: usize, remaining: usize },

    #[error("{0} trailing bytes after the last field of the packet")]
    TrailingBytes(usize),

    #[error("invalid {0}")]
    InvalidField(&'static str),

    #[error("{0} is too long to be encoded")]
    TooLong(&'static str),
}

impl MalformedPdu {
    /// Whether decoding may succeed once more bytes are available.
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

/// An error while reading PDUs from a stream.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("malformed PDU: {0}")]
    Malformed(#[from] MalformedPdu),

    #[error("stream ended in the middle of a packet")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] io::Error),
}
