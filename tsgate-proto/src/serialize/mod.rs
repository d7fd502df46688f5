//! Defines the [`ByteRead`] and [`ByteWrite`] traits and implements them for the field types
//! used by the gateway protocol.
//!
//! This includes [`u8`], [`u16`], [`u32`], [`u128`], [`WideString`], `Option<IpAddr>` and tuples
//! of up to 5 elements. Every numeric type is serialized in little-endian byte order.
//!
//! Unlike a general purpose serializer, reading never pulls more bytes from a stream: a
//! [`ByteRead`] implementation works on a slice which is already cut to the declared length of
//! the packet, so a field that doesn't fit in that slice is reported as
//! [`MalformedPdu::Truncated`] rather than waiting for more bytes.
//!
//! # Serialization of strings
//! Strings are serialized as UTF-16LE, preceded by an [`u16`] with the length in bytes. The
//! [`WideString`] type checks on construction that the string fits in that length, so writing it
//! can't fail.
//!
//! # Serialization of tuples
//! [`ByteRead`] and [`ByteWrite`] are implemented for tuples of up to 5 elements, which allows
//! turning multiple writes such as this:
//! ```ignore
//! self.status.write(buf);
//! self.channel_id.write(buf);
//! self.redirect_flags.write(buf);
//! ```
//!
//! into this:
//! ```ignore
//! (self.status, self.channel_id, self.redirect_flags).write(buf);
//! ```

use bytes::BytesMut;

use crate::MalformedPdu;

mod net;
mod primitives;
mod string;
mod tuples;
mod u16_repr_enum;

pub use string::*;
pub use u16_repr_enum::*;

/// Serializes a type into bytes, appending them to a buffer.
pub trait ByteWrite {
    /// Serializes this instance into bytes, appending those bytes to `buf`.
    fn write(&self, buf: &mut BytesMut);
}

/// Deserializes a type from a slice of bytes, advancing the slice past the bytes consumed.
pub trait ByteRead: Sized {
    /// Deserializes an instance of this type from the start of `buf`.
    ///
    /// When an error occurs, there's no guarantee on how far `buf` was advanced.
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu>;
}

/// Checks that `buf` holds at least `len` more bytes.
pub(crate) fn ensure_remaining(buf: &[u8], len: usize) -> Result<(), MalformedPdu> {
    match buf.len() >= len {
        true => Ok(()),
        false => Err(MalformedPdu::Truncated {
            expected: len,
            remaining: buf.len(),
        }),
    }
}

impl<T: ByteWrite> ByteWrite for &T {
    fn write(&self, buf: &mut BytesMut) {
        (*self).write(buf)
    }
}
