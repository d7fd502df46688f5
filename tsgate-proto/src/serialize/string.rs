use std::{fmt, ops::Deref};

use bytes::{Buf, BufMut, BytesMut};

use super::{ensure_remaining, ByteRead, ByteWrite};
use crate::MalformedPdu;

/// A string which is serialized as UTF-16LE with an [`u16`] byte length prefix.
///
/// The length is checked on construction, so any [`WideString`] can be written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WideString(String);

impl WideString {
    /// The maximum length of the string once encoded as UTF-16, in bytes.
    pub const MAX_ENCODED_LEN: usize = u16::MAX as usize - 1;

    /// Wraps a string, failing if its UTF-16 encoding would be longer than
    /// [`MAX_ENCODED_LEN`](Self::MAX_ENCODED_LEN) bytes.
    pub fn new<S: Into<String>>(s: S) -> Result<Self, MalformedPdu> {
        let s = s.into();
        if s.encode_utf16().count() * 2 > Self::MAX_ENCODED_LEN {
            return Err(MalformedPdu::TooLong("wide string"));
        }

        Ok(Self(s))
    }

    /// The amount of bytes this string takes when written, length prefix included.
    pub fn encoded_len(&self) -> usize {
        2 + self.0.encode_utf16().count() * 2
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for WideString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ByteWrite for WideString {
    fn write(&self, buf: &mut BytesMut) {
        let len = self.0.encode_utf16().count() * 2;
        buf.reserve(2 + len);
        buf.put_u16_le(len as u16);
        for unit in self.0.encode_utf16() {
            buf.put_u16_le(unit);
        }
    }
}

impl ByteRead for WideString {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let len = u16::read(buf)? as usize;
        if len % 2 != 0 {
            return Err(MalformedPdu::InvalidField("UTF-16 string length"));
        }

        ensure_remaining(buf, len)?;
        let mut units = Vec::with_capacity(len / 2);
        for _ in 0..(len / 2) {
            units.push(buf.get_u16_le());
        }

        String::from_utf16(&units)
            .map(Self)
            .map_err(|_| MalformedPdu::InvalidField("UTF-16 string"))
    }
}
