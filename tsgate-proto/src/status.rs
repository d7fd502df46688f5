use std::fmt;

use bytes::BytesMut;

use crate::{
    serialize::{ByteRead, ByteWrite},
    MalformedPdu,
};

/// A status code, as carried by response and close PDUs.
///
/// Codes other than the ones named here are kept as-is, so a status read from the wire is always
/// written back unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const OK: Self = Self(0);
    pub const INTERNAL_ERROR: Self = Self(0x8007_59D8);
    pub const ADMISSION_DENIED: Self = Self(0x8007_59DA);
    pub const AUTH_MISMATCH: Self = Self(0x8007_59DB);
    pub const BACKEND_UNREACHABLE: Self = Self(0x8007_59DD);
    pub const PROTOCOL_ERROR: Self = Self(0x8007_59E4);
    pub const UNSUPPORTED_VERSION: Self = Self(0x8007_59E5);
    pub const PAIRING_TIMEOUT: Self = Self(0x8007_59E6);
    pub const SESSION_TIMEOUT: Self = Self(0x8007_59F6);
    pub const CONNECTION_ABORTED: Self = Self(0x8007_04D4);

    /// Gets a short name for this status, or `None` if the code is not one of the known ones.
    pub const fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::OK => "ok",
            Self::INTERNAL_ERROR => "internal error",
            Self::ADMISSION_DENIED => "admission denied",
            Self::AUTH_MISMATCH => "authorization mismatch",
            Self::BACKEND_UNREACHABLE => "backend unreachable",
            Self::PROTOCOL_ERROR => "protocol error",
            Self::UNSUPPORTED_VERSION => "unsupported version",
            Self::PAIRING_TIMEOUT => "pairing timeout",
            Self::SESSION_TIMEOUT => "session timeout",
            Self::CONNECTION_ABORTED => "connection aborted",
            _ => return None,
        };

        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#010x})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({self})")
    }
}

impl ByteWrite for StatusCode {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf)
    }
}

impl ByteRead for StatusCode {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok(Self(u32::read(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_known_codes() {
        assert_eq!(StatusCode::OK.to_string(), "ok (0x00000000)");
        assert_eq!(StatusCode(0x1234).to_string(), "0x00001234");
        assert_eq!(StatusCode(0x8007_59DB), StatusCode::AUTH_MISMATCH);
    }
}
