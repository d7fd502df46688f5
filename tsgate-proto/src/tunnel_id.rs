use std::fmt;

use bytes::BytesMut;

use crate::{
    serialize::{ByteRead, ByteWrite},
    MalformedPdu,
};

/// A 128-bit number that uniquely identifies a tunnel while it is registered in a gateway.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(pub u128);

impl TunnelId {
    /// The length of a tunnel ID on the wire.
    pub const LENGTH: usize = 16;

    pub const fn to_bytes(self) -> [u8; Self::LENGTH] {
        self.0.to_le_bytes()
    }

    pub const fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelId({self})")
    }
}

impl ByteWrite for TunnelId {
    fn write(&self, buf: &mut BytesMut) {
        self.0.write(buf)
    }
}

impl ByteRead for TunnelId {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok(Self(u128::read(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_hex() {
        let id = TunnelId(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        assert_eq!(id.to_string(), "0123456789abcdef0011223344556677");
    }

    #[test]
    fn bytes_match_wire_encoding() {
        let id = TunnelId(0xAABB);
        let mut buf = BytesMut::new();
        id.write(&mut buf);
        assert_eq!(&buf[..], &id.to_bytes());
        assert_eq!(TunnelId::from_bytes(id.to_bytes()), id);
    }
}
