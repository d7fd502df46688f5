use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};

use super::{ensure_remaining, ByteRead, ByteWrite};
use crate::MalformedPdu;

impl ByteWrite for Ipv4Addr {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.octets())
    }
}

impl ByteRead for Ipv4Addr {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 4)?;
        let mut octets = [0u8; 4];
        buf.copy_to_slice(&mut octets);
        Ok(octets.into())
    }
}

impl ByteWrite for Ipv6Addr {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.octets())
    }
}

impl ByteRead for Ipv6Addr {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 16)?;
        let mut octets = [0u8; 16];
        buf.copy_to_slice(&mut octets);
        Ok(octets.into())
    }
}

/// An optional IP address is a tag byte, 0 if absent, 4 or 6 followed by the address octets.
impl ByteWrite for Option<IpAddr> {
    fn write(&self, buf: &mut BytesMut) {
        match self {
            None => buf.put_u8(0),
            Some(IpAddr::V4(v4)) => {
                buf.put_u8(4);
                v4.write(buf);
            }
            Some(IpAddr::V6(v6)) => {
                buf.put_u8(6);
                v6.write(buf);
            }
        }
    }
}

impl ByteRead for Option<IpAddr> {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        match u8::read(buf)? {
            0 => Ok(None),
            4 => Ok(Some(IpAddr::V4(Ipv4Addr::read(buf)?))),
            6 => Ok(Some(IpAddr::V6(Ipv6Addr::read(buf)?))),
            _ => Err(MalformedPdu::InvalidField("IP address type")),
        }
    }
}
