use bytes::{Buf, BufMut, BytesMut};

use super::{ensure_remaining, ByteRead, ByteWrite};
use crate::MalformedPdu;

impl ByteWrite for u8 {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(*self)
    }
}

impl ByteRead for u8 {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl ByteWrite for u16 {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16_le(*self)
    }
}

impl ByteRead for u16 {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 2)?;
        Ok(buf.get_u16_le())
    }
}

impl ByteWrite for u32 {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self)
    }
}

impl ByteRead for u32 {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

impl ByteWrite for u128 {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u128_le(*self)
    }
}

impl ByteRead for u128 {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        ensure_remaining(buf, 16)?;
        Ok(buf.get_u128_le())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_little_endian() {
        let mut buf = BytesMut::new();
        0x0102u16.write(&mut buf);
        0x0304_0506u32.write(&mut buf);
        assert_eq!(&buf[..], &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn short_slice_is_truncated() {
        let mut slice: &[u8] = &[0xAA, 0xBB, 0xCC];
        assert_eq!(
            u32::read(&mut slice),
            Err(MalformedPdu::Truncated { expected: 4, remaining: 3 })
        );
    }
}
