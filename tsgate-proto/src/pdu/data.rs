use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    serialize::{ensure_remaining, ByteRead, ByteWrite},
    MalformedPdu, StatusCode,
};

/// A chunk of the tunneled byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    payload: Bytes,
}

impl DataPdu {
    /// The maximum payload a single Data PDU can carry.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    pub fn new(payload: Bytes) -> Result<Self, MalformedPdu> {
        match payload.len() <= Self::MAX_PAYLOAD {
            true => Ok(Self { payload }),
            false => Err(MalformedPdu::TooLong("data payload")),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl ByteWrite for DataPdu {
    fn write(&self, buf: &mut BytesMut) {
        buf.reserve(2 + self.payload.len());
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }
}

impl ByteRead for DataPdu {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let len = u16::read(buf)? as usize;
        ensure_remaining(buf, len)?;
        Ok(Self {
            payload: buf.copy_to_bytes(len),
        })
    }
}

/// Ends the tunnel. Either side may send it, at any point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseChannel {
    pub status: StatusCode,
}

impl ByteWrite for CloseChannel {
    fn write(&self, buf: &mut BytesMut) {
        self.status.write(buf)
    }
}

impl ByteRead for CloseChannel {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        Ok(Self {
            status: StatusCode::read(buf)?,
        })
    }
}
