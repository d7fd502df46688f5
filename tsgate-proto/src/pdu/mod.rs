//! The PDU types of the gateway protocol, and the functions to frame them.

use std::{fmt, io};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    serialize::{ByteRead, ByteWrite, U16ReprEnum},
    MalformedPdu,
};

mod channel;
mod data;
mod handshake;
mod tunnel;

pub use channel::*;
pub use data::*;
pub use handshake::*;
pub use tunnel::*;

/// The length of the header every PDU starts with.
pub const HEADER_LENGTH: usize = 8;

/// The maximum total length of a PDU, header included. This is what the largest Data PDU takes.
pub const MAX_PACKET_LENGTH: usize = HEADER_LENGTH + 2 + u16::MAX as usize;

/// The maximum length of a PDU's body.
pub const MAX_BODY_LENGTH: usize = MAX_PACKET_LENGTH - HEADER_LENGTH;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    HandshakeRequest = 0x01,
    HandshakeResponse = 0x02,
    TunnelCreate = 0x04,
    TunnelResponse = 0x05,
    TunnelAuth = 0x06,
    TunnelAuthResponse = 0x07,
    ChannelCreate = 0x08,
    ChannelResponse = 0x09,
    Data = 0x0A,
    Keepalive = 0x0D,
    CloseChannel = 0x10,
}

impl U16ReprEnum for PacketType {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::HandshakeRequest),
            0x02 => Some(Self::HandshakeResponse),
            0x04 => Some(Self::TunnelCreate),
            0x05 => Some(Self::TunnelResponse),
            0x06 => Some(Self::TunnelAuth),
            0x07 => Some(Self::TunnelAuthResponse),
            0x08 => Some(Self::ChannelCreate),
            0x09 => Some(Self::ChannelResponse),
            0x0A => Some(Self::Data),
            0x0D => Some(Self::Keepalive),
            0x10 => Some(Self::CloseChannel),
            _ => None,
        }
    }

    fn into_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeRequest => write!(f, "handshake request"),
            Self::HandshakeResponse => write!(f, "handshake response"),
            Self::TunnelCreate => write!(f, "tunnel create"),
            Self::TunnelResponse => write!(f, "tunnel response"),
            Self::TunnelAuth => write!(f, "tunnel auth"),
            Self::TunnelAuthResponse => write!(f, "tunnel auth response"),
            Self::ChannelCreate => write!(f, "channel create"),
            Self::ChannelResponse => write!(f, "channel response"),
            Self::Data => write!(f, "data"),
            Self::Keepalive => write!(f, "keepalive"),
            Self::CloseChannel => write!(f, "close channel"),
        }
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    TunnelCreate(TunnelCreate),
    TunnelResponse(TunnelResponse),
    TunnelAuth(TunnelAuth),
    TunnelAuthResponse(TunnelAuthResponse),
    ChannelCreate(ChannelCreate),
    ChannelResponse(ChannelResponse),
    Data(DataPdu),
    Keepalive,
    Close(CloseChannel),
}

impl Pdu {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::HandshakeRequest(_) => PacketType::HandshakeRequest,
            Self::HandshakeResponse(_) => PacketType::HandshakeResponse,
            Self::TunnelCreate(_) => PacketType::TunnelCreate,
            Self::TunnelResponse(_) => PacketType::TunnelResponse,
            Self::TunnelAuth(_) => PacketType::TunnelAuth,
            Self::TunnelAuthResponse(_) => PacketType::TunnelAuthResponse,
            Self::ChannelCreate(_) => PacketType::ChannelCreate,
            Self::ChannelResponse(_) => PacketType::ChannelResponse,
            Self::Data(_) => PacketType::Data,
            Self::Keepalive => PacketType::Keepalive,
            Self::Close(_) => PacketType::CloseChannel,
        }
    }

    fn write_body(&self, buf: &mut BytesMut) {
        match self {
            Self::HandshakeRequest(p) => p.write(buf),
            Self::HandshakeResponse(p) => p.write(buf),
            Self::TunnelCreate(p) => p.write(buf),
            Self::TunnelResponse(p) => p.write(buf),
            Self::TunnelAuth(p) => p.write(buf),
            Self::TunnelAuthResponse(p) => p.write(buf),
            Self::ChannelCreate(p) => p.write(buf),
            Self::ChannelResponse(p) => p.write(buf),
            Self::Data(p) => p.write(buf),
            Self::Keepalive => {}
            Self::Close(p) => p.write(buf),
        }
    }

    fn read_body(packet_type: PacketType, body: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let pdu = match packet_type {
            PacketType::HandshakeRequest => Self::HandshakeRequest(ByteRead::read(body)?),
            PacketType::HandshakeResponse => Self::HandshakeResponse(ByteRead::read(body)?),
            PacketType::TunnelCreate => Self::TunnelCreate(ByteRead::read(body)?),
            PacketType::TunnelResponse => Self::TunnelResponse(ByteRead::read(body)?),
            PacketType::TunnelAuth => Self::TunnelAuth(ByteRead::read(body)?),
            PacketType::TunnelAuthResponse => Self::TunnelAuthResponse(ByteRead::read(body)?),
            PacketType::ChannelCreate => Self::ChannelCreate(ByteRead::read(body)?),
            PacketType::ChannelResponse => Self::ChannelResponse(ByteRead::read(body)?),
            PacketType::Data => Self::Data(ByteRead::read(body)?),
            PacketType::Keepalive => Self::Keepalive,
            PacketType::CloseChannel => Self::Close(ByteRead::read(body)?),
        };

        Ok(pdu)
    }

    /// Appends this PDU, header included, to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();
        (self.packet_type().into_u16(), 0u16, 0u32).write(buf);
        self.write_body(buf);

        let length = (buf.len() - start) as u32;
        buf[(start + 4)..(start + HEADER_LENGTH)].copy_from_slice(&length.to_le_bytes());
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + 32);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encodes this PDU and writes it to `writer`, flushing afterwards.
    pub async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.packet_type().fmt(f)
    }
}

/// Decodes the PDU at the start of `buf`, returning it alongside the amount of bytes it took.
///
/// Bytes in `buf` past the packet's declared length are never looked at. If `buf` ends before
/// the packet does, [`MalformedPdu::Incomplete`] is returned and decoding may be retried once more
/// bytes are available.
pub fn decode(buf: &[u8]) -> Result<(Pdu, usize), MalformedPdu> {
    if buf.len() < HEADER_LENGTH {
        return Err(MalformedPdu::Incomplete {
            needed: HEADER_LENGTH - buf.len(),
        });
    }

    let mut header = &buf[..HEADER_LENGTH];
    let (raw_type, _reserved, length) = <(u16, u16, u32)>::read(&mut header)?;
    let packet_type = PacketType::from_u16(raw_type).ok_or(MalformedPdu::UnknownType(raw_type))?;

    let length = length as usize;
    if !(HEADER_LENGTH..=MAX_PACKET_LENGTH).contains(&length) {
        return Err(MalformedPdu::BadLength(length));
    }

    if buf.len() < length {
        return Err(MalformedPdu::Incomplete {
            needed: length - buf.len(),
        });
    }

    let mut body = &buf[HEADER_LENGTH..length];
    let pdu = Pdu::read_body(packet_type, &mut body)?;
    if !body.is_empty() {
        return Err(MalformedPdu::TrailingBytes(body.len()));
    }

    Ok((pdu, length))
}

/// Fails with [`MalformedPdu::TooLong`] if a body of `len` bytes doesn't fit in a packet.
pub(crate) fn ensure_body_fits(len: usize, what: &'static str) -> Result<(), MalformedPdu> {
    match len <= MAX_BODY_LENGTH {
        true => Ok(()),
        false => Err(MalformedPdu::TooLong(what)),
    }
}
