use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ensure_body_fits;
use crate::{
    serialize::{ensure_remaining, ByteRead, ByteWrite, WideString},
    MalformedPdu, StatusCode, TunnelCapabilities, TunnelId,
};

/// Sent by the client to ask for a new tunnel, after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelCreate {
    pub capabilities: TunnelCapabilities,
    paa_cookie: Option<Bytes>,
}

impl TunnelCreate {
    const FIELD_PAA_COOKIE: u16 = 0x1;

    /// Creates a tunnel create PDU, failing if the cookie is too long to be encoded.
    pub fn new(capabilities: TunnelCapabilities, paa_cookie: Option<Bytes>) -> Result<Self, MalformedPdu> {
        if let Some(cookie) = &paa_cookie {
            if cookie.len() > u16::MAX as usize {
                return Err(MalformedPdu::TooLong("PAA cookie"));
            }
            ensure_body_fits(10 + cookie.len(), "PAA cookie")?;
        }

        Ok(Self {
            capabilities,
            paa_cookie,
        })
    }

    /// The pre-authentication cookie, if the client sent one.
    pub fn paa_cookie(&self) -> Option<&Bytes> {
        self.paa_cookie.as_ref()
    }
}

impl ByteWrite for TunnelCreate {
    fn write(&self, buf: &mut BytesMut) {
        let fields_present = match self.paa_cookie {
            Some(_) => Self::FIELD_PAA_COOKIE,
            None => 0,
        };

        (self.capabilities, fields_present, 0u16).write(buf);
        if let Some(cookie) = &self.paa_cookie {
            buf.put_u16_le(cookie.len() as u16);
            buf.put_slice(cookie);
        }
    }
}

impl ByteRead for TunnelCreate {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (capabilities, fields_present, _reserved) = <(TunnelCapabilities, u16, u16)>::read(buf)?;

        let paa_cookie = match fields_present & Self::FIELD_PAA_COOKIE {
            0 => None,
            _ => {
                let len = u16::read(buf)? as usize;
                ensure_remaining(buf, len)?;
                Some(buf.copy_to_bytes(len))
            }
        };

        Ok(Self {
            capabilities,
            paa_cookie,
        })
    }
}

/// The gateway's answer to a [`TunnelCreate`]. On success, it carries the ID the client must
/// quote on its inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse {
    pub server_version: u16,
    pub status: StatusCode,
    pub tunnel_id: TunnelId,
    pub capabilities: TunnelCapabilities,
}

impl ByteWrite for TunnelResponse {
    fn write(&self, buf: &mut BytesMut) {
        (self.server_version, self.status, self.tunnel_id, self.capabilities).write(buf)
    }
}

impl ByteRead for TunnelResponse {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (server_version, status, tunnel_id, capabilities) = ByteRead::read(buf)?;

        Ok(Self {
            server_version,
            status,
            tunnel_id,
            capabilities,
        })
    }
}

/// Sent by the client to authorize itself on a created tunnel. The client name and address must
/// match the identity the HTTP layer established for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAuth {
    client_name: WideString,
    client_addr: Option<IpAddr>,
}

impl TunnelAuth {
    pub fn new(client_name: WideString, client_addr: Option<IpAddr>) -> Result<Self, MalformedPdu> {
        ensure_body_fits(client_name.encoded_len() + 17, "client name")?;

        Ok(Self {
            client_name,
            client_addr,
        })
    }

    pub fn client_name(&self) -> &WideString {
        &self.client_name
    }

    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }
}

impl ByteWrite for TunnelAuth {
    fn write(&self, buf: &mut BytesMut) {
        (&self.client_name, self.client_addr).write(buf)
    }
}

impl ByteRead for TunnelAuth {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (client_name, client_addr) = ByteRead::read(buf)?;

        Ok(Self {
            client_name,
            client_addr,
        })
    }
}

/// The gateway's answer to a [`TunnelAuth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAuthResponse {
    pub status: StatusCode,

    /// The idle timeout the gateway enforces during relaying, in seconds. Zero means none.
    pub idle_timeout: u32,
}

impl ByteWrite for TunnelAuthResponse {
    fn write(&self, buf: &mut BytesMut) {
        (self.status, self.idle_timeout).write(buf)
    }
}

impl ByteRead for TunnelAuthResponse {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (status, idle_timeout) = ByteRead::read(buf)?;
        Ok(Self { status, idle_timeout })
    }
}
