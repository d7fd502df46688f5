use bytes::BytesMut;

use super::ensure_body_fits;
use crate::{
    serialize::{ByteRead, ByteWrite, WideString},
    MalformedPdu, RedirectFlags, StatusCode,
};

/// Sent by the client to open the channel to a backend, naming the host(s) it wants to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCreate {
    resources: Vec<WideString>,
    port: u16,
    protocol: u16,
}

impl ChannelCreate {
    /// The maximum amount of resources, since their count is sent as an [`u8`].
    pub const MAX_RESOURCES: usize = u8::MAX as usize;

    pub fn new(resources: Vec<WideString>, port: u16, protocol: u16) -> Result<Self, MalformedPdu> {
        if resources.len() > Self::MAX_RESOURCES {
            return Err(MalformedPdu::TooLong("resource list"));
        }

        let body_len = 5 + resources.iter().map(WideString::encoded_len).sum::<usize>();
        ensure_body_fits(body_len, "resource list")?;

        Ok(Self {
            resources,
            port,
            protocol,
        })
    }

    /// The hosts the client asks for, in order of preference.
    pub fn resources(&self) -> &[WideString] {
        &self.resources
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }
}

impl ByteWrite for ChannelCreate {
    fn write(&self, buf: &mut BytesMut) {
        (self.resources.len() as u8, self.port, self.protocol).write(buf);
        for resource in &self.resources {
            resource.write(buf);
        }
    }
}

impl ByteRead for ChannelCreate {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (count, port, protocol) = <(u8, u16, u16)>::read(buf)?;

        let mut resources = Vec::with_capacity(count as usize);
        for _ in 0..count {
            resources.push(WideString::read(buf)?);
        }

        Ok(Self {
            resources,
            port,
            protocol,
        })
    }
}

/// The gateway's answer to a [`ChannelCreate`]. On success, relaying starts right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResponse {
    pub status: StatusCode,
    pub channel_id: u32,
    pub redirect_flags: RedirectFlags,
}

impl ByteWrite for ChannelResponse {
    fn write(&self, buf: &mut BytesMut) {
        (self.status, self.channel_id, self.redirect_flags).write(buf)
    }
}

impl ByteRead for ChannelResponse {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (status, channel_id, redirect_flags) = ByteRead::read(buf)?;

        Ok(Self {
            status,
            channel_id,
            redirect_flags,
        })
    }
}
