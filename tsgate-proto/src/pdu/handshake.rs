use bytes::BytesMut;

use crate::{
    serialize::{ByteRead, ByteWrite},
    ExtendedAuth, MalformedPdu, StatusCode,
};

/// The first PDU a client sends, asking for a protocol version and extended authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version_major: u8,
    pub version_minor: u8,
    pub client_version: u16,
    pub extended_auth: ExtendedAuth,
}

impl ByteWrite for HandshakeRequest {
    fn write(&self, buf: &mut BytesMut) {
        (self.version_major, self.version_minor, self.client_version, self.extended_auth).write(buf)
    }
}

impl ByteRead for HandshakeRequest {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (version_major, version_minor, client_version, extended_auth) = ByteRead::read(buf)?;

        Ok(Self {
            version_major,
            version_minor,
            client_version,
            extended_auth,
        })
    }
}

/// The gateway's answer to a [`HandshakeRequest`], with the negotiated version and extended
/// authentication methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: StatusCode,
    pub version_major: u8,
    pub version_minor: u8,
    pub server_version: u16,
    pub extended_auth: ExtendedAuth,
}

impl ByteWrite for HandshakeResponse {
    fn write(&self, buf: &mut BytesMut) {
        (
            self.status,
            self.version_major,
            self.version_minor,
            self.server_version,
            self.extended_auth,
        )
            .write(buf)
    }
}

impl ByteRead for HandshakeResponse {
    fn read(buf: &mut &[u8]) -> Result<Self, MalformedPdu> {
        let (status, version_major, version_minor, server_version, extended_auth) = ByteRead::read(buf)?;

        Ok(Self {
            status,
            version_major,
            version_minor,
            server_version,
            extended_auth,
        })
    }
}
