use std::{io, net::IpAddr};

use axum::http;
use thiserror::Error;
use tsgate_proto::{pdu::PacketType, MalformedPdu, ReadError, StatusCode, TunnelId};

use crate::gateway::TunnelState;

/// The ways a tunnel can fail.
///
/// Every failure is scoped to a single tunnel: it closes that tunnel (or rejects that inbound
/// request) and never affects any other one.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed PDU: {0}")]
    MalformedPdu(#[from] MalformedPdu),

    #[error("unexpected {got} PDU while {state}")]
    ProtocolViolation { state: TunnelState, got: PacketType },

    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("tunnel authorization for {claimed} does not match the authenticated client")]
    AuthMismatch { claimed: String },

    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    #[error("backend {backend} is unreachable: {source}")]
    BackendUnreachable { backend: String, source: io::Error },

    #[error("no tunnel with ID {0}")]
    UnknownTunnel(TunnelId),

    #[error("tunnel {0} already has an inbound stream")]
    AlreadyPaired(TunnelId),

    #[error("tunnel ID {0} is already registered")]
    DuplicateId(TunnelId),

    #[error("no inbound stream arrived for tunnel {0} in time")]
    PairingTimeout(TunnelId),

    #[error("timed out waiting for the next control PDU")]
    HandshakeTimeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GatewayError {
    pub fn admission_denied_for(source: IpAddr) -> Self {
        Self::AdmissionDenied(format!("client {source} is outside the permitted subnet"))
    }

    /// The status sent to the client in the PDU that reports this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedPdu(_) | Self::ProtocolViolation { .. } => StatusCode::PROTOCOL_ERROR,
            Self::UnsupportedVersion { .. } => StatusCode::UNSUPPORTED_VERSION,
            Self::AuthMismatch { .. } => StatusCode::AUTH_MISMATCH,
            Self::AdmissionDenied(_) => StatusCode::ADMISSION_DENIED,
            Self::BackendUnreachable { .. } => StatusCode::BACKEND_UNREACHABLE,
            Self::UnknownTunnel(_) | Self::AlreadyPaired(_) => StatusCode::PROTOCOL_ERROR,
            Self::DuplicateId(_) => StatusCode::INTERNAL_ERROR,
            Self::PairingTimeout(_) => StatusCode::PAIRING_TIMEOUT,
            Self::HandshakeTimeout => StatusCode::SESSION_TIMEOUT,
            Self::Io(_) => StatusCode::CONNECTION_ABORTED,
        }
    }

    /// The HTTP status used when this error is the answer to a whole request.
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            Self::MalformedPdu(_) | Self::ProtocolViolation { .. } => http::StatusCode::BAD_REQUEST,
            Self::UnsupportedVersion { .. } => http::StatusCode::BAD_REQUEST,
            Self::AuthMismatch { .. } | Self::AdmissionDenied(_) => http::StatusCode::FORBIDDEN,
            Self::BackendUnreachable { .. } => http::StatusCode::BAD_GATEWAY,
            Self::UnknownTunnel(_) => http::StatusCode::NOT_FOUND,
            Self::AlreadyPaired(_) | Self::DuplicateId(_) => http::StatusCode::CONFLICT,
            Self::PairingTimeout(_) | Self::HandshakeTimeout => http::StatusCode::REQUEST_TIMEOUT,
            Self::Io(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ReadError> for GatewayError {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::Malformed(malformed) => Self::MalformedPdu(malformed),
            ReadError::UnexpectedEof => Self::Io(io::ErrorKind::UnexpectedEof.into()),
            ReadError::Io(error) => Self::Io(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_errors_map_to_http_statuses() {
        assert_eq!(GatewayError::UnknownTunnel(TunnelId(1)).http_status(), http::StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::AlreadyPaired(TunnelId(1)).http_status(), http::StatusCode::CONFLICT);
        assert_eq!(
            GatewayError::MalformedPdu(MalformedPdu::InvalidField("tunnel ID")).http_status(),
            http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn read_errors_convert() {
        let error = GatewayError::from(ReadError::UnexpectedEof);
        assert!(matches!(error, GatewayError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert_eq!(error.status(), StatusCode::CONNECTION_ABORTED);
    }
}
