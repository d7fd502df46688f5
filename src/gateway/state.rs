//! The tunnel lifecycle and the per-state rules of the control phase.
//!
//! The functions here decide what a control PDU means in a given state and which PDU answers it.
//! They do no I/O; [`Tunnel`](super::tunnel::Tunnel) performs the side effects (registering,
//! pairing, dialing) in between.

use std::fmt;

use tsgate_proto::{
    pdu::{
        ChannelResponse, CloseChannel, HandshakeRequest, HandshakeResponse, PacketType, Pdu, TunnelAuth,
        TunnelAuthResponse, TunnelResponse,
    },
    ExtendedAuth, RedirectFlags, StatusCode, TunnelCapabilities, TunnelId, PROTOCOL_VERSION_MAJOR,
    PROTOCOL_VERSION_MINOR, SERVER_VERSION,
};

use super::GatewayPolicy;
use crate::{ClientIdentity, GatewayError};

/// The states of a tunnel, in the order they are visited. A tunnel never goes back to an
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TunnelState {
    AwaitingHandshake,
    AwaitingTunnelCreate,
    AwaitingTunnelAuth,
    AwaitingChannelCreate,
    Relaying,
    Closing,
    Closed,
}

impl TunnelState {
    /// The only PDU type accepted in this state, or `None` once the control phase is over.
    pub const fn expected(self) -> Option<PacketType> {
        match self {
            Self::AwaitingHandshake => Some(PacketType::HandshakeRequest),
            Self::AwaitingTunnelCreate => Some(PacketType::TunnelCreate),
            Self::AwaitingTunnelAuth => Some(PacketType::TunnelAuth),
            Self::AwaitingChannelCreate => Some(PacketType::ChannelCreate),
            Self::Relaying | Self::Closing | Self::Closed => None,
        }
    }

    /// Moves to `next`. Moving backwards, or staying, is ignored.
    pub fn advance(&mut self, next: TunnelState) {
        debug_assert!(next > *self, "tunnel state went from {self} to {next}");
        if next > *self {
            *self = next;
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingHandshake => write!(f, "awaiting handshake"),
            Self::AwaitingTunnelCreate => write!(f, "awaiting tunnel create"),
            Self::AwaitingTunnelAuth => write!(f, "awaiting tunnel auth"),
            Self::AwaitingChannelCreate => write!(f, "awaiting channel create"),
            Self::Relaying => write!(f, "relaying"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A control phase failure, with the PDU to send the client before closing, if any.
#[derive(Debug)]
pub struct Rejected {
    pub reply: Option<Pdu>,
    pub error: GatewayError,
}

impl Rejected {
    /// Answers the PDU expected in `state` with a failure status.
    pub fn reply(state: TunnelState, error: GatewayError) -> Self {
        Self {
            reply: failure_reply(state, error.status()),
            error,
        }
    }

    /// Answers with a close PDU carrying the error's status.
    pub fn close(error: GatewayError) -> Self {
        Self {
            reply: Some(Pdu::Close(CloseChannel { status: error.status() })),
            error,
        }
    }

    /// Closes without sending anything, for when the outbound stream itself failed.
    pub fn silent(error: GatewayError) -> Self {
        Self { reply: None, error }
    }
}

/// Checks that `pdu` is the one expected in `state`.
pub fn check_expected(state: TunnelState, pdu: &Pdu) -> Result<(), Rejected> {
    match state.expected() {
        Some(expected) if expected == pdu.packet_type() => Ok(()),
        _ => Err(Rejected::close(GatewayError::ProtocolViolation {
            state,
            got: pdu.packet_type(),
        })),
    }
}

/// Builds the failure response for the PDU expected in `state`.
pub fn failure_reply(state: TunnelState, status: StatusCode) -> Option<Pdu> {
    let pdu = match state {
        TunnelState::AwaitingHandshake => Pdu::HandshakeResponse(HandshakeResponse {
            status,
            version_major: PROTOCOL_VERSION_MAJOR,
            version_minor: PROTOCOL_VERSION_MINOR,
            server_version: SERVER_VERSION,
            extended_auth: ExtendedAuth::NONE,
        }),
        TunnelState::AwaitingTunnelCreate => Pdu::TunnelResponse(TunnelResponse {
            server_version: SERVER_VERSION,
            status,
            tunnel_id: TunnelId(0),
            capabilities: TunnelCapabilities::NONE,
        }),
        TunnelState::AwaitingTunnelAuth => Pdu::TunnelAuthResponse(TunnelAuthResponse { status, idle_timeout: 0 }),
        TunnelState::AwaitingChannelCreate => Pdu::ChannelResponse(ChannelResponse {
            status,
            channel_id: 0,
            redirect_flags: RedirectFlags::NONE,
        }),
        TunnelState::Relaying => Pdu::Close(CloseChannel { status }),
        TunnelState::Closing | TunnelState::Closed => return None,
    };

    Some(pdu)
}

/// Answers a handshake. Only the supported major version is accepted; the negotiated extended
/// authentication is what the client asked for and the server offers.
pub fn negotiate_handshake(policy: &GatewayPolicy, request: &HandshakeRequest) -> Result<HandshakeResponse, GatewayError> {
    if request.version_major != PROTOCOL_VERSION_MAJOR {
        return Err(GatewayError::UnsupportedVersion {
            major: request.version_major,
            minor: request.version_minor,
        });
    }

    Ok(HandshakeResponse {
        status: StatusCode::OK,
        version_major: PROTOCOL_VERSION_MAJOR,
        version_minor: PROTOCOL_VERSION_MINOR,
        server_version: SERVER_VERSION,
        extended_auth: request.extended_auth.intersection(policy.offered_extended_auth()),
    })
}

/// Answers a successful tunnel creation.
pub fn tunnel_created(policy: &GatewayPolicy, tunnel_id: TunnelId) -> TunnelResponse {
    TunnelResponse {
        server_version: SERVER_VERSION,
        status: StatusCode::OK,
        tunnel_id,
        capabilities: policy.server_capabilities(),
    }
}

/// Checks a tunnel authorization against the identity of the outbound request.
pub fn authorize(
    policy: &GatewayPolicy,
    identity: &ClientIdentity,
    auth: &TunnelAuth,
) -> Result<TunnelAuthResponse, GatewayError> {
    if !identity.matches(auth.client_name(), auth.client_addr()) {
        return Err(GatewayError::AuthMismatch {
            claimed: auth.client_name().to_string(),
        });
    }

    Ok(TunnelAuthResponse {
        status: StatusCode::OK,
        idle_timeout: policy.idle_timeout_secs(),
    })
}

/// Answers a channel creation once the backend is connected.
pub fn channel_created(policy: &GatewayPolicy, channel_id: u32) -> ChannelResponse {
    ChannelResponse {
        status: StatusCode::OK,
        channel_id,
        redirect_flags: policy.redirect.flags(),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use bytes::Bytes;
    use tsgate_proto::{
        pdu::{ChannelCreate, DataPdu, TunnelCreate},
        serialize::WideString,
    };

    use super::*;

    fn one_of_each() -> Vec<Pdu> {
        vec![
            Pdu::HandshakeRequest(HandshakeRequest {
                version_major: 1,
                version_minor: 0,
                client_version: 0,
                extended_auth: ExtendedAuth::NONE,
            }),
            Pdu::TunnelCreate(TunnelCreate::new(TunnelCapabilities::NONE, None).unwrap()),
            Pdu::TunnelAuth(TunnelAuth::new(WideString::new("alice").unwrap(), None).unwrap()),
            Pdu::ChannelCreate(ChannelCreate::new(vec![], 3389, 3).unwrap()),
            Pdu::Data(DataPdu::new(Bytes::from_static(b"x")).unwrap()),
            Pdu::Keepalive,
            Pdu::TunnelResponse(tunnel_created(&GatewayPolicy::default(), TunnelId(1))),
        ]
    }

    #[test]
    fn each_state_accepts_exactly_one_pdu_type() {
        let states = [
            TunnelState::AwaitingHandshake,
            TunnelState::AwaitingTunnelCreate,
            TunnelState::AwaitingTunnelAuth,
            TunnelState::AwaitingChannelCreate,
            TunnelState::Relaying,
        ];

        for state in states {
            let accepted = one_of_each().into_iter().filter(|pdu| check_expected(state, pdu).is_ok()).count();
            let expected = match state {
                TunnelState::Relaying => 0,
                _ => 1,
            };
            assert_eq!(accepted, expected, "in state {state}");
        }
    }

    #[test]
    fn out_of_order_pdu_is_a_protocol_violation() {
        let pdu = Pdu::ChannelCreate(ChannelCreate::new(vec![], 3389, 3).unwrap());
        let rejected = check_expected(TunnelState::AwaitingTunnelAuth, &pdu).unwrap_err();

        assert!(matches!(
            rejected.error,
            GatewayError::ProtocolViolation {
                state: TunnelState::AwaitingTunnelAuth,
                got: PacketType::ChannelCreate
            }
        ));
        assert_eq!(
            rejected.reply,
            Some(Pdu::Close(CloseChannel {
                status: StatusCode::PROTOCOL_ERROR
            }))
        );
    }

    #[test]
    fn states_only_move_forward() {
        let mut state = TunnelState::AwaitingHandshake;
        state.advance(TunnelState::AwaitingTunnelCreate);
        assert_eq!(state, TunnelState::AwaitingTunnelCreate);
        assert!(TunnelState::Relaying > TunnelState::AwaitingChannelCreate);
        assert!(TunnelState::Closed > TunnelState::Closing);
    }

    #[test]
    fn handshake_negotiation() {
        let mut policy = GatewayPolicy::default();
        let mut request = HandshakeRequest {
            version_major: 1,
            version_minor: 0,
            client_version: 0,
            extended_auth: ExtendedAuth::SMART_CARD | ExtendedAuth::PAA,
        };

        let response = negotiate_handshake(&policy, &request).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.extended_auth, ExtendedAuth::NONE);

        policy.smart_card_auth = true;
        let response = negotiate_handshake(&policy, &request).unwrap();
        assert_eq!(response.extended_auth, ExtendedAuth::SMART_CARD);

        request.version_major = 2;
        let error = negotiate_handshake(&policy, &request).unwrap_err();
        assert_eq!(error.status(), StatusCode::UNSUPPORTED_VERSION);
        assert!(matches!(
            failure_reply(TunnelState::AwaitingHandshake, error.status()),
            Some(Pdu::HandshakeResponse(HandshakeResponse {
                status: StatusCode::UNSUPPORTED_VERSION,
                ..
            }))
        ));
    }

    #[test]
    fn authorization_requires_matching_identity() {
        let policy = GatewayPolicy::default();
        let identity = ClientIdentity::new("alice", IpAddr::V4(Ipv4Addr::LOCALHOST));

        let ok = TunnelAuth::new(WideString::new("alice").unwrap(), None).unwrap();
        let response = authorize(&policy, &identity, &ok).unwrap();
        assert_eq!(response.idle_timeout, 300);

        let wrong = TunnelAuth::new(WideString::new("mallory").unwrap(), None).unwrap();
        let error = authorize(&policy, &identity, &wrong).unwrap_err();
        assert_eq!(error.status(), StatusCode::AUTH_MISMATCH);
    }
}
