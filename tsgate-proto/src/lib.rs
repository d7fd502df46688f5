//! This crate describes the gateway protocol used to carry a remote desktop connection over two
//! long-lived HTTP requests.
//!
//! A client reaches the gateway with two independent requests. The first, the outbound request,
//! carries the client's control PDUs in its request body and receives the gateway's PDUs in its
//! response body. The second, the inbound request, carries [`Data`](pdu::DataPdu) PDUs from the
//! client towards the backend. Both requests are tied together by the [`TunnelId`] the gateway
//! hands out in its [`TunnelResponse`](pdu::TunnelResponse).
//!
//! # Packet framing
//! Every PDU starts with an 8-byte header: the packet type as an `u16`, a reserved `u16` which is
//! always written as zero, and the total packet length (header included) as an `u32`. All numeric
//! fields in the protocol are little-endian. The body layout is fixed for each packet type, so the
//! length is only used to frame packets and to reject trailing or missing bytes.
//!
//! # Control phase
//! On the outbound request the client first sends a [`HandshakeRequest`](pdu::HandshakeRequest),
//! then a [`TunnelCreate`](pdu::TunnelCreate), a [`TunnelAuth`](pdu::TunnelAuth) and finally a
//! [`ChannelCreate`](pdu::ChannelCreate). The gateway answers each of them, in order, with the
//! matching response PDU. Any response carrying a status other than [`StatusCode::OK`] is the last
//! thing the gateway sends before closing the tunnel.
//!
//! # Inbound request
//! The inbound request starts with the 16 bytes of the tunnel ID (unless the ID was given in a
//! request header), followed by a sequence of PDUs, normally [`Data`](pdu::DataPdu) PDUs, until
//! the client sends a [`CloseChannel`](pdu::CloseChannel) or ends the request.
//!
//! # Relaying
//! Once the channel is created, backend bytes flow to the client as Data PDUs on the outbound
//! response, interleaved with [`Keepalive`](pdu::Pdu::Keepalive) PDUs when the connection is
//! otherwise quiet. Either side ends the tunnel with a CloseChannel PDU.

pub mod error;
pub mod flags;
pub mod io;
pub mod pdu;
pub mod serialize;
pub mod status;
pub mod tunnel_id;

pub use error::*;
pub use flags::*;
pub use io::*;
pub use status::*;
pub use tunnel_id::*;

/// The major version of the protocol. Handshakes asking for any other major version are refused.
pub const PROTOCOL_VERSION_MAJOR: u8 = 1;

/// The minor version of the protocol.
pub const PROTOCOL_VERSION_MINOR: u8 = 0;

/// The version number the gateway reports for itself in handshake and tunnel responses.
pub const SERVER_VERSION: u16 = 1;

/// The protocol identifier for RDP, as sent in a [`ChannelCreate`](pdu::ChannelCreate).
pub const PROTOCOL_RDP: u16 = 3;

/// The port used for a backend when neither the host entry nor the client specify one.
pub const DEFAULT_RDP_PORT: u16 = 3389;
