//! The gateway protocol engine.
//!
//! A [`Gateway`] is constructed once and shared by every request handler. Each HTTP request of
//! the gateway protocol turns into one [`GatewayRequest`] passed to [`Gateway::handle`]:
//!
//! * An outbound request runs the whole tunnel: the control phase on its request body and
//!   response, then the relay once its inbound request is paired and the backend connected.
//! * An inbound request hands its body over to the tunnel it names, then waits for that tunnel to
//!   close.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use tsgate_proto::{pdu::MAX_PACKET_LENGTH, MalformedPdu, PduReader, TunnelId};

mod policy;
mod registry;
mod relay;
mod selector;
pub mod state;
mod tunnel;

pub use policy::*;
pub use registry::*;
pub use selector::*;
pub use state::TunnelState;
pub use tunnel::{ActivityClock, CloseReason};

use crate::{ClientIdentity, GatewayError};
use tunnel::Tunnel;

/// A readable byte stream bound to an HTTP request body.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A writable byte stream bound to an HTTP response body.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One HTTP request of the gateway protocol, as handed to the gateway by the HTTP layer.
pub enum GatewayRequest {
    /// The first request of a tunnel. Its body carries the client's control PDUs and its
    /// response carries everything the gateway sends.
    Outbound {
        identity: ClientIdentity,
        control: BoxedReader,
        response: BoxedWriter,
    },

    /// The second request of a tunnel, carrying data from the client. The tunnel ID comes from a
    /// request header if present, otherwise it is the first 16 bytes of the body.
    Inbound {
        tunnel_id: Option<TunnelId>,
        body: BoxedReader,
    },
}

struct GatewayInner {
    policy: GatewayPolicy,
    registry: TunnelRegistry,
    selector: BackendSelector,
}

/// The gateway: the tunnel registry plus the policy applied to every tunnel.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(policy: GatewayPolicy, selector: BackendSelector) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                policy,
                registry: TunnelRegistry::new(),
                selector,
            }),
        }
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.inner.policy
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.inner.registry
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.inner.selector
    }

    /// Handles one request, returning once the tunnel it belongs to is closed (or the request is
    /// rejected).
    pub async fn handle(&self, request: GatewayRequest) -> Result<CloseReason, GatewayError> {
        match request {
            GatewayRequest::Outbound {
                identity,
                control,
                response,
            } => self.serve_outbound(identity, control, response).await,
            GatewayRequest::Inbound { tunnel_id, body } => self.serve_inbound(tunnel_id, body).await,
        }
    }

    /// Runs a tunnel for an outbound request.
    ///
    /// A failure before relaying is reported to the client in a response PDU, then returned here.
    /// Once relaying, the tunnel always ends with `Ok` and the reason it closed.
    pub async fn serve_outbound(
        &self,
        identity: ClientIdentity,
        control: BoxedReader,
        response: BoxedWriter,
    ) -> Result<CloseReason, GatewayError> {
        debug!(user = %identity.username, peer = %identity.source_ip, "outbound request");
        Tunnel::new(self.clone(), identity, control, response).run().await
    }

    /// Pairs an inbound request with its tunnel and holds it until the tunnel closes.
    pub async fn serve_inbound(&self, tunnel_id: Option<TunnelId>, body: BoxedReader) -> Result<CloseReason, GatewayError> {
        let mut reader = PduReader::with_buffer(body, bytes::BytesMut::with_capacity(MAX_PACKET_LENGTH));

        let id = match tunnel_id {
            Some(id) => id,
            None => {
                let read = tokio::time::timeout(self.policy().handshake_timeout, reader.read_array::<{ TunnelId::LENGTH }>());
                match read.await {
                    Ok(Ok(bytes)) => TunnelId::from_bytes(bytes),
                    Ok(Err(_)) => return Err(MalformedPdu::InvalidField("tunnel ID").into()),
                    Err(_) => return Err(GatewayError::HandshakeTimeout),
                }
            }
        };

        let lease = match self.registry().pair(id, reader, self.policy().pairing_timeout).await {
            Ok(lease) => lease,
            Err(error) => {
                warn!(tunnel = %id, %error, "inbound request rejected");
                return Err(error);
            }
        };

        info!(tunnel = %lease.id(), "inbound stream attached");
        Ok(lease.closed().await)
    }
}
