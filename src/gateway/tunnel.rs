use std::{fmt, io, sync::Mutex, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};
use tsgate_proto::{
    pdu::{ChannelCreate, CloseChannel, HandshakeRequest, PacketType, Pdu, TunnelAuth, TunnelCreate},
    ExtendedAuth, PduReader, ReadError, StatusCode, TunnelCapabilities, TunnelId,
};

use super::{
    relay::{self, RelayEnds},
    state::{self, Rejected, TunnelState},
    BackendTarget, BoxedReader, BoxedWriter, Gateway, PairedInbound, PairingWaiter,
};
use crate::{ClientIdentity, GatewayError};

/// How long the gateway keeps trying to deliver its last PDU to a closing tunnel.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Why a tunnel closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close PDU.
    ClientClosed,

    /// The outbound response can no longer be written to.
    OutboundEnded,

    /// The inbound request body ended.
    InboundEnded,

    /// The backend closed its connection.
    BackendEnded,

    /// No traffic went through the tunnel for the idle timeout.
    IdleTimeout,

    /// The client sent a PDU that isn't allowed while relaying.
    ProtocolViolation,

    /// One of the streams failed.
    StreamError(io::ErrorKind),

    /// The tunnel was rejected before relaying, with this status.
    Rejected(StatusCode),

    /// The tunnel went away without saying why.
    Aborted,
}

impl CloseReason {
    /// The status sent to the client in the final close PDU.
    pub fn status(self) -> StatusCode {
        match self {
            Self::ClientClosed | Self::OutboundEnded | Self::InboundEnded | Self::BackendEnded => StatusCode::OK,
            Self::IdleTimeout => StatusCode::SESSION_TIMEOUT,
            Self::ProtocolViolation => StatusCode::PROTOCOL_ERROR,
            Self::StreamError(_) | Self::Aborted => StatusCode::CONNECTION_ABORTED,
            Self::Rejected(status) => status,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "closed by client"),
            Self::OutboundEnded => write!(f, "outbound stream ended"),
            Self::InboundEnded => write!(f, "inbound stream ended"),
            Self::BackendEnded => write!(f, "backend closed the connection"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::ProtocolViolation => write!(f, "protocol violation"),
            Self::StreamError(kind) => write!(f, "stream error: {kind}"),
            Self::Rejected(status) => write!(f, "rejected: {status}"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl From<ReadError> for CloseReason {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::Malformed(_) => Self::ProtocolViolation,
            ReadError::UnexpectedEof => Self::StreamError(io::ErrorKind::UnexpectedEof),
            ReadError::Io(error) => Self::StreamError(error.kind()),
        }
    }
}

struct Activity {
    last: Instant,
    sent: u64,
    received: u64,
}

/// Tracks when a tunnel last moved data, and how much it moved in each direction.
///
/// Both directions of the relay record into the same clock, one at a time.
pub struct ActivityClock {
    inner: Mutex<Activity>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Activity {
                last: Instant::now(),
                sent: 0,
                received: 0,
            }),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut Activity) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Records bytes sent from the backend to the client.
    pub fn record_sent(&self, bytes: usize) {
        self.update(|activity| {
            activity.last = Instant::now();
            activity.sent += bytes as u64;
        })
    }

    /// Records bytes sent from the client to the backend.
    pub fn record_received(&self, bytes: usize) {
        self.update(|activity| {
            activity.last = Instant::now();
            activity.received += bytes as u64;
        })
    }

    pub fn last_activity(&self) -> Instant {
        self.update(|activity| activity.last)
    }

    /// The bytes sent to the client and received from it so far.
    pub fn totals(&self) -> (u64, u64) {
        self.update(|activity| (activity.sent, activity.received))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of the control phase when it doesn't fail.
enum ControlEnd {
    /// The channel is open, relaying starts.
    Established { backend: TcpStream, target: BackendTarget },

    /// The client closed the tunnel before opening a channel.
    ClientClosed,
}

/// One tunnel, driven by its outbound request from the first handshake until it closes.
pub(crate) struct Tunnel {
    id: TunnelId,
    state: TunnelState,
    gateway: Gateway,
    identity: ClientIdentity,
    extended_auth: ExtendedAuth,
    capabilities: TunnelCapabilities,
    created_at: Instant,
    control: PduReader<BoxedReader>,
    out: BoxedWriter,
    pairing: Option<PairingWaiter>,
    inbound: Option<PairedInbound>,
}

impl Tunnel {
    pub fn new(gateway: Gateway, identity: ClientIdentity, control: BoxedReader, out: BoxedWriter) -> Self {
        Self {
            id: TunnelId(rand::random()),
            state: TunnelState::AwaitingHandshake,
            gateway,
            identity,
            extended_auth: ExtendedAuth::NONE,
            capabilities: TunnelCapabilities::NONE,
            created_at: Instant::now(),
            control: PduReader::new(control),
            out,
            pairing: None,
            inbound: None,
        }
    }

    pub async fn run(mut self) -> Result<CloseReason, GatewayError> {
        match self.run_control().await {
            Ok(ControlEnd::Established { backend, target }) => Ok(self.relay(backend, target).await),
            Ok(ControlEnd::ClientClosed) => {
                info!(tunnel = %self.id, user = %self.identity.username, "tunnel closed by client before relaying");
                self.finish(Some(Pdu::Close(CloseChannel { status: StatusCode::OK })), CloseReason::ClientClosed)
                    .await;
                Ok(CloseReason::ClientClosed)
            }
            Err(rejected) => {
                warn!(
                    tunnel = %self.id,
                    user = %self.identity.username,
                    state = %self.state,
                    error = %rejected.error,
                    "tunnel rejected"
                );
                let reason = CloseReason::Rejected(rejected.error.status());
                self.finish(rejected.reply, reason).await;
                Err(rejected.error)
            }
        }
    }

    /// Reads the next control PDU, bounded by the handshake timeout.
    async fn next_control_pdu(&mut self) -> Result<Pdu, Rejected> {
        match timeout(self.gateway.policy().handshake_timeout, self.control.read_pdu()).await {
            Ok(Ok(Some(pdu))) => Ok(pdu),
            Ok(Ok(None)) => Err(Rejected::silent(io::Error::from(io::ErrorKind::UnexpectedEof).into())),
            Ok(Err(ReadError::Malformed(malformed))) => Err(Rejected::close(malformed.into())),
            Ok(Err(error)) => Err(Rejected::silent(error.into())),
            Err(_) => Err(Rejected::close(GatewayError::HandshakeTimeout)),
        }
    }

    async fn send(&mut self, pdu: Pdu) -> Result<(), Rejected> {
        debug!(tunnel = %self.id, pdu = %pdu, "sending control PDU");
        pdu.write(&mut self.out).await.map_err(|error| Rejected::silent(error.into()))
    }

    async fn run_control(&mut self) -> Result<ControlEnd, Rejected> {
        loop {
            let pdu = self.next_control_pdu().await?;
            debug!(tunnel = %self.id, state = %self.state, pdu = %pdu, "received control PDU");

            if let Pdu::Close(close) = &pdu {
                debug!(tunnel = %self.id, status = %close.status, "client closed during control phase");
                return Ok(ControlEnd::ClientClosed);
            }

            state::check_expected(self.state, &pdu)?;
            let reply = match pdu {
                Pdu::HandshakeRequest(request) => self.on_handshake(&request)?,
                Pdu::TunnelCreate(request) => self.on_tunnel_create(&request)?,
                Pdu::TunnelAuth(request) => self.on_tunnel_auth(&request)?,
                Pdu::ChannelCreate(request) => return self.on_channel_create(&request).await,
                other => {
                    return Err(Rejected::close(GatewayError::ProtocolViolation {
                        state: self.state,
                        got: other.packet_type(),
                    }))
                }
            };

            self.send(reply).await?;
        }
    }

    fn on_handshake(&mut self, request: &HandshakeRequest) -> Result<Pdu, Rejected> {
        let policy = self.gateway.policy();
        let response = state::negotiate_handshake(policy, request).map_err(|error| Rejected::reply(self.state, error))?;

        self.extended_auth = response.extended_auth;
        self.state.advance(TunnelState::AwaitingTunnelCreate);
        Ok(Pdu::HandshakeResponse(response))
    }

    fn on_tunnel_create(&mut self, request: &TunnelCreate) -> Result<Pdu, Rejected> {
        let registry = self.gateway.registry();
        let pairing_deadline = Instant::now() + self.gateway.policy().pairing_timeout;
        let waiter = loop {
            match registry.register(self.id, pairing_deadline) {
                Ok(waiter) => break waiter,
                Err(GatewayError::DuplicateId(id)) => {
                    debug!(tunnel = %id, "tunnel ID already taken, generating another one");
                    self.id = TunnelId(rand::random());
                }
                Err(error) => return Err(Rejected::reply(self.state, error)),
            }
        };

        self.pairing = Some(waiter);
        self.capabilities = self.gateway.policy().server_capabilities();
        self.state.advance(TunnelState::AwaitingTunnelAuth);

        info!(
            tunnel = %self.id,
            user = %self.identity.username,
            peer = %self.identity.source_ip,
            client_capabilities = ?request.capabilities,
            "tunnel registered"
        );

        Ok(Pdu::TunnelResponse(state::tunnel_created(self.gateway.policy(), self.id)))
    }

    fn on_tunnel_auth(&mut self, request: &TunnelAuth) -> Result<Pdu, Rejected> {
        let response = state::authorize(self.gateway.policy(), &self.identity, request)
            .map_err(|error| Rejected::reply(self.state, error))?;

        self.state.advance(TunnelState::AwaitingChannelCreate);
        debug!(tunnel = %self.id, user = %self.identity.username, "tunnel authorized");
        Ok(Pdu::TunnelAuthResponse(response))
    }

    /// Opens the channel: choose the backend, wait for the inbound stream, dial, then answer.
    async fn on_channel_create(&mut self, request: &ChannelCreate) -> Result<ControlEnd, Rejected> {
        let state = self.state;
        let requested = request.resources().first().map(|resource| resource.as_str());
        let target = self
            .gateway
            .selector()
            .select(&self.identity, requested, request.port())
            .map_err(|error| Rejected::reply(state, error))?;

        let Some(waiter) = self.pairing.take() else {
            return Err(Rejected::close(GatewayError::ProtocolViolation {
                state,
                got: PacketType::ChannelCreate,
            }));
        };

        let inbound = waiter.wait().await.map_err(|error| Rejected::reply(state, error))?;
        self.inbound = Some(inbound);

        let backend = self
            .gateway
            .selector()
            .dial(&target)
            .await
            .map_err(|error| Rejected::reply(state, error))?;

        let response = state::channel_created(self.gateway.policy(), 1);
        self.send(Pdu::ChannelResponse(response)).await?;
        self.state.advance(TunnelState::Relaying);

        info!(
            tunnel = %self.id,
            user = %self.identity.username,
            backend = %target,
            extended_auth = ?self.extended_auth,
            capabilities = ?self.capabilities,
            "channel open, relaying"
        );

        Ok(ControlEnd::Established { backend, target })
    }

    async fn relay(mut self, backend: TcpStream, target: BackendTarget) -> CloseReason {
        let Some(inbound) = self.inbound.take() else {
            self.finish(None, CloseReason::Aborted).await;
            return CloseReason::Aborted;
        };

        let (inbound_reader, release) = inbound.into_parts();
        let activity = ActivityClock::new();
        let ends = RelayEnds {
            out: &mut self.out,
            control: &mut self.control,
            inbound: inbound_reader,
            backend,
        };

        let (reason, mut backend, inbound_reader) = relay::run(ends, self.gateway.policy(), &activity).await;
        self.state.advance(TunnelState::Closing);

        let close = Pdu::Close(CloseChannel { status: reason.status() });
        if reason != CloseReason::OutboundEnded {
            let _ = timeout(CLOSE_GRACE, close.write(&mut self.out)).await;
        }
        let _ = timeout(CLOSE_GRACE, self.out.shutdown()).await;
        let _ = backend.shutdown().await;
        drop(backend);
        drop(inbound_reader);
        release.release(reason);
        self.gateway.registry().remove(self.id);
        self.state.advance(TunnelState::Closed);

        let (sent, received) = activity.totals();
        info!(
            tunnel = %self.id,
            user = %self.identity.username,
            backend = %target,
            %reason,
            sent,
            received,
            duration = ?self.created_at.elapsed(),
            "tunnel closed"
        );

        reason
    }

    /// Closes a tunnel that never reached relaying.
    async fn finish(&mut self, reply: Option<Pdu>, reason: CloseReason) {
        if let Some(reply) = reply {
            debug!(tunnel = %self.id, pdu = %reply, "sending final PDU");
            let _ = timeout(CLOSE_GRACE, reply.write(&mut self.out)).await;
        }

        let _ = timeout(CLOSE_GRACE, self.out.shutdown()).await;
        if let Some(inbound) = self.inbound.take() {
            inbound.release(reason);
        }

        self.pairing = None;
        self.gateway.registry().remove(self.id);
        self.state.advance(TunnelState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_statuses() {
        assert_eq!(CloseReason::BackendEnded.status(), StatusCode::OK);
        assert_eq!(CloseReason::IdleTimeout.status(), StatusCode::SESSION_TIMEOUT);
        assert_eq!(CloseReason::ProtocolViolation.status(), StatusCode::PROTOCOL_ERROR);
        assert_eq!(
            CloseReason::Rejected(StatusCode::AUTH_MISMATCH).status(),
            StatusCode::AUTH_MISMATCH
        );
    }

    #[tokio::test]
    async fn activity_clock_counts_both_directions() {
        let clock = ActivityClock::new();
        let before = clock.last_activity();
        tokio::time::sleep(Duration::from_millis(5)).await;

        clock.record_sent(10);
        clock.record_received(3);
        clock.record_sent(5);

        assert_eq!(clock.totals(), (15, 3));
        assert!(clock.last_activity() > before);
    }
}
