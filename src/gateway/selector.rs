//! Picks the backend a channel connects to, and connects to it.

use std::{
    fmt,
    io::{self, Error, ErrorKind},
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use ipnet::IpNet;
use rand::Rng;
use serde::Deserialize;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace};
use tsgate_proto::DEFAULT_RDP_PORT;

use crate::{ClientIdentity, GatewayError};

/// The placeholder in a host entry that is replaced with the client's username.
pub const USERNAME_PLACEHOLDER: &str = "{{ preferred_username }}";

/// How the host a client asks for in its channel create is taken into account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostSelection {
    /// Ignore the requested host, go round-robin through the configured hosts.
    #[default]
    RoundRobin,

    /// Honour the requested host, but only if it is one of the configured hosts.
    Unsigned,

    /// Honour any requested host. Round-robin if none is requested.
    Any,
}

/// A backend host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    pub host: String,
    pub port: u16,
}

impl BackendTarget {
    /// Parses `host[:port]`, with IPv6 addresses in brackets if a port is given. If there is no
    /// port, `default_port` is used.
    pub fn parse(s: &str, default_port: u16) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']')?;
            let port = match after {
                "" => default_port,
                _ => after.strip_prefix(':')?.parse().ok()?,
            };

            return Some(Self::new(host, port));
        }

        // A bare IPv6 address has more than one colon and no port.
        if s.parse::<IpAddr>().is_ok() {
            return Some(Self::new(s, default_port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => Some(Self::new(host, port.parse().ok()?)),
            Some(_) => None,
            None => Some(Self::new(s, default_port)),
        }
    }

    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    fn same_as(&self, other: &BackendTarget) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.contains(':') {
            true => write!(f, "[{}]:{}", self.host, self.port),
            false => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Chooses backends and enforces the client subnet admission policy.
#[derive(Debug)]
pub struct BackendSelector {
    hosts: Vec<String>,
    selection: HostSelection,
    permitted_subnet: Option<IpNet>,
    next: AtomicUsize,
    send_buffer: Option<u32>,
    receive_buffer: Option<u32>,
    dial_timeout: Duration,
}

impl BackendSelector {
    pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(hosts: Vec<String>, selection: HostSelection) -> Self {
        Self {
            hosts,
            selection,
            permitted_subnet: None,
            next: AtomicUsize::new(0),
            send_buffer: None,
            receive_buffer: None,
            dial_timeout: Self::DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Restricts which client addresses are admitted. `None` admits everyone.
    pub fn with_permitted_subnet(mut self, subnet: Option<IpNet>) -> Self {
        self.permitted_subnet = subnet;
        self
    }

    /// Sets the send and receive buffer sizes of backend sockets. Zero keeps the OS default.
    pub fn with_socket_buffers(mut self, send: u32, receive: u32) -> Self {
        self.send_buffer = (send != 0).then_some(send);
        self.receive_buffer = (receive != 0).then_some(receive);
        self
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Fails with [`GatewayError::AdmissionDenied`] if `source` is outside the permitted subnet.
    pub fn admit(&self, source: IpAddr) -> Result<(), GatewayError> {
        match self.permitted_subnet {
            Some(subnet) if !subnet.contains(&source.to_canonical()) => Err(GatewayError::admission_denied_for(source)),
            _ => Ok(()),
        }
    }

    /// Chooses the backend for a client. This does no I/O.
    ///
    /// `requested` is the host the client asked for, if any, and `port` the port it asked for,
    /// used when a host entry doesn't specify one.
    pub fn select(&self, identity: &ClientIdentity, requested: Option<&str>, port: u16) -> Result<BackendTarget, GatewayError> {
        self.admit(identity.source_ip)?;

        let port = match port {
            0 => DEFAULT_RDP_PORT,
            port => port,
        };

        let requested = requested.filter(|host| !host.trim().is_empty());
        let target = match (self.selection, requested) {
            (HostSelection::Any, Some(requested)) => BackendTarget::parse(requested, port)
                .ok_or_else(|| GatewayError::AdmissionDenied(format!("invalid requested host {requested:?}")))?,
            (HostSelection::Unsigned, Some(requested)) => self.find_configured(identity, requested, port)?,
            _ => self.next_round_robin(identity, port)?,
        };

        trace!(user = %identity.username, backend = %target, "backend selected");
        Ok(target)
    }

    /// Picks one of the configured hosts at random, for advertising to a client in a connection
    /// file. Unlike [`select`](Self::select) this neither checks admission nor moves the
    /// round-robin position of the tunnels.
    pub fn pick_advertised(&self, identity: &ClientIdentity) -> Result<BackendTarget, GatewayError> {
        if self.hosts.is_empty() {
            return Err(GatewayError::AdmissionDenied("no backend hosts are configured".into()));
        }

        let index = rand::thread_rng().gen_range(0..self.hosts.len());
        self.configured_target(identity, index, DEFAULT_RDP_PORT)
    }

    fn render(&self, identity: &ClientIdentity, entry: &str) -> String {
        entry.replace(USERNAME_PLACEHOLDER, &identity.username)
    }

    fn configured_target(&self, identity: &ClientIdentity, index: usize, port: u16) -> Result<BackendTarget, GatewayError> {
        let entry = self.render(identity, &self.hosts[index]);
        BackendTarget::parse(&entry, port).ok_or_else(|| GatewayError::BackendUnreachable {
            backend: entry.clone(),
            source: Error::new(ErrorKind::InvalidInput, "invalid host entry"),
        })
    }

    fn next_round_robin(&self, identity: &ClientIdentity, port: u16) -> Result<BackendTarget, GatewayError> {
        if self.hosts.is_empty() {
            return Err(GatewayError::AdmissionDenied("no backend hosts are configured".into()));
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        self.configured_target(identity, index, port)
    }

    fn find_configured(&self, identity: &ClientIdentity, requested: &str, port: u16) -> Result<BackendTarget, GatewayError> {
        let wanted = BackendTarget::parse(requested, port)
            .ok_or_else(|| GatewayError::AdmissionDenied(format!("invalid requested host {requested:?}")))?;

        self.hosts
            .iter()
            .filter_map(|entry| BackendTarget::parse(&self.render(identity, entry), port))
            .find(|target| target.same_as(&wanted))
            .ok_or_else(|| GatewayError::AdmissionDenied(format!("host {wanted} is not a configured backend")))
    }

    /// Connects to a backend, trying each of the addresses it resolves to, all within the dial
    /// timeout. Failures are not retried.
    pub async fn dial(&self, target: &BackendTarget) -> Result<TcpStream, GatewayError> {
        let unreachable = |source| GatewayError::BackendUnreachable {
            backend: target.to_string(),
            source,
        };

        match tokio::time::timeout(self.dial_timeout, self.connect_any(target)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(unreachable(error)),
            Err(_) => Err(unreachable(Error::new(ErrorKind::TimedOut, "connection timed out"))),
        }
    }

    async fn connect_any(&self, target: &BackendTarget) -> io::Result<TcpStream> {
        let addresses = tokio::net::lookup_host((target.host.as_str(), target.port)).await?;

        let mut last_error = None;
        for address in addresses {
            match self.connect(address).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    debug!(backend = %target, %address, %error, "backend address failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            let msg = format!("the host {target} could not be resolved to any addresses");
            Error::new(ErrorKind::InvalidInput, msg)
        }))
    }

    async fn connect(&self, address: SocketAddr) -> io::Result<TcpStream> {
        let socket = match address {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        if let Some(size) = self.send_buffer {
            socket.set_send_buffer_size(size)?;
        }

        if let Some(size) = self.receive_buffer {
            socket.set_recv_buffer_size(size)?;
        }

        let stream = socket.connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
