//! The YAML configuration file.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use ipnet::IpNet;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    gateway::{BackendSelector, BackendTarget, GatewayPolicy, HostSelection, RedirectPolicy, USERNAME_PLACEHOLDER},
    http::connect::ConnectSettings,
};

/// The default path of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "tsgate.yaml";

/// The placeholder in the username template that is replaced with the client's username.
pub const USERNAME_TEMPLATE_PLACEHOLDER: &str = "{{ username }}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("server.hosts must contain at least one host")]
    NoHosts,

    #[error("invalid host entry {0:?}")]
    InvalidHost(String),

    #[error("invalid server.listen address {0:?}")]
    InvalidListen(String),

    #[error("client.usernameTemplate {0:?} does not contain the username placeholder")]
    MissingUsernamePlaceholder(String),

    #[error("invalid server.permitClientSubnet {value:?}: {source}")]
    InvalidSubnet { value: String, source: ipnet::AddrParseError },

    #[error("tunnel.maxPayload must be between 1 and 65535, got {0}")]
    MaxPayloadOutOfRange(usize),

    #[error("server.certFile and server.keyFile must be given together")]
    IncompleteCertificate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSettings,
    pub caps: CapsSettings,
    pub client: ClientSettings,
    pub tunnel: TunnelSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ServerSettings {
    /// The address, or `domainname:port`, to listen on.
    pub listen: String,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,

    /// Serve plain HTTP, for running behind a proxy that terminates TLS.
    pub disable_tls: bool,

    /// The name clients reach the gateway by.
    pub gateway_address: String,
    pub hosts: Vec<String>,
    pub host_selection: HostSelection,
    pub permit_client_subnet: Option<String>,
    pub send_buf: u32,
    pub receive_buf: u32,

    /// The request header carrying the name of the authenticated user.
    pub identity_header: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:443".into(),
            cert_file: None,
            key_file: None,
            disable_tls: false,
            gateway_address: "localhost".into(),
            hosts: Vec::new(),
            host_selection: HostSelection::default(),
            permit_client_subnet: None,
            send_buf: 0,
            receive_buf: 0,
            identity_header: "X-Forwarded-User".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CapsSettings {
    pub smart_card_auth: bool,

    /// In seconds. Zero disables the idle timeout.
    pub idle_timeout: u64,
    pub redirect_all: bool,
    pub disable_redirect: bool,
    pub enable_clipboard: bool,
    pub enable_printer: bool,
    pub enable_port: bool,
    pub enable_pnp: bool,
    pub enable_drive: bool,
}

impl Default for CapsSettings {
    fn default() -> Self {
        Self {
            smart_card_auth: false,
            idle_timeout: GatewayPolicy::DEFAULT_IDLE_TIMEOUT.as_secs(),
            redirect_all: false,
            disable_redirect: false,
            enable_clipboard: false,
            enable_printer: false,
            enable_port: false,
            enable_pnp: false,
            enable_drive: false,
        }
    }
}

/// Settings written into the `.rdp` files handed out to clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ClientSettings {
    pub network_auto_detect: u32,
    pub bandwidth_auto_detect: u32,
    pub connection_type: u32,
    pub username_template: String,
    pub split_user_domain: bool,
    pub default_domain: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            network_auto_detect: 1,
            bandwidth_auto_detect: 1,
            connection_type: 0,
            username_template: String::new(),
            split_user_domain: false,
            default_domain: String::new(),
        }
    }
}

/// Timeouts are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TunnelSettings {
    pub keepalive_interval: u64,
    pub pairing_timeout: u64,
    pub handshake_timeout: u64,
    pub dial_timeout: u64,
    pub max_payload: usize,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: GatewayPolicy::DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
            pairing_timeout: GatewayPolicy::DEFAULT_PAIRING_TIMEOUT.as_secs(),
            handshake_timeout: GatewayPolicy::DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
            dial_timeout: BackendSelector::DEFAULT_DIAL_TIMEOUT.as_secs(),
            max_payload: GatewayPolicy::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&yaml)
    }

    /// Parses and validates a configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }

        for host in &server.hosts {
            let rendered = host.replace(USERNAME_PLACEHOLDER, "user");
            if BackendTarget::parse(&rendered, tsgate_proto::DEFAULT_RDP_PORT).is_none() {
                return Err(ConfigError::InvalidHost(host.clone()));
            }
        }

        if server.listen.trim().is_empty() || !server.listen.contains(':') {
            return Err(ConfigError::InvalidListen(server.listen.clone()));
        }

        self.permitted_subnet()?;

        if server.cert_file.is_some() != server.key_file.is_some() {
            return Err(ConfigError::IncompleteCertificate);
        }

        let template = &self.client.username_template;
        if !template.is_empty() && !template.contains(USERNAME_TEMPLATE_PLACEHOLDER) {
            return Err(ConfigError::MissingUsernamePlaceholder(template.clone()));
        }

        if !(1..=usize::from(u16::MAX)).contains(&self.tunnel.max_payload) {
            return Err(ConfigError::MaxPayloadOutOfRange(self.tunnel.max_payload));
        }

        Ok(())
    }

    fn permitted_subnet(&self) -> Result<Option<IpNet>, ConfigError> {
        match self.server.permit_client_subnet.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|source| ConfigError::InvalidSubnet {
                value: value.to_string(),
                source,
            }),
        }
    }

    pub fn gateway_policy(&self) -> GatewayPolicy {
        let caps = &self.caps;
        let idle_timeout = match caps.idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        GatewayPolicy {
            smart_card_auth: caps.smart_card_auth,
            idle_timeout,
            redirect: RedirectPolicy {
                disable_all: caps.disable_redirect,
                enable_all: caps.redirect_all,
                clipboard: caps.enable_clipboard,
                drive: caps.enable_drive,
                printer: caps.enable_printer,
                port: caps.enable_port,
                pnp: caps.enable_pnp,
            },
            keepalive_interval: Duration::from_secs(self.tunnel.keepalive_interval),
            pairing_timeout: Duration::from_secs(self.tunnel.pairing_timeout),
            handshake_timeout: Duration::from_secs(self.tunnel.handshake_timeout),
            max_payload: self.tunnel.max_payload,
        }
    }

    pub fn backend_selector(&self) -> Result<BackendSelector, ConfigError> {
        let server = &self.server;
        let selector = BackendSelector::new(server.hosts.clone(), server.host_selection)
            .with_permitted_subnet(self.permitted_subnet()?)
            .with_socket_buffers(server.send_buf, server.receive_buf)
            .with_dial_timeout(Duration::from_secs(self.tunnel.dial_timeout));

        Ok(selector)
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        let client = &self.client;
        ConnectSettings {
            gateway_address: self.server.gateway_address.clone(),
            network_auto_detect: client.network_auto_detect,
            bandwidth_auto_detect: client.bandwidth_auto_detect,
            connection_type: client.connection_type,
            username_template: (!client.username_template.is_empty()).then(|| client.username_template.clone()),
            split_user_domain: client.split_user_domain,
            default_domain: client.default_domain.clone(),
        }
    }
}
