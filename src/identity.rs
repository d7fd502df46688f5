use std::{fmt, net::IpAddr};

/// The principal the HTTP layer authenticated an outbound request as.
///
/// This is attached once, when the outbound request arrives, and doesn't change for the lifetime
/// of the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub username: String,
    pub source_ip: IpAddr,
}

impl ClientIdentity {
    pub fn new<S: Into<String>>(username: S, source_ip: IpAddr) -> Self {
        Self {
            username: username.into(),
            source_ip,
        }
    }

    /// Whether a client name and address claimed inside the protocol belong to this identity.
    ///
    /// Names are compared ignoring ASCII case. A claimed address is optional, but if present it
    /// must be the address the request came from.
    pub fn matches(&self, client_name: &str, client_addr: Option<IpAddr>) -> bool {
        let name_matches = self.username.eq_ignore_ascii_case(client_name);
        let addr_matches = client_addr.map_or(true, |addr| addr.to_canonical() == self.source_ip.to_canonical());
        name_matches && addr_matches
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.source_ip)
    }
}
