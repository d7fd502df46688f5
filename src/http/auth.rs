use std::net::IpAddr;

use axum::http::{header::InvalidHeaderName, HeaderMap, HeaderName};

use crate::ClientIdentity;

/// Takes the client's identity from a request header set by an authenticating proxy in front of
/// the gateway, and its address from the TCP connection.
#[derive(Debug, Clone)]
pub struct HeaderAuthenticator {
    header: HeaderName,
}

impl HeaderAuthenticator {
    pub fn new(header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::try_from(header)?,
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Returns `None` if the request carries no usable username.
    pub fn identify(&self, headers: &HeaderMap, peer: IpAddr) -> Option<ClientIdentity> {
        let username = headers.get(&self.header)?.to_str().ok()?.trim();
        match username.is_empty() {
            true => None,
            false => Some(ClientIdentity::new(username, peer.to_canonical())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn identifies_from_header() {
        let auth = HeaderAuthenticator::new("X-Forwarded-User").unwrap();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

        let mut headers = HeaderMap::new();
        assert_eq!(auth.identify(&headers, peer), None);

        headers.insert("x-forwarded-user", HeaderValue::from_static("  "));
        assert_eq!(auth.identify(&headers, peer), None);

        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        assert_eq!(auth.identify(&headers, peer), Some(ClientIdentity::new("alice", peer)));
    }

    #[test]
    fn rejects_invalid_header_names() {
        assert!(HeaderAuthenticator::new("not a header").is_err());
    }
}
