//! Hands out `.rdp` files that point a client at a backend through this gateway.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use tracing::{info, warn};

use super::{AppState, PeerAddr};
use crate::{config::USERNAME_TEMPLATE_PLACEHOLDER, gateway::BackendTarget};

/// What goes into a generated `.rdp` file besides the backend and the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectSettings {
    pub gateway_address: String,
    pub network_auto_detect: u32,
    pub bandwidth_auto_detect: u32,
    pub connection_type: u32,
    pub username_template: Option<String>,
    pub split_user_domain: bool,
    pub default_domain: String,
}

impl ConnectSettings {
    /// Splits `user@domain` if configured to, falling back to the default domain.
    pub fn user_and_domain<'a>(&'a self, username: &'a str) -> (&'a str, &'a str) {
        if self.split_user_domain {
            if let Some((user, domain)) = username.split_once('@') {
                return (user, domain);
            }
        }

        (username, &self.default_domain)
    }

    /// The username written into the file. Returns `None` if the template has no placeholder.
    pub fn render_username(&self, user: &str) -> Option<String> {
        match &self.username_template {
            None => Some(user.to_string()),
            Some(template) if template.contains(USERNAME_TEMPLATE_PLACEHOLDER) => {
                Some(template.replacen(USERNAME_TEMPLATE_PLACEHOLDER, user, 1))
            }
            Some(_) => None,
        }
    }

    /// Renders the contents of an `.rdp` file.
    pub fn render(&self, backend: &BackendTarget, username: &str, domain: &str) -> String {
        let lines = [
            format!("full address:s:{backend}"),
            format!("gatewayhostname:s:{}", self.gateway_address),
            "gatewaycredentialssource:i:5".to_string(),
            "gatewayusagemethod:i:1".to_string(),
            "gatewayprofileusagemethod:i:1".to_string(),
            format!("networkautodetect:i:{}", self.network_auto_detect),
            format!("bandwidthautodetect:i:{}", self.bandwidth_auto_detect),
            format!("connection type:i:{}", self.connection_type),
            format!("username:s:{username}"),
            format!("domain:s:{domain}"),
            "bitmapcachesize:i:32000".to_string(),
            "smart sizing:i:1".to_string(),
        ];

        let mut rdp = lines.join("\r\n");
        rdp.push_str("\r\n");
        rdp
    }
}

/// `GET /connect`: picks one of the configured backends for the user and serves an `.rdp` file
/// for it. Admission is left to the tunnel.
pub async fn download(State(state): State<AppState>, Extension(PeerAddr(peer)): Extension<PeerAddr>, headers: HeaderMap) -> Response {
    let Some(identity) = state.auth.identify(&headers, peer.ip()) else {
        return (StatusCode::UNAUTHORIZED, "not authenticated").into_response();
    };

    let backend = match state.gateway.selector().pick_advertised(&identity) {
        Ok(backend) => backend,
        Err(error) => {
            warn!(user = %identity.username, peer = %identity.source_ip, %error, "no backend for .rdp download");
            return (error.http_status(), error.to_string()).into_response();
        }
    };

    let settings = &state.connect;
    let (user, domain) = settings.user_and_domain(&identity.username);
    let Some(username) = settings.render_username(user) else {
        warn!(template = ?settings.username_template, "invalid username template");
        return (StatusCode::INTERNAL_SERVER_ERROR, "invalid server configuration").into_response();
    };

    let filename = format!("{:032x}.rdp", rand::random::<u128>());
    info!(user = %identity.username, %backend, %filename, "serving .rdp file");

    let disposition = format!("attachment; filename={filename}");
    let headers = [
        (header::CONTENT_TYPE, "application/x-rdp".to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];

    (headers, settings.render(&backend, &username, domain)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectSettings {
        ConnectSettings {
            gateway_address: "gw.example.com".into(),
            network_auto_detect: 1,
            bandwidth_auto_detect: 1,
            connection_type: 6,
            username_template: Some("{{ username }}@corp".into()),
            split_user_domain: true,
            default_domain: "EXAMPLE".into(),
        }
    }

    #[test]
    fn splits_user_and_domain() {
        let mut settings = settings();
        assert_eq!(settings.user_and_domain("alice@lab"), ("alice", "lab"));
        assert_eq!(settings.user_and_domain("bob"), ("bob", "EXAMPLE"));

        settings.split_user_domain = false;
        assert_eq!(settings.user_and_domain("alice@lab"), ("alice@lab", "EXAMPLE"));
    }

    #[test]
    fn renders_username_template() {
        let mut settings = settings();
        assert_eq!(settings.render_username("alice").as_deref(), Some("alice@corp"));

        settings.username_template = Some("static".into());
        assert_eq!(settings.render_username("alice"), None);

        settings.username_template = None;
        assert_eq!(settings.render_username("alice").as_deref(), Some("alice"));
    }

    #[test]
    fn renders_rdp_file() {
        let rdp = settings().render(&BackendTarget::new("desk1.example.com", 3389), "alice@corp", "lab");

        assert!(rdp.starts_with("full address:s:desk1.example.com:3389\r\ngatewayhostname:s:gw.example.com\r\n"));
        assert!(rdp.contains("\r\nconnection type:i:6\r\n"));
        assert!(rdp.contains("\r\nusername:s:alice@corp\r\ndomain:s:lab\r\n"));
        assert!(rdp.ends_with("smart sizing:i:1\r\n"));
        assert_eq!(rdp.lines().count(), 12);
    }
}
