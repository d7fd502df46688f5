//! The HTTP front-end: routes gateway requests to the [`Gateway`] and serves `.rdp` files.
//!
//! Both requests of a tunnel go to [`GATEWAY_PATH`] and are told apart by their method:
//! [`OUT_DATA_METHOD`] opens a tunnel, [`IN_DATA_METHOD`] brings its client-to-backend stream.

use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};
use tsgate_proto::TunnelId;

use crate::{
    gateway::{BoxedReader, BoxedWriter},
    Gateway, GatewayRequest,
};

pub mod auth;
pub mod connect;
mod server;
pub mod tls;

pub use server::serve;

use auth::HeaderAuthenticator;
use connect::ConnectSettings;

pub const GATEWAY_PATH: &str = "/remoteDesktopGateway/";
pub const CONNECT_PATH: &str = "/connect";
pub const OUT_DATA_METHOD: &str = "RDG_OUT_DATA";
pub const IN_DATA_METHOD: &str = "RDG_IN_DATA";

/// The request header that may carry the tunnel ID of an inbound request, in unpadded URL-safe
/// base64.
pub const TUNNEL_ID_HEADER: &str = "RDG-Tunnel-Id";

/// How much of the outbound response may be buffered before the tunnel waits for the client.
const OUTBOUND_BUFFER_SIZE: usize = 64 * 1024;

/// The address of the TCP peer of the connection a request came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub auth: Arc<HeaderAuthenticator>,
    pub connect: Arc<ConnectSettings>,
}

impl AppState {
    pub fn new(gateway: Gateway, auth: HeaderAuthenticator, connect: ConnectSettings) -> Self {
        Self {
            gateway,
            auth: Arc::new(auth),
            connect: Arc::new(connect),
        }
    }
}

/// Builds the router. Every connection must add a [`PeerAddr`] extension before serving it.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(GATEWAY_PATH, any(gateway_request))
        .route(CONNECT_PATH, get(connect::download))
        .with_state(state)
}

pub fn encode_tunnel_id(id: TunnelId) -> String {
    URL_SAFE_NO_PAD.encode(id.to_bytes())
}

pub fn decode_tunnel_id(value: &[u8]) -> Option<TunnelId> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    let bytes: [u8; TunnelId::LENGTH] = bytes.try_into().ok()?;
    Some(TunnelId::from_bytes(bytes))
}

fn body_reader(body: Body) -> BoxedReader {
    Box::new(StreamReader::new(body.into_data_stream().map_err(io::Error::other)))
}

async fn gateway_request(State(state): State<AppState>, Extension(PeerAddr(peer)): Extension<PeerAddr>, request: Request) -> Response {
    match request.method().as_str() {
        OUT_DATA_METHOD => outbound(state, peer, request),
        IN_DATA_METHOD => inbound(state, peer, request).await,
        method => {
            debug!(%peer, method, "unsupported gateway method");
            let allow = HeaderValue::from_static("RDG_OUT_DATA, RDG_IN_DATA");
            (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, allow)]).into_response()
        }
    }
}

/// Starts a tunnel on its own task. The response streams everything the tunnel writes.
fn outbound(state: AppState, peer: SocketAddr, request: Request) -> Response {
    let Some(identity) = state.auth.identify(request.headers(), peer.ip()) else {
        warn!(%peer, header = %state.auth.header(), "outbound request without an identity");
        return (StatusCode::UNAUTHORIZED, "not authenticated").into_response();
    };

    let (writer, reader) = tokio::io::duplex(OUTBOUND_BUFFER_SIZE);
    let response: BoxedWriter = Box::new(writer);
    let control = body_reader(request.into_body());

    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        let user = identity.username.clone();
        let request = GatewayRequest::Outbound {
            identity,
            control,
            response,
        };

        match gateway.handle(request).await {
            Ok(reason) => debug!(%peer, %user, %reason, "outbound request finished"),
            Err(error) => debug!(%peer, %user, %error, "outbound request failed"),
        }
    });

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream"),
        (header::CACHE_CONTROL, "no-cache"),
    ];

    (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(reader))).into_response()
}

/// Hands the request body to its tunnel, answering once the tunnel closes.
async fn inbound(state: AppState, peer: SocketAddr, request: Request) -> Response {
    let tunnel_id = match request.headers().get(TUNNEL_ID_HEADER) {
        None => None,
        Some(value) => match decode_tunnel_id(value.as_bytes()) {
            Some(id) => Some(id),
            None => {
                warn!(%peer, "invalid {TUNNEL_ID_HEADER} header");
                return (StatusCode::BAD_REQUEST, "invalid tunnel ID").into_response();
            }
        },
    };

    let body = body_reader(request.into_body());
    match state.gateway.handle(GatewayRequest::Inbound { tunnel_id, body }).await {
        Ok(reason) => {
            info!(%peer, %reason, "inbound request finished");
            (StatusCode::OK, reason.to_string()).into_response()
        }
        Err(error) => (error.http_status(), error.to_string()).into_response(),
    }
}
