use std::{io, net::SocketAddr};

use axum::{Extension, Router};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::PeerAddr;
use crate::utils::accept_from_any;

/// Accepts connections on all the listeners and serves each one on its own task, until Ctrl-C is
/// pressed. Connections already being served are not interrupted.
pub async fn serve(listeners: Vec<TcpListener>, router: Router, tls: Option<TlsAcceptor>) -> io::Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (index, accept_result) = tokio::select! {
            result = accept_from_any(&listeners) => result,
            result = &mut shutdown => {
                result?;
                info!("Ctrl-C received, no longer accepting connections");
                return Ok(());
            }
        };

        let (stream, peer) = match accept_result {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(listener = index, "error while accepting connection: {error}");
                continue;
            }
        };

        if let Err(error) = stream.set_nodelay(true) {
            debug!(%peer, "could not set TCP_NODELAY: {error}");
        }

        let app = router.clone().layer(Extension(PeerAddr(peer)));
        let tls = tls.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, app, tls).await;
            debug!(%peer, "connection finished");
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: Router, tls: Option<TlsAcceptor>) {
    debug!(%peer, "incoming connection");

    match tls {
        None => serve_http(stream, peer, app).await,
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_http(stream, peer, app).await,
            Err(error) => debug!(%peer, "TLS handshake failed: {error}"),
        },
    }
}

async fn serve_http<S>(stream: S, peer: SocketAddr, app: Router)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let result = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app))
        .await;

    if let Err(error) = result {
        debug!(%peer, "HTTP connection error: {error}");
    }
}
