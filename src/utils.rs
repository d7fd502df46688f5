use std::{
    future::poll_fn,
    io::{self, Error, ErrorKind},
    net::SocketAddr,
    task::Poll,
};

use tokio::net::{TcpListener, TcpStream};

/// Accepts from any [`TcpListener`], returning the index and the accept result of the first
/// listener to accept something.
///
/// This function never returns an [`ErrorKind::WouldBlock`] error.
pub async fn accept_from_any(listeners: &[TcpListener]) -> (usize, io::Result<(TcpStream, SocketAddr)>) {
    loop {
        let (index, result) = poll_fn(|cx| {
            for (index, listener) in listeners.iter().enumerate() {
                if let Poll::Ready(result) = listener.poll_accept(cx) {
                    return Poll::Ready((index, result));
                }
            }

            Poll::Pending
        })
        .await;

        if !result.as_ref().is_err_and(|error| error.kind() == ErrorKind::WouldBlock) {
            return (index, result);
        }
    }
}

/// Binds a listener on `address`, which is either a socket address or `domainname:port`. A
/// domainname gets one listener for each address it resolves to that could be bound.
pub async fn bind_listeners(address: &str) -> io::Result<Vec<TcpListener>> {
    if let Ok(address) = address.parse::<SocketAddr>() {
        return Ok(vec![TcpListener::bind(address).await?]);
    }

    let addresses = tokio::net::lookup_host(address).await?;

    let mut listeners = Vec::new();
    let mut last_error = None;

    for address in addresses {
        let bind_result = TcpListener::bind(address).await;
        match bind_result {
            Ok(listener) => listeners.push(listener),
            Err(error) => last_error = Some(error),
        }
    }

    if listeners.is_empty() {
        Err(last_error.unwrap_or_else(|| {
            let msg = format!("The domainname \"{address}\" could not be resolved to any addresses");
            Error::new(ErrorKind::InvalidInput, msg)
        }))
    } else {
        Ok(listeners)
    }
}
