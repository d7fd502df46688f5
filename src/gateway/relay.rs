//! Moves bytes between the client and the backend once a channel is open.
//!
//! Four tasks run together until the first one finishes, and the reason it gives closes the
//! tunnel. The caller then does the shutdown, so there is exactly one place where a tunnel's
//! streams are closed.

use std::{future::pending, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace, warn};
use tsgate_proto::{
    pdu::{DataPdu, Pdu},
    PduReader, ReadError,
};

use super::{ActivityClock, BoxedReader, BoxedWriter, CloseReason, GatewayPolicy};

/// The streams of a tunnel that is relaying.
pub(crate) struct RelayEnds<'a> {
    /// The outbound response, where backend data goes as Data PDUs.
    pub out: &'a mut BoxedWriter,

    /// The outbound request body, watched for a close PDU.
    pub control: &'a mut PduReader<BoxedReader>,

    /// The inbound request body, carrying client data.
    pub inbound: PduReader<BoxedReader>,

    pub backend: TcpStream,
}

/// Relays until something ends the tunnel. Returns why, and gives back the streams that need
/// shutting down.
pub(crate) async fn run(
    ends: RelayEnds<'_>,
    policy: &GatewayPolicy,
    activity: &ActivityClock,
) -> (CloseReason, TcpStream, PduReader<BoxedReader>) {
    let RelayEnds {
        out,
        control,
        mut inbound,
        mut backend,
    } = ends;

    let reason = {
        let (mut backend_read, mut backend_write) = backend.split();

        tokio::select! {
            reason = backend_to_client(&mut backend_read, out, policy, activity) => reason,
            reason = client_to_backend(&mut inbound, &mut backend_write, activity) => reason,
            reason = watch_control(control) => reason,
            reason = watch_idle(policy.idle_timeout, activity) => reason,
        }
    };

    debug!(%reason, "relay finished");
    (reason, backend, inbound)
}

/// Reads from the backend and sends what it reads as Data PDUs, sending a keepalive whenever
/// nothing was sent for the keepalive interval.
async fn backend_to_client<R, W>(backend: &mut R, out: &mut W, policy: &GatewayPolicy, activity: &ActivityClock) -> CloseReason
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; policy.chunk_size()];
    let keepalive = keepalive_interval(policy.keepalive_interval);
    let mut next_keepalive = Instant::now() + keepalive;

    loop {
        tokio::select! {
            result = backend.read(&mut buf) => {
                let len = match result {
                    Ok(0) => return CloseReason::BackendEnded,
                    Ok(len) => len,
                    Err(error) => {
                        debug!("backend read failed: {error}");
                        return CloseReason::StreamError(error.kind());
                    }
                };

                let pdu = match DataPdu::new(Bytes::copy_from_slice(&buf[..len])) {
                    Ok(data) => Pdu::Data(data),
                    Err(error) => {
                        warn!("could not frame backend data: {error}");
                        return CloseReason::Aborted;
                    }
                };

                if let Err(error) = pdu.write(out).await {
                    debug!("outbound write failed: {error}");
                    return CloseReason::OutboundEnded;
                }

                trace!(len, "backend -> client");
                activity.record_sent(len);
                next_keepalive = Instant::now() + keepalive;
            }
            _ = sleep_until(next_keepalive) => {
                if let Err(error) = Pdu::Keepalive.write(out).await {
                    debug!("outbound keepalive failed: {error}");
                    return CloseReason::OutboundEnded;
                }

                trace!("keepalive -> client");
                next_keepalive = Instant::now() + keepalive;
            }
        }
    }
}

/// A zero interval would spin, so it is treated as a very long one.
fn keepalive_interval(interval: Duration) -> Duration {
    match interval.is_zero() {
        true => Duration::from_secs(60 * 60 * 24),
        false => interval,
    }
}

/// Reads PDUs from the inbound stream and writes their payloads to the backend.
async fn client_to_backend<W>(inbound: &mut PduReader<BoxedReader>, backend: &mut W, activity: &ActivityClock) -> CloseReason
where
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        let pdu = match inbound.read_pdu().await {
            Ok(Some(pdu)) => pdu,
            Ok(None) | Err(ReadError::UnexpectedEof) => return CloseReason::InboundEnded,
            Err(ReadError::Malformed(error)) => {
                warn!("malformed PDU on inbound stream: {error}");
                return CloseReason::ProtocolViolation;
            }
            Err(ReadError::Io(error)) => {
                debug!("inbound read failed: {error}");
                return CloseReason::StreamError(error.kind());
            }
        };

        match pdu {
            Pdu::Data(data) => {
                let len = data.payload().len();
                if let Err(error) = backend.write_all(data.payload()).await {
                    debug!("backend write failed: {error}");
                    return CloseReason::StreamError(error.kind());
                }

                trace!(len, "client -> backend");
                activity.record_received(len);
            }
            Pdu::Keepalive => trace!("keepalive <- client"),
            Pdu::Close(close) => {
                debug!(status = %close.status, "client closed the tunnel on the inbound stream");
                return CloseReason::ClientClosed;
            }
            other => {
                warn!(pdu = %other, "unexpected PDU on inbound stream");
                return CloseReason::ProtocolViolation;
            }
        }
    }
}

/// Watches the outbound request body. After the control phase the only PDUs allowed there are
/// keepalives and a close.
async fn watch_control(control: &mut PduReader<BoxedReader>) -> CloseReason {
    loop {
        match control.read_pdu().await {
            Ok(Some(Pdu::Keepalive)) => trace!("keepalive <- client (control)"),
            Ok(Some(Pdu::Close(close))) => {
                debug!(status = %close.status, "client closed the tunnel on the outbound stream");
                return CloseReason::ClientClosed;
            }
            Ok(Some(other)) => {
                warn!(pdu = %other, "unexpected PDU on outbound stream while relaying");
                return CloseReason::ProtocolViolation;
            }
            // Clients may finish the outbound request body once the channel is open.
            Ok(None) => return pending().await,
            Err(ReadError::Malformed(error)) => {
                warn!("malformed PDU on outbound stream: {error}");
                return CloseReason::ProtocolViolation;
            }
            Err(error) => {
                debug!("outbound request body failed: {error}");
                return CloseReason::OutboundEnded;
            }
        }
    }
}

/// Finishes once the tunnel has been idle for `idle_timeout`. Never finishes if it's `None`.
async fn watch_idle(idle_timeout: Option<Duration>, activity: &ActivityClock) -> CloseReason {
    let Some(idle_timeout) = idle_timeout else {
        return pending().await;
    };

    loop {
        let deadline = activity.last_activity() + idle_timeout;
        if Instant::now() >= deadline {
            return CloseReason::IdleTimeout;
        }

        sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn idle_watch_fires_after_inactivity() {
        let activity = ActivityClock::new();
        let started = Instant::now();
        let reason = watch_idle(Some(Duration::from_millis(30)), &activity).await;

        assert_eq!(reason, CloseReason::IdleTimeout);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn idle_watch_is_pushed_back_by_activity() {
        let activity = ActivityClock::new();
        let started = Instant::now();

        let watch = watch_idle(Some(Duration::from_millis(60)), &activity);
        let touch = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            activity.record_received(1);
            pending::<()>().await
        };

        let reason = tokio::select! {
            reason = watch => reason,
            _ = touch => unreachable!(),
        };

        assert_eq!(reason, CloseReason::IdleTimeout);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn backend_data_is_chunked_into_data_pdus() {
        let policy = GatewayPolicy {
            max_payload: 4,
            ..GatewayPolicy::default()
        };
        let activity = ActivityClock::new();

        let (mut backend_peer, mut backend) = duplex(64);
        let (mut out, out_peer) = duplex(1024);

        backend_peer.write_all(b"0123456789").await.unwrap();
        drop(backend_peer);

        let reason = backend_to_client(&mut backend, &mut out, &policy, &activity).await;
        assert_eq!(reason, CloseReason::BackendEnded);
        drop(out);

        let reader: BoxedReader = Box::new(out_peer);
        let mut reader = PduReader::new(reader);
        let mut received = Vec::new();
        while let Some(pdu) = reader.read_pdu().await.unwrap() {
            match pdu {
                Pdu::Data(data) => {
                    assert!(data.payload().len() <= 4);
                    received.extend_from_slice(data.payload());
                }
                other => panic!("unexpected {other}"),
            }
        }

        assert_eq!(received, b"0123456789");
        assert_eq!(activity.totals(), (10, 0));
    }

    #[tokio::test]
    async fn quiet_backend_gets_keepalives() {
        let policy = GatewayPolicy {
            keepalive_interval: Duration::from_millis(20),
            ..GatewayPolicy::default()
        };
        let activity = ActivityClock::new();

        let (_backend_peer, mut backend) = duplex(64);
        let (mut out, out_peer) = duplex(1024);

        let pump = backend_to_client(&mut backend, &mut out, &policy, &activity);
        let _ = tokio::time::timeout(Duration::from_millis(70), pump).await;
        drop(out);

        let reader: BoxedReader = Box::new(out_peer);
        let mut reader = PduReader::new(reader);
        let mut keepalives = 0;
        while let Some(pdu) = reader.read_pdu().await.unwrap() {
            assert_eq!(pdu, Pdu::Keepalive);
            keepalives += 1;
        }

        assert!(keepalives >= 2, "got {keepalives} keepalives");
        assert_eq!(activity.totals(), (0, 0));
    }

    #[tokio::test]
    async fn inbound_close_and_violations() {
        let activity = ActivityClock::new();
        let (mut client, server) = duplex(1024);
        let (mut backend, mut backend_peer) = duplex(1024);

        client
            .write_all(&Pdu::Data(DataPdu::new(Bytes::from_static(b"hello")).unwrap()).encode())
            .await
            .unwrap();
        client.write_all(&Pdu::Keepalive.encode()).await.unwrap();
        client
            .write_all(&Pdu::Close(tsgate_proto::pdu::CloseChannel { status: tsgate_proto::StatusCode::OK }).encode())
            .await
            .unwrap();

        let server: BoxedReader = Box::new(server);
        let mut inbound = PduReader::new(server);
        let reason = client_to_backend(&mut inbound, &mut backend, &activity).await;
        assert_eq!(reason, CloseReason::ClientClosed);

        let mut forwarded = [0u8; 5];
        backend_peer.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(&forwarded, b"hello");
        assert_eq!(activity.totals(), (0, 5));

        client.write_all(&Pdu::Keepalive.encode()).await.unwrap();
        client.write_all(&[0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00]).await.unwrap();
        let reason = client_to_backend(&mut inbound, &mut backend, &activity).await;
        assert_eq!(reason, CloseReason::ProtocolViolation);

        let (client, server) = duplex(64);
        drop(client);
        let server: BoxedReader = Box::new(server);
        let reason = client_to_backend(&mut PduReader::new(server), &mut backend, &activity).await;
        assert_eq!(reason, CloseReason::InboundEnded);
    }

    #[tokio::test]
    async fn finished_control_body_is_not_a_close() {
        let (client, server) = duplex(64);
        drop(client);

        let server: BoxedReader = Box::new(server);
        let mut control = PduReader::new(server);
        let watch = watch_control(&mut control);
        assert!(tokio::time::timeout(Duration::from_millis(30), watch).await.is_err());
    }
}
