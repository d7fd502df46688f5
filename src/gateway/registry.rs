//! The rendezvous point between a tunnel's outbound request and its inbound request.
//!
//! The outbound request registers its tunnel and gets a [`PairingWaiter`]. The inbound request
//! calls [`TunnelRegistry::pair`] with the tunnel ID and its request body, which hands that body
//! over to the waiter. The inbound request then holds an [`InboundLease`] until the tunnel closes.

use std::{
    collections::{hash_map::Entry, HashMap},
    mem,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{
    sync::{oneshot, Notify},
    time::{timeout_at, Instant},
};
use tracing::debug;
use tsgate_proto::{PduReader, StatusCode, TunnelId};

use super::{BoxedReader, CloseReason};
use crate::GatewayError;

enum Slot {
    /// Registered, waiting for the inbound stream until the deadline.
    Waiting {
        sender: oneshot::Sender<PairedInbound>,
        deadline: Instant,
    },

    /// The inbound stream was handed over.
    Paired,
}

#[derive(Default)]
struct RegistryInner {
    tunnels: HashMap<TunnelId, Slot>,

    /// Inbound requests waiting for an ID that isn't registered yet.
    waiters: HashMap<TunnelId, Arc<Notify>>,
}

/// Maps tunnel IDs to the tunnels waiting for, or holding, their inbound stream.
///
/// All operations lock a single mutex for a short, non-async critical section, so they are
/// serialized per registry and never held across an await point.
#[derive(Default)]
pub struct TunnelRegistry {
    inner: Mutex<RegistryInner>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock can't leave the maps half-updated, so poisoning is ignored.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a tunnel, returning the waiter through which its inbound stream will arrive.
    /// Inbound streams that show up after `deadline` are refused.
    ///
    /// Fails with [`GatewayError::DuplicateId`] if the ID is already registered.
    pub fn register(&self, id: TunnelId, deadline: Instant) -> Result<PairingWaiter, GatewayError> {
        let mut inner = self.lock();
        let (sender, receiver) = oneshot::channel();

        match inner.tunnels.entry(id) {
            Entry::Occupied(_) => return Err(GatewayError::DuplicateId(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Waiting { sender, deadline });
            }
        }

        if let Some(notify) = inner.waiters.remove(&id) {
            notify.notify_waiters();
        }

        Ok(PairingWaiter { id, deadline, receiver })
    }

    /// Pairs an inbound stream with the tunnel registered under `id`.
    ///
    /// If no such tunnel is registered yet, waits for up to `wait` for it to be. Fails with
    /// [`GatewayError::UnknownTunnel`] if it never is, or with [`GatewayError::AlreadyPaired`] if
    /// the tunnel already has an inbound stream, in which case that stream is left untouched. A
    /// tunnel whose pairing deadline has passed is treated as unknown.
    pub async fn pair(&self, id: TunnelId, reader: PduReader<BoxedReader>, wait: Duration) -> Result<InboundLease, GatewayError> {
        let deadline = Instant::now() + wait;
        let (close_sender, close_receiver) = oneshot::channel();
        let mut inbound = Some(PairedInbound {
            reader,
            on_close: close_sender,
            paired_at: Instant::now(),
        });

        let guard = WaiterGuard::new(self, id);

        let result = loop {
            let notified = guard.notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_pair(id, &mut inbound) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(error) => break Err(error),
            }

            if timeout_at(deadline, notified).await.is_err() {
                break Err(GatewayError::UnknownTunnel(id));
            }
        };

        drop(guard);
        result.map(|()| InboundLease {
            id,
            receiver: close_receiver,
        })
    }

    /// Attempts to hand `inbound` over to the tunnel `id`. Returns `Ok(false)` if the tunnel isn't
    /// registered, leaving `inbound` in place.
    fn try_pair(&self, id: TunnelId, inbound: &mut Option<PairedInbound>) -> Result<bool, GatewayError> {
        let mut inner = self.lock();
        let slot = match inner.tunnels.get_mut(&id) {
            None => return Ok(false),
            Some(Slot::Paired) => return Err(GatewayError::AlreadyPaired(id)),
            Some(Slot::Waiting { deadline, .. }) if Instant::now() > *deadline => {
                debug!(tunnel = %id, "inbound stream arrived after the pairing window");
                return Err(GatewayError::UnknownTunnel(id));
            }
            Some(slot) => slot,
        };

        let Some(mut paired) = inbound.take() else {
            return Err(GatewayError::AlreadyPaired(id));
        };
        paired.paired_at = Instant::now();

        match mem::replace(slot, Slot::Paired) {
            Slot::Waiting { sender, .. } => match sender.send(paired) {
                Ok(()) => {
                    debug!(tunnel = %id, "inbound stream paired");
                    Ok(true)
                }
                // The tunnel stopped waiting, it's on its way out of the registry.
                Err(_) => Err(GatewayError::UnknownTunnel(id)),
            },
            Slot::Paired => Err(GatewayError::AlreadyPaired(id)),
        }
    }

    /// Removes a tunnel. Removing an ID that isn't registered does nothing.
    pub fn remove(&self, id: TunnelId) -> bool {
        self.lock().tunnels.remove(&id).is_some()
    }

    pub fn contains(&self, id: TunnelId) -> bool {
        self.lock().tunnels.contains_key(&id)
    }

    /// Whether the tunnel `id` is registered and already has its inbound stream.
    pub fn is_paired(&self, id: TunnelId) -> bool {
        matches!(self.lock().tunnels.get(&id), Some(Slot::Paired))
    }

    /// The amount of registered tunnels.
    pub fn len(&self) -> usize {
        self.lock().tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registration in the waiters map for one [`TunnelRegistry::pair`] call. Dropping it removes
/// the entry once no other call waits on the same ID, including when the call is cancelled.
struct WaiterGuard<'a> {
    registry: &'a TunnelRegistry,
    id: TunnelId,
    notify: Arc<Notify>,
}

impl<'a> WaiterGuard<'a> {
    fn new(registry: &'a TunnelRegistry, id: TunnelId) -> Self {
        let notify = Arc::clone(registry.lock().waiters.entry(id).or_default());
        Self {
            registry,
            id,
            notify,
        }
    }

    fn notify(&self) -> &Notify {
        &self.notify
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.registry.lock();
        let notify = mem::take(&mut self.notify);
        let is_current = inner.waiters.get(&self.id).is_some_and(|current| Arc::ptr_eq(current, &notify));

        // Released under the lock, so concurrent drops see each other's counts.
        drop(notify);

        if is_current {
            if let Some(current) = inner.waiters.get(&self.id) {
                // Only the map holds it, so no one else is waiting on this ID.
                if Arc::strong_count(current) == 1 {
                    inner.waiters.remove(&self.id);
                }
            }
        }
    }
}

/// An inbound stream, handed over from the inbound request to its tunnel.
pub struct PairedInbound {
    pub reader: PduReader<BoxedReader>,
    on_close: oneshot::Sender<CloseReason>,
    paired_at: Instant,
}

impl PairedInbound {
    /// Splits this into the stream and the handle used to release the inbound request.
    pub fn into_parts(self) -> (PduReader<BoxedReader>, InboundRelease) {
        (self.reader, InboundRelease(self.on_close))
    }

    /// Drops the stream and tells the inbound request why the tunnel closed.
    pub fn release(self, reason: CloseReason) {
        let (_reader, release) = self.into_parts();
        release.release(reason);
    }
}

/// Releases the inbound request of a tunnel.
pub struct InboundRelease(oneshot::Sender<CloseReason>);

impl InboundRelease {
    pub fn release(self, reason: CloseReason) {
        // The inbound request may already be gone.
        let _ = self.0.send(reason);
    }
}

/// Held by the outbound side of a tunnel until its inbound stream arrives.
pub struct PairingWaiter {
    id: TunnelId,
    deadline: Instant,
    receiver: oneshot::Receiver<PairedInbound>,
}

impl PairingWaiter {
    /// Waits for the inbound stream until the pairing deadline. A stream is only accepted if it
    /// was paired within the window.
    pub async fn wait(self) -> Result<PairedInbound, GatewayError> {
        match timeout_at(self.deadline, self.receiver).await {
            Ok(Ok(inbound)) if inbound.paired_at <= self.deadline => Ok(inbound),
            Ok(Ok(inbound)) => {
                inbound.release(CloseReason::Rejected(StatusCode::PAIRING_TIMEOUT));
                Err(GatewayError::PairingTimeout(self.id))
            }
            Ok(Err(_)) | Err(_) => Err(GatewayError::PairingTimeout(self.id)),
        }
    }
}

/// Held by an inbound request while its stream belongs to a tunnel.
pub struct InboundLease {
    id: TunnelId,
    receiver: oneshot::Receiver<CloseReason>,
}

impl InboundLease {
    pub fn id(&self) -> TunnelId {
        self.id
    }

    /// Waits until the tunnel closes, returning why it did.
    pub async fn closed(self) -> CloseReason {
        self.receiver.await.unwrap_or(CloseReason::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn empty_reader() -> PduReader<BoxedReader> {
        let reader: BoxedReader = Box::new(tokio::io::empty());
        PduReader::new(reader)
    }

    const WAIT: Duration = Duration::from_millis(200);

    fn deadline() -> Instant {
        Instant::now() + WAIT
    }

    fn pending_waiters(registry: &TunnelRegistry) -> usize {
        registry.lock().waiters.len()
    }

    #[test]
    fn register_rejects_duplicates() {
        let registry = TunnelRegistry::new();
        let _waiter = registry.register(TunnelId(7), deadline()).unwrap();
        assert!(matches!(registry.register(TunnelId(7), deadline()), Err(GatewayError::DuplicateId(TunnelId(7)))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = TunnelRegistry::new();
        let _waiter = registry.register(TunnelId(1), deadline()).unwrap();
        assert!(registry.remove(TunnelId(1)));
        assert!(!registry.remove(TunnelId(1)));
        assert!(!registry.remove(TunnelId(2)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn pair_hands_the_stream_to_the_waiter() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(1), deadline()).unwrap();

        let (mut client, server) = tokio::io::duplex(64);
        let server: BoxedReader = Box::new(server);
        let lease = registry.pair(TunnelId(1), PduReader::new(server), WAIT).await.unwrap();
        assert!(registry.is_paired(TunnelId(1)));

        let inbound = waiter.wait().await.unwrap();
        let (mut reader, release) = inbound.into_parts();
        client.write_all(&tsgate_proto::pdu::Pdu::Keepalive.encode()).await.unwrap();
        assert_eq!(reader.read_pdu().await.unwrap(), Some(tsgate_proto::pdu::Pdu::Keepalive));

        release.release(CloseReason::IdleTimeout);
        assert_eq!(lease.closed().await, CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn second_pair_is_rejected_and_first_is_unaffected() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(9), deadline()).unwrap();

        let first = registry.pair(TunnelId(9), empty_reader(), WAIT).await.unwrap();
        let second = registry.pair(TunnelId(9), empty_reader(), WAIT).await;
        assert!(matches!(second, Err(GatewayError::AlreadyPaired(TunnelId(9)))));

        let inbound = waiter.wait().await.unwrap();
        inbound.release(CloseReason::ClientClosed);
        assert_eq!(first.closed().await, CloseReason::ClientClosed);
    }

    #[tokio::test]
    async fn pair_unknown_id_times_out() {
        let registry = TunnelRegistry::new();
        let result = registry.pair(TunnelId(3), empty_reader(), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(GatewayError::UnknownTunnel(TunnelId(3)))));
    }

    #[tokio::test]
    async fn pair_waits_for_a_late_registration() {
        let registry = Arc::new(TunnelRegistry::new());

        let pairing = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.pair(TunnelId(5), empty_reader(), Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = registry.register(TunnelId(5), deadline()).unwrap();

        let lease = pairing.await.unwrap().unwrap();
        assert_eq!(lease.id(), TunnelId(5));
        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn waiter_times_out_without_inbound() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(4), Instant::now() + Duration::from_millis(20)).unwrap();
        let result = waiter.wait().await;
        assert!(matches!(result, Err(GatewayError::PairingTimeout(TunnelId(4)))));
    }

    #[tokio::test]
    async fn dropped_tunnel_aborts_the_lease() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(8), deadline()).unwrap();
        let lease = registry.pair(TunnelId(8), empty_reader(), WAIT).await.unwrap();
        drop(waiter);
        assert_eq!(lease.closed().await, CloseReason::Aborted);
    }

    #[tokio::test]
    async fn late_inbound_is_refused() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(6), Instant::now() + Duration::from_millis(20)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = registry.pair(TunnelId(6), empty_reader(), WAIT).await;
        assert!(matches!(result, Err(GatewayError::UnknownTunnel(TunnelId(6)))));
        assert!(!registry.is_paired(TunnelId(6)));
        assert!(matches!(waiter.wait().await, Err(GatewayError::PairingTimeout(TunnelId(6)))));
    }

    #[tokio::test]
    async fn inbound_paired_in_time_survives_a_late_wait() {
        let registry = TunnelRegistry::new();
        let waiter = registry.register(TunnelId(2), Instant::now() + Duration::from_millis(50)).unwrap();
        let _lease = registry.pair(TunnelId(2), empty_reader(), WAIT).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_pair_calls_leave_no_waiters() {
        let registry = Arc::new(TunnelRegistry::new());

        let mut tasks = Vec::new();
        for i in 0..100u128 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.pair(TunnelId(1000 + i % 10), empty_reader(), Duration::from_secs(60)).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pending_waiters(&registry), 10);

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            assert!(matches!(task.await, Err(error) if error.is_cancelled()));
        }

        assert_eq!(pending_waiters(&registry), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_pair_calls_leave_no_waiters() {
        let registry = Arc::new(TunnelRegistry::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.pair(TunnelId(77), empty_reader(), Duration::from_millis(30)).await })
            })
            .collect();

        for task in tasks {
            assert!(matches!(task.await.unwrap(), Err(GatewayError::UnknownTunnel(TunnelId(77)))));
        }

        assert_eq!(pending_waiters(&registry), 0);
    }
}
