use crate::metrics::{counters, gauges};
use dashmap::DashMap;
use rjl_common::Frame;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process-unique connection identifier, assigned at registration.
///
/// Never derived from the peer address: two connections may share one
/// transiently during a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle held in the registry, used to enqueue frames for a connection.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Identifier assigned at registration.
    pub id: ConnId,
    /// Remote address, for logging only.
    pub peer: SocketAddr,
    /// Instant the connection was registered.
    pub registered_at: Instant,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl ConnHandle {
    /// Time since the connection was registered.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }
}

/// Receiving side of a registered connection.
///
/// Dropping it unregisters the connection.
#[derive(Debug)]
pub struct Registration {
    id: ConnId,
    rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    registry: Arc<Registry>,
}

impl Registration {
    /// Identifier assigned to this connection.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Next queued outbound frame. `None` once the connection is unregistered
    /// and its queue has drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next queued outbound frame, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Token cancelled when the registry drops this connection.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Returns `true` once the registry has dropped this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Removes the connection from the registry. Safe to call repeatedly.
    pub fn unregister(&self) {
        self.registry.unregister(self.id);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Result of one [`Registry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Connections the frame was enqueued for.
    pub delivered: usize,
    /// Connections dropped because their queue was full.
    pub evicted: usize,
}

/// Concurrent id → connection table with non-blocking fan-out.
#[derive(Debug)]
pub struct Registry {
    conns: DashMap<ConnId, ConnHandle>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Registry {
    /// Create an empty registry whose connections buffer up to
    /// `queue_capacity` outbound frames each.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            conns: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Per-connection outbound queue bound.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new connection and return its receiving side.
    #[must_use]
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Registration {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let closed = CancellationToken::new();
        let handle = ConnHandle {
            id,
            peer,
            registered_at: Instant::now(),
            tx,
            closed: closed.clone(),
        };
        self.conns.insert(id, handle);
        gauges::inc_connections_active();
        debug!(conn_id = %id, %peer, "registered connection");
        Registration {
            id,
            rx,
            closed,
            registry: Arc::clone(self),
        }
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnId) -> bool {
        let Some((_, handle)) = self.conns.remove(&id) else {
            return false;
        };
        handle.closed.cancel();
        gauges::dec_connections_active();
        debug!(
            conn_id = %id,
            peer = %handle.peer,
            age_ms = handle.age().as_millis() as u64,
            "unregistered connection"
        );
        true
    }

    /// Enqueue `frame` for every currently registered connection.
    ///
    /// Membership is copied out first so that no map lock is held while
    /// sending. A connection whose queue is full is unregistered.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastOutcome {
        let targets: Vec<ConnHandle> = self.conns.iter().map(|e| e.value().clone()).collect();
        let mut outcome = BroadcastOutcome::default();

        for handle in targets {
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => {
                    outcome.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    if self.unregister(handle.id) {
                        counters::evictions_total("overflow");
                        warn!(
                            conn_id = %handle.id,
                            peer = %handle.peer,
                            capacity = self.queue_capacity,
                            "outbound queue full, dropping connection"
                        );
                        outcome.evicted += 1;
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    self.unregister(handle.id);
                }
            }
        }

        counters::broadcasts_total(frame.kind().keyword());
        counters::frames_enqueued_total(outcome.delivered as u64);
        outcome
    }

    /// Unregister every connection, e.g. on shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnId> = self.conns.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Returns `true` if the connection is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Look up a connection handle by id.
    #[must_use]
    pub fn get(&self, id: ConnId) -> Option<ConnHandle> {
        self.conns.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn register_assigns_distinct_ids_for_same_peer() {
        let registry = Arc::new(Registry::new(4));
        let a = registry.register(peer());
        let b = registry.register(peer());

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));
        assert!(registry.contains(b.id()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Arc::new(Registry::new(4));
        let reg = registry.register(peer());
        let id = reg.id();

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(reg.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn dropping_registration_unregisters() {
        let registry = Arc::new(Registry::new(4));
        let reg = registry.register(peer());
        let id = reg.id();
        drop(reg);

        assert!(!registry.contains(id));
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn handle_records_peer_and_age() {
        let registry = Arc::new(Registry::new(4));
        let reg = registry.register(peer());
        std::thread::sleep(Duration::from_millis(5));

        let handle = registry.get(reg.id()).unwrap();
        assert_eq!(handle.id, reg.id());
        assert_eq!(handle.peer, peer());
        assert!(handle.age() >= Duration::from_millis(5));
    }

    #[test]
    fn unregistering_one_leaves_others_on_same_address() {
        let registry = Arc::new(Registry::new(4));
        let a = registry.register(peer());
        let b = registry.register(peer());

        a.unregister();
        assert!(!registry.contains(a.id()));
        assert!(registry.contains(b.id()));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_in_order() {
        let registry = Arc::new(Registry::new(8));
        let mut a = registry.register(peer());
        let mut b = registry.register(peer());

        let first = registry.broadcast(&Frame::add("one.com"));
        let second = registry.broadcast(&Frame::remove("one.com"));
        assert_eq!(first.delivered, 2);
        assert_eq!(second.delivered, 2);

        for reg in [&mut a, &mut b] {
            assert_eq!(reg.recv().await, Some(Frame::add("one.com")));
            assert_eq!(reg.recv().await, Some(Frame::remove("one.com")));
        }
    }

    #[tokio::test]
    async fn saturated_connection_is_evicted_without_delaying_others() {
        let registry = Arc::new(Registry::new(2));
        let stalled = registry.register(peer());
        let mut fast_a = registry.register(peer());
        let mut fast_b = registry.register(peer());
        let stalled_token = stalled.closed_token();

        let mut evicted = 0;
        for i in 0..3 {
            let outcome = registry.broadcast(&Frame::add(format!("h{i}.com")));
            evicted += outcome.evicted;
            // the fast consumers keep up
            for reg in [&mut fast_a, &mut fast_b] {
                let frame = tokio::time::timeout(Duration::from_secs(1), reg.recv())
                    .await
                    .unwrap();
                assert_eq!(frame, Some(Frame::add(format!("h{i}.com"))));
            }
        }

        assert_eq!(evicted, 1);
        assert!(stalled_token.is_cancelled());
        assert!(!registry.contains(stalled.id()));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn evicted_queue_drains_then_ends() {
        let registry = Arc::new(Registry::new(1));
        let mut reg = registry.register(peer());

        registry.broadcast(&Frame::add("a.com"));
        let outcome = registry.broadcast(&Frame::add("b.com"));
        assert_eq!(outcome.evicted, 1);

        assert_eq!(reg.recv().await, Some(Frame::add("a.com")));
        assert_eq!(reg.recv().await, None);
    }

    #[tokio::test]
    async fn broadcast_skips_connections_registered_afterwards() {
        let registry = Arc::new(Registry::new(4));
        let mut early = registry.register(peer());
        registry.broadcast(&Frame::add("before.com"));
        let mut late = registry.register(peer());
        registry.broadcast(&Frame::add("after.com"));

        assert_eq!(early.recv().await, Some(Frame::add("before.com")));
        assert_eq!(early.recv().await, Some(Frame::add("after.com")));
        assert_eq!(late.recv().await, Some(Frame::add("after.com")));
    }

    #[test]
    fn close_all_cancels_every_connection() {
        let registry = Arc::new(Registry::new(4));
        let a = registry.register(peer());
        let b = registry.register(peer());

        assert_eq!(registry.close_all(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn default_impl_creates_empty_registry() {
        let registry = Registry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.queue_capacity(), 256);
    }
}
