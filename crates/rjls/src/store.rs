use crate::metrics::gauges;
use crate::registry::{Registration, Registry};
use rjl_common::types::normalize_host;
use rjl_common::Frame;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Canonical set of rejected hostnames.
///
/// Every mutation hands its frame to [`Registry::broadcast`] while still
/// holding the set lock, so each connection's queue sees mutations in commit
/// order. [`RejectList::subscribe`] registers under the same lock, which
/// makes the join snapshot and the broadcasts that follow it gap-free and
/// duplicate-free.
#[derive(Debug)]
pub struct RejectList {
    hosts: Mutex<BTreeSet<String>>,
    registry: Arc<Registry>,
}

impl RejectList {
    /// Create an empty list that notifies `registry` of changes.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            hosts: Mutex::new(BTreeSet::new()),
            registry,
        }
    }

    // Every critical section leaves the set consistent.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `host`. Returns `true` if it was not already present.
    ///
    /// Invalid hosts (empty, or containing whitespace or control characters)
    /// are refused and reported as not new.
    pub fn add(&self, host: &str) -> bool {
        let Some(host) = normalize_host(host) else {
            warn!(host = %host.escape_debug(), "refusing invalid host");
            return false;
        };
        let mut hosts = self.lock();
        if !hosts.insert(host.to_string()) {
            return false;
        }
        gauges::reject_list_size(hosts.len());
        let outcome = self.registry.broadcast(&Frame::add(host));
        info!(host, notified = outcome.delivered, "added reject entry");
        true
    }

    /// Remove `host`. Returns `true` if it was present.
    pub fn remove(&self, host: &str) -> bool {
        let Some(host) = normalize_host(host) else {
            return false;
        };
        let mut hosts = self.lock();
        if !hosts.remove(host) {
            return false;
        }
        gauges::reject_list_size(hosts.len());
        let outcome = self.registry.broadcast(&Frame::remove(host));
        info!(host, notified = outcome.delivered, "removed reject entry");
        true
    }

    /// Point-in-time copy of the list, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Register a connection and take the snapshot it starts from, atomically
    /// with respect to [`add`](Self::add) and [`remove`](Self::remove).
    #[must_use]
    pub fn subscribe(&self, peer: SocketAddr) -> (Registration, Vec<String>) {
        let hosts = self.lock();
        let registration = self.registry.register(peer);
        (registration, hosts.iter().cloned().collect())
    }

    /// Returns `true` if `host` is currently rejected.
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        normalize_host(host).is_some_and(|h| self.lock().contains(h))
    }

    /// Number of rejected hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
