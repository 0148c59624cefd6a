//! Registry of live worker connections.
//!
//! Maps each worker identity to at most one [`WorkerConnection`]. Any
//! number of sockets may be open, but only registered ones are reachable
//! by calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Registry                  │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "w1"     → conn-3               │    │
//! │  │ "w2"     → conn-7               │    │
//! │  │ "client" → conn-8               │    │
//! │  └─────────────────────────────────┘    │
//! │  LivenessTracker (last heartbeat/id)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Lock order is always registry map, then liveness map.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::identifiers::{ConnectionId, WorkerId};

use super::connection::WorkerConnection;
use super::liveness::LivenessTracker;

// ============================================================================
// Registry
// ============================================================================

/// Worker identity → connection map.
///
/// Thread-safe; every mutation is atomic with respect to other mutations.
#[derive(Debug)]
pub struct Registry {
    connections: RwLock<FxHashMap<WorkerId, WorkerConnection>>,
    liveness: Arc<LivenessTracker>,
}

// ============================================================================
// Registry - Constructor
// ============================================================================

impl Registry {
    /// Creates an empty registry that reports registrations to `liveness`.
    #[must_use]
    pub fn new(liveness: Arc<LivenessTracker>) -> Self {
        Self {
            connections: RwLock::new(FxHashMap::default()),
            liveness,
        }
    }

    /// Returns the liveness tracker fed by this registry.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }
}

// ============================================================================
// Registry - Public API
// ============================================================================

impl Registry {
    /// Binds `worker_id` to `connection`, replacing any previous binding.
    ///
    /// A binding held by a different socket is superseded: it is logged,
    /// closed, and returned. Re-registering the same socket returns `None`.
    pub fn register(
        &self,
        worker_id: WorkerId,
        connection: WorkerConnection,
    ) -> Option<WorkerConnection> {
        let (previous, total) = {
            let mut connections = self.connections.write();
            let previous = connections.insert(worker_id.clone(), connection.clone());
            self.liveness.touch(&worker_id);
            (previous, connections.len())
        };

        info!(
            worker_id = %worker_id,
            connection = %connection.id(),
            total,
            "Registered worker"
        );

        let superseded = previous.filter(|old| old.id() != connection.id())?;
        warn!(
            worker_id = %worker_id,
            old = %superseded.id(),
            new = %connection.id(),
            "Worker already registered, replacing connection"
        );
        superseded.close();
        Some(superseded)
    }

    /// Returns the connection bound to `worker_id`.
    #[must_use]
    pub fn lookup(&self, worker_id: &WorkerId) -> Option<WorkerConnection> {
        self.connections.read().get(worker_id).cloned()
    }

    /// Removes the binding for `worker_id` regardless of which socket holds it.
    pub fn remove(&self, worker_id: &WorkerId) -> Option<WorkerConnection> {
        let removed = {
            let mut connections = self.connections.write();
            let removed = connections.remove(worker_id);
            self.liveness.forget(worker_id);
            removed
        };

        if removed.is_some() {
            debug!(worker_id = %worker_id, "Worker removed from registry");
        }
        removed
    }

    /// Removes the binding for `worker_id` only if `connection_id` holds it.
    ///
    /// Used when a socket closes, so a stale socket never unbinds a newer
    /// registration of the same identity.
    pub fn remove_if(&self, worker_id: &WorkerId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let owned = connections
            .get(worker_id)
            .is_some_and(|conn| conn.id() == connection_id);

        if owned {
            connections.remove(worker_id);
            self.liveness.forget(worker_id);
        }
        owned
    }

    /// Records a heartbeat from `connection_id` for `worker_id`.
    ///
    /// Ignored unless that socket currently holds the binding.
    pub fn heartbeat(&self, worker_id: &WorkerId, connection_id: ConnectionId) -> bool {
        let connections = self.connections.read();
        let owned = connections
            .get(worker_id)
            .is_some_and(|conn| conn.id() == connection_id);

        if owned {
            self.liveness.touch(worker_id);
        }
        owned
    }

    /// Removes `worker_id` if it is stale at `now`.
    ///
    /// Also drops a stale liveness entry that has no connection.
    pub(crate) fn evict_if_stale(
        &self,
        worker_id: &WorkerId,
        now: Instant,
    ) -> Option<WorkerConnection> {
        let mut connections = self.connections.write();
        if !self.liveness.is_stale(worker_id, now) {
            return None;
        }

        self.liveness.forget(worker_id);
        connections.remove(worker_id)
    }

    /// Number of registered workers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no worker is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

// ============================================================================
// Registry - Lifecycle
// ============================================================================

impl Registry {
    /// Unbinds and closes every registered connection.
    pub fn close_all(&self) {
        let drained: Vec<_> = {
            let mut connections = self.connections.write();
            connections.drain().collect()
        };

        for (worker_id, connection) in drained {
            self.liveness.forget(&worker_id);
            connection.close();
            debug!(worker_id = %worker_id, "Connection closed during shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;

    use crate::transport::connection::CommandReceiver;

    fn registry() -> Registry {
        Registry::new(Arc::new(LivenessTracker::new(Duration::from_secs(60))))
    }

    fn connection() -> (WorkerConnection, CommandReceiver) {
        WorkerConnection::new()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        let (conn, _rx) = connection();
        let id = WorkerId::new("w1");

        assert!(registry.register(id.clone(), conn.clone()).is_none());

        assert_eq!(registry.lookup(&id).map(|c| c.id()), Some(conn.id()));
        assert!(registry.liveness().last_seen(&id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = registry();
        assert!(registry.lookup(&WorkerId::new("ghost")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebind_closes_superseded_connection() {
        let registry = registry();
        let (old, _old_rx) = connection();
        let (new, _new_rx) = connection();
        let id = WorkerId::new("w1");

        registry.register(id.clone(), old.clone());
        let superseded = registry.register(id.clone(), new.clone());

        assert_eq!(superseded.map(|c| c.id()), Some(old.id()));
        assert_eq!(registry.lookup(&id).map(|c| c.id()), Some(new.id()));
        assert_eq!(registry.len(), 1);
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[test]
    fn test_reregister_same_socket_is_not_superseded() {
        let registry = registry();
        let (conn, _rx) = connection();
        let id = WorkerId::new("w1");

        registry.register(id.clone(), conn.clone());
        assert!(registry.register(id.clone(), conn.clone()).is_none());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_remove_if_ignores_other_socket() {
        let registry = registry();
        let (old, _old_rx) = connection();
        let (new, _new_rx) = connection();
        let id = WorkerId::new("w1");

        registry.register(id.clone(), old.clone());
        registry.register(id.clone(), new.clone());

        assert!(!registry.remove_if(&id, old.id()));
        assert!(registry.lookup(&id).is_some());

        assert!(registry.remove_if(&id, new.id()));
        assert!(registry.lookup(&id).is_none());
        assert!(registry.liveness().last_seen(&id).is_none());
    }

    #[test]
    fn test_heartbeat_requires_current_binding() {
        let registry = registry();
        let (old, _old_rx) = connection();
        let (new, _new_rx) = connection();
        let id = WorkerId::new("w1");

        assert!(!registry.heartbeat(&id, old.id()));

        registry.register(id.clone(), old.clone());
        registry.register(id.clone(), new.clone());

        assert!(!registry.heartbeat(&id, old.id()));
        assert!(registry.heartbeat(&id, new.id()));
    }

    #[test]
    fn test_remove() {
        let registry = registry();
        let (conn, _rx) = connection();
        let id = WorkerId::new("w1");

        registry.register(id.clone(), conn);
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.liveness().is_empty());
    }

    #[test]
    fn test_close_all() {
        let registry = registry();
        let (a, _a_rx) = connection();
        let (b, _b_rx) = connection();

        registry.register(WorkerId::new("a"), a.clone());
        registry.register(WorkerId::new("b"), b.clone());
        registry.close_all();

        assert!(registry.is_empty());
        assert!(registry.liveness().is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    proptest! {
        #[test]
        fn prop_last_register_wins(ids in proptest::collection::vec(0u8..4, 1..32)) {
            let registry = registry();
            let mut expected = FxHashMap::default();
            let mut receivers = Vec::new();

            for n in ids {
                let (conn, rx) = connection();
                let id = WorkerId::new(format!("w{n}"));
                expected.insert(id.clone(), conn.id());
                registry.register(id, conn);
                receivers.push(rx);
            }

            prop_assert_eq!(registry.len(), expected.len());
            for (id, conn_id) in expected {
                prop_assert_eq!(registry.lookup(&id).map(|c| c.id()), Some(conn_id));
            }
        }
    }
}
