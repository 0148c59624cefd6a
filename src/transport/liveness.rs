//! Heartbeat-based liveness tracking.
//!
//! Records when each worker identity was last heard from. A periodic sweep
//! evicts every worker whose last heartbeat is older than the staleness
//! threshold (twice the heartbeat interval). This is the only way the relay
//! detects peers that went silent without closing their socket.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::identifiers::WorkerId;

use super::registry::Registry;

// ============================================================================
// LivenessTracker
// ============================================================================

/// Last-seen timestamps per worker identity.
#[derive(Debug)]
pub struct LivenessTracker {
    last_seen: Mutex<FxHashMap<WorkerId, Instant>>,
    threshold: Duration,
}

impl LivenessTracker {
    /// Creates a tracker that treats workers silent for longer than
    /// `threshold` as dead.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_seen: Mutex::new(FxHashMap::default()),
            threshold,
        }
    }

    /// Returns the staleness threshold.
    #[inline]
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Records that `worker_id` is alive now.
    ///
    /// Reads the tokio clock so sweeps and touches share one time source.
    pub fn touch(&self, worker_id: &WorkerId) {
        self.touch_at(worker_id, tokio::time::Instant::now().into_std());
    }

    /// Records that `worker_id` was alive at `at`.
    ///
    /// Timestamps never move backwards.
    pub fn touch_at(&self, worker_id: &WorkerId, at: Instant) {
        let mut last_seen = self.last_seen.lock();
        last_seen
            .entry(worker_id.clone())
            .and_modify(|seen| *seen = (*seen).max(at))
            .or_insert(at);
    }

    /// Drops the entry for `worker_id`.
    pub fn forget(&self, worker_id: &WorkerId) {
        self.last_seen.lock().remove(worker_id);
    }

    /// Returns when `worker_id` was last heard from.
    #[must_use]
    pub fn last_seen(&self, worker_id: &WorkerId) -> Option<Instant> {
        self.last_seen.lock().get(worker_id).copied()
    }

    /// Returns `true` if `worker_id` is tracked and its last heartbeat is
    /// older than the threshold at `now`.
    #[must_use]
    pub fn is_stale(&self, worker_id: &WorkerId, now: Instant) -> bool {
        self.last_seen(worker_id)
            .is_some_and(|seen| now.saturating_duration_since(seen) > self.threshold)
    }

    /// Returns every tracked identity that is stale at `now`.
    #[must_use]
    pub fn stale_ids(&self, now: Instant) -> Vec<WorkerId> {
        self.last_seen
            .lock()
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > self.threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of tracked identities.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.lock().is_empty()
    }

    /// Evicts every stale worker from `registry`, closing its socket.
    ///
    /// Staleness is re-checked under the registry lock, so a worker that
    /// heartbeats or re-registers while the sweep runs is kept.
    ///
    /// Returns the evicted identities.
    pub fn sweep(&self, registry: &Registry, now: Instant) -> Vec<WorkerId> {
        let mut evicted = Vec::new();

        for worker_id in self.stale_ids(now) {
            if let Some(connection) = registry.evict_if_stale(&worker_id, now) {
                connection.close();
                info!(worker_id = %worker_id, "Worker disconnected due to heartbeat timeout");
                evicted.push(worker_id);
            }
        }

        evicted
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::transport::WorkerConnection;

    const THRESHOLD: Duration = Duration::from_secs(60);

    #[test]
    fn test_touch_is_monotonic() {
        let tracker = LivenessTracker::new(THRESHOLD);
        let id = WorkerId::new("w1");
        let base = Instant::now();

        tracker.touch_at(&id, base + Duration::from_secs(10));
        tracker.touch_at(&id, base);

        assert_eq!(tracker.last_seen(&id), Some(base + Duration::from_secs(10)));
    }

    #[test]
    fn test_is_stale_uses_strict_threshold() {
        let tracker = LivenessTracker::new(THRESHOLD);
        let id = WorkerId::new("w1");
        let base = Instant::now();
        tracker.touch_at(&id, base);

        assert!(!tracker.is_stale(&id, base + THRESHOLD));
        assert!(tracker.is_stale(&id, base + THRESHOLD + Duration::from_millis(1)));
        assert!(!tracker.is_stale(&WorkerId::new("unknown"), base + THRESHOLD * 10));
    }

    #[test]
    fn test_forget() {
        let tracker = LivenessTracker::new(THRESHOLD);
        let id = WorkerId::new("w1");
        tracker.touch(&id);
        assert_eq!(tracker.len(), 1);

        tracker.forget(&id);
        assert!(tracker.is_empty());
        assert_eq!(tracker.last_seen(&id), None);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_silent_workers() {
        let tracker = Arc::new(LivenessTracker::new(THRESHOLD));
        let registry = Registry::new(Arc::clone(&tracker));

        let (silent, _silent_rx) = WorkerConnection::new();
        let (chatty, _chatty_rx) = WorkerConnection::new();
        let silent_id = WorkerId::new("silent");
        let chatty_id = WorkerId::new("chatty");

        registry.register(silent_id.clone(), silent.clone());
        registry.register(chatty_id.clone(), chatty.clone());

        let now = Instant::now() + THRESHOLD + Duration::from_secs(1);
        assert!(registry.heartbeat(&chatty_id, chatty.id()));
        tracker.touch_at(&chatty_id, now);

        let evicted = tracker.sweep(&registry, now);

        assert_eq!(evicted, vec![silent_id.clone()]);
        assert!(registry.lookup(&silent_id).is_none());
        assert!(registry.lookup(&chatty_id).is_some());
        assert_eq!(tracker.last_seen(&silent_id), None);
        assert!(silent.is_closed());
        assert!(!chatty.is_closed());
    }

    #[test]
    fn test_sweep_on_empty_registry() {
        let tracker = Arc::new(LivenessTracker::new(THRESHOLD));
        let registry = Registry::new(Arc::clone(&tracker));
        assert!(tracker.sweep(&registry, Instant::now()).is_empty());
    }
}
