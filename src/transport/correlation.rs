//! Correlation of worker replies to waiting HTTP calls.
//!
//! Each dispatched call parks a `oneshot` sender under a fresh
//! [`RequestToken`]. Whoever removes the entry first (a matching reply, the
//! timeout, or a delivery failure) decides the outcome; every later attempt
//! finds nothing and does nothing.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{RequestToken, WorkerId};
use crate::protocol::CallOutcome;

// ============================================================================
// Types
// ============================================================================

/// What a waiting call eventually receives.
pub type CallResult = Result<CallOutcome>;

/// Receiving end of a pending call.
pub type OutcomeReceiver = oneshot::Receiver<CallResult>;

/// One outstanding call.
#[derive(Debug)]
struct PendingCall {
    outcome_tx: oneshot::Sender<CallResult>,
    worker_id: WorkerId,
    created_at: Instant,
}

// ============================================================================
// CorrelationTable
// ============================================================================

/// Token → pending call map.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<FxHashMap<RequestToken, PendingCall>>,
}

impl CorrelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending call addressed to `worker_id`.
    ///
    /// Returns the fresh token and the receiver the caller waits on. The
    /// token never collides with one that is still outstanding.
    pub fn create(&self, worker_id: WorkerId) -> (RequestToken, OutcomeReceiver) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let mut pending = self.pending.lock();

        let mut token = RequestToken::generate();
        while pending.contains_key(&token) {
            token = RequestToken::generate();
        }

        pending.insert(
            token.clone(),
            PendingCall {
                outcome_tx,
                worker_id,
                created_at: Instant::now(),
            },
        );
        trace!(%token, pending = pending.len(), "Pending call created");

        (token, outcome_rx)
    }

    /// Delivers a worker reply to the call waiting on `token`.
    ///
    /// Returns `false` (and does nothing) if the call was already resolved,
    /// expired or discarded.
    pub fn resolve(&self, token: &RequestToken, outcome: CallOutcome) -> bool {
        let Some(call) = self.take(token) else {
            debug!(%token, "Response for unknown or finished request");
            return false;
        };

        trace!(
            %token,
            worker_id = %call.worker_id,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "Pending call resolved"
        );
        let _ = call.outcome_tx.send(Ok(outcome));
        true
    }

    /// Fails the call waiting on `token` with a timeout.
    ///
    /// Returns `false` (and does nothing) if the call already finished.
    pub fn expire(&self, token: &RequestToken, waited: Duration) -> bool {
        let Some(call) = self.take(token) else {
            return false;
        };

        debug!(%token, worker_id = %call.worker_id, "Pending call timed out");
        let _ = call
            .outcome_tx
            .send(Err(Error::timeout(token.clone(), waited.as_millis() as u64)));
        true
    }

    /// Removes the call waiting on `token` without delivering anything.
    pub fn discard(&self, token: &RequestToken) -> bool {
        self.take(token).is_some()
    }

    /// Returns `true` if `token` is still outstanding.
    #[must_use]
    pub fn contains(&self, token: &RequestToken) -> bool {
        self.pending.lock().contains_key(token)
    }

    /// Number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if no call is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take(&self, token: &RequestToken) -> Option<PendingCall> {
        self.pending.lock().remove(token)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn worker() -> WorkerId {
        WorkerId::new("w1")
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let table = CorrelationTable::new();
        let (token, rx) = table.create(worker());
        assert!(table.contains(&token));

        assert!(table.resolve(&token, CallOutcome::success(json!("pong"))));
        assert!(!table.resolve(&token, CallOutcome::success(json!("again"))));
        assert!(!table.expire(&token, Duration::from_secs(1)));

        let outcome = rx.await.expect("sender kept").expect("success");
        assert_eq!(outcome.result, Some(json!("pong")));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_expire_delivers_timeout() {
        let table = CorrelationTable::new();
        let (token, rx) = table.create(worker());

        assert!(table.expire(&token, Duration::from_millis(250)));
        assert!(!table.resolve(&token, CallOutcome::success(json!("late"))));

        let err = rx.await.expect("sender kept").unwrap_err();
        assert!(err.is_timeout());
        assert!(!table.contains(&token));
    }

    #[tokio::test]
    async fn test_discard_drops_sender() {
        let table = CorrelationTable::new();
        let (token, rx) = table.create(worker());

        assert!(table.discard(&token));
        assert!(!table.discard(&token));
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_unknown_token_is_noop() {
        let table = CorrelationTable::new();
        let token = RequestToken::from_wire("never-issued");
        assert!(!table.resolve(&token, CallOutcome::default()));
        assert!(!table.expire(&token, Duration::ZERO));
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let table = CorrelationTable::new();
        let (token, rx) = table.create(worker());
        drop(rx);

        assert!(table.resolve(&token, CallOutcome::default()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let table = CorrelationTable::new();
        let mut receivers = Vec::new();
        let mut tokens = rustc_hash::FxHashSet::default();

        for _ in 0..256 {
            let (token, rx) = table.create(worker());
            assert!(tokens.insert(token));
            receivers.push(rx);
        }
        assert_eq!(table.len(), 256);
    }
}
