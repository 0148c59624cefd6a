//! HTTP-facing call dispatch.
//!
//! [`Dispatcher::dispatch`] turns one HTTP call into one forwarded
//! `api_call` frame and waits for whichever comes first: the worker's reply
//! or the request timeout. The deadline covers the socket write as well, so
//! a call never waits longer than the configured timeout.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::config::MAX_DURATION;
use crate::error::{Error, Result};
use crate::identifiers::RequestToken;
use crate::protocol::{CallOutcome, CallRequest, OutboundFrame};
use crate::transport::correlation::OutcomeReceiver;
use crate::transport::{CorrelationTable, Registry};

// ============================================================================
// Dispatcher
// ============================================================================

/// Forwards HTTP calls to registered workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    correlation: Arc<CorrelationTable>,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared registry and correlation table.
    ///
    /// `request_timeout` is capped at [`MAX_DURATION`].
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        correlation: Arc<CorrelationTable>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            correlation,
            request_timeout: request_timeout.min(MAX_DURATION),
        }
    }

    /// Returns the per-call timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Forwards `request` to its worker and waits for the outcome.
    ///
    /// Exactly one of reply, timeout, or failure is returned. If the
    /// returned future is dropped early the pending call is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `id` or `apiname` is missing
    /// - [`Error::WorkerUnavailable`] if no worker is registered under `id`
    /// - [`Error::DeliveryFailed`] if the call frame cannot be written
    /// - [`Error::Timeout`] if no reply arrives within the timeout
    pub async fn dispatch(&self, request: CallRequest) -> Result<CallOutcome> {
        let call = request.validate()?;

        let connection = self
            .registry
            .lookup(&call.worker_id)
            .ok_or_else(|| Error::worker_unavailable(call.worker_id.clone()))?;

        let deadline = Instant::now() + self.request_timeout;
        let (token, outcome_rx) = self.correlation.create(call.worker_id.clone());
        let _guard = PendingGuard {
            correlation: &self.correlation,
            token: &token,
        };

        debug!(
            worker_id = %call.worker_id,
            apiname = %call.apiname,
            %token,
            "Dispatching call"
        );

        let frame = OutboundFrame::ApiCall {
            request_id: token.clone(),
            apiname: call.apiname,
            apiparams: call.apiparams,
        };

        match timeout_at(deadline, connection.send(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.correlation.discard(&token);
                warn!(worker_id = %call.worker_id, error = %e, "Failed to send call to worker");
                return Err(Error::delivery_failed(call.worker_id, e.to_string()));
            }
            Err(_) => return self.expire(&token, outcome_rx).await,
        }

        let mut outcome_rx = outcome_rx;
        match timeout_at(deadline, &mut outcome_rx).await {
            Ok(received) => received.map_err(|_| Error::ConnectionClosed)?,
            Err(_) => self.expire(&token, outcome_rx).await,
        }
    }

    /// Expires `token` and returns whatever outcome won the race.
    async fn expire(&self, token: &RequestToken, outcome_rx: OutcomeReceiver) -> Result<CallOutcome> {
        if self.correlation.expire(token, self.request_timeout) {
            warn!(%token, timeout_ms = self.request_timeout.as_millis() as u64, "Call timed out");
        }
        outcome_rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Discards a pending call when its dispatch future is dropped.
struct PendingGuard<'a> {
    correlation: &'a CorrelationTable,
    token: &'a RequestToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.correlation.discard(self.token) {
            debug!(token = %self.token, "Caller went away, pending call discarded");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
