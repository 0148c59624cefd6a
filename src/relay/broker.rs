//! Shared relay state.
//!
//! The [`Broker`] owns the registry, liveness tracker and correlation
//! table, and is the single place where sockets are attached, the periodic
//! sweep is driven, and shutdown is coordinated.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{MAX_DURATION, RelayConfig};
use crate::identifiers::WorkerId;
use crate::transport::{
    ConnectionHandler, CorrelationTable, LivenessTracker, Registry, WorkerConnection,
};

use super::dispatcher::Dispatcher;

// ============================================================================
// Broker
// ============================================================================

/// Registry, liveness and correlation state shared by every task.
#[derive(Debug)]
pub struct Broker {
    config: RelayConfig,
    registry: Arc<Registry>,
    correlation: Arc<CorrelationTable>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Broker {
    /// Creates a broker with empty tables.
    #[must_use]
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let liveness = Arc::new(LivenessTracker::new(config.staleness_threshold()));
        let registry = Arc::new(Registry::new(liveness));
        let correlation = Arc::new(CorrelationTable::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&correlation),
            config.request_timeout,
        );

        Arc::new(Self {
            config,
            registry,
            correlation,
            dispatcher,
            shutdown: CancellationToken::new(),
        })
    }

    /// Relay configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Worker registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Liveness tracker.
    #[inline]
    #[must_use]
    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        self.registry.liveness()
    }

    /// Correlation table.
    #[inline]
    #[must_use]
    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    /// Call dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Token cancelled when the relay shuts down.
    #[inline]
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

// ============================================================================
// Broker - Sockets
// ============================================================================

impl Broker {
    /// Runs the relay protocol on an upgraded worker socket until it closes.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (connection, command_rx) = WorkerConnection::new();
        let handler = ConnectionHandler::new(
            connection,
            Arc::clone(&self.registry),
            Arc::clone(&self.correlation),
            self.config.max_reconnect_attempts,
        );

        handler
            .run(socket, command_rx, self.shutdown.child_token())
            .await;
    }
}

// ============================================================================
// Broker - Liveness Sweep
// ============================================================================

impl Broker {
    /// Evicts every worker whose heartbeat is stale right now.
    pub fn sweep(&self) -> Vec<WorkerId> {
        let now = Instant::now().into_std();
        self.liveness().sweep(&self.registry, now)
    }

    /// Spawns the periodic sweep, one run per heartbeat interval.
    ///
    /// The task stops when the broker shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        let period = self.config.heartbeat_interval.min(MAX_DURATION);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(period_ms = period.as_millis() as u64, "Liveness sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = broker.sweep();
                        if !evicted.is_empty() {
                            debug!(count = evicted.len(), "Liveness sweep evicted workers");
                        }
                    }
                    () = broker.shutdown.cancelled() => break,
                }
            }

            debug!("Liveness sweep stopped");
        })
    }
}

// ============================================================================
// Broker - Lifecycle
// ============================================================================

impl Broker {
    /// Stops the sweep, ends every socket loop, and unbinds all workers.
    ///
    /// Pending calls are left to their own timeouts.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        info!(
            workers = self.registry.len(),
            pending = self.correlation.len(),
            "Relay shutting down"
        );
        self.shutdown.cancel();
        self.registry.close_all();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn config() -> RelayConfig {
        RelayConfig::new()
            .with_port(0)
            .with_heartbeat_interval(Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_silent_worker() {
        let broker = Broker::new(config());
        let (connection, _rx) = WorkerConnection::new();
        let id = WorkerId::new("w1");
        broker.registry().register(id.clone(), connection.clone());

        let sweeper = broker.spawn_sweeper();

        // First sweep at 30s: 30s silent, not stale yet.
        time::sleep(Duration::from_secs(31)).await;
        assert!(broker.registry().lookup(&id).is_some());

        // Sweep at 90s sees 90s of silence (> 60s threshold).
        time::sleep(Duration::from_secs(60)).await;
        assert!(broker.registry().lookup(&id).is_none());
        assert!(connection.is_closed());

        broker.shutdown();
        sweeper.await.expect("sweeper exits on shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_heartbeating_worker() {
        let broker = Broker::new(config());
        let (connection, _rx) = WorkerConnection::new();
        let id = WorkerId::new("w1");
        let connection_id = connection.id();
        broker.registry().register(id.clone(), connection);

        let sweeper = broker.spawn_sweeper();

        for _ in 0..10 {
            time::sleep(Duration::from_secs(30)).await;
            assert!(broker.registry().heartbeat(&id, connection_id));
        }
        assert!(broker.registry().lookup(&id).is_some());

        broker.shutdown();
        sweeper.await.expect("sweeper exits on shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_closes_workers() {
        let broker = Broker::new(config());
        let (connection, _rx) = WorkerConnection::new();
        broker.registry().register(WorkerId::new("w1"), connection.clone());

        broker.shutdown();
        broker.shutdown();

        assert!(broker.shutdown_token().is_cancelled());
        assert!(broker.registry().is_empty());
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_unvalidated_huge_durations_do_not_panic() {
        let config = RelayConfig::new()
            .with_heartbeat_interval(Duration::from_secs(u64::MAX))
            .with_request_timeout(Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());

        let broker = Broker::new(config);
        assert_eq!(broker.liveness().threshold(), Duration::MAX);
        assert_eq!(broker.dispatcher().request_timeout(), MAX_DURATION);

        let sweeper = broker.spawn_sweeper();
        broker.shutdown();
        sweeper.await.expect("sweeper exits on shutdown");
    }

    #[test]
    fn test_liveness_threshold_follows_config() {
        let broker = Broker::new(config());
        assert_eq!(broker.liveness().threshold(), Duration::from_secs(60));
        assert_eq!(
            broker.dispatcher().request_timeout(),
            Duration::from_secs(60)
        );
    }
}
