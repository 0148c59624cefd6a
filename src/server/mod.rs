//! HTTP and WebSocket front door.
//!
//! One listener serves both surfaces: callers `POST /call`, workers upgrade
//! on `/` or `/ws`.
//!
//! # Lifecycle
//!
//! 1. [`RelayServer::bind`] validates the config and binds the listener
//! 2. [`RelayServer::spawn`] starts serving and the liveness sweep
//! 3. [`RelayHandle::shutdown`] stops accepting, closes every worker, and
//!    waits for the server task
//!
//! # Example
//!
//! ```ignore
//! use api_relay::{RelayConfig, RelayServer};
//!
//! let server = RelayServer::bind(RelayConfig::from_env()?).await?;
//! let handle = server.spawn();
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown().await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Route table and request handlers.
pub mod http;

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::relay::Broker;

// ============================================================================
// RelayServer
// ============================================================================

/// A relay that is bound but not yet serving.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    broker: Arc<Broker>,
}

impl RelayServer {
    /// Binds the listener described by `config`.
    ///
    /// Use port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the config is invalid
    /// - [`Error::Io`] if binding fails
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            "Relay listening"
        );

        Ok(Self {
            listener,
            local_addr,
            broker: Broker::new(config),
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the shared relay state.
    #[inline]
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Returns the router this server will serve.
    #[must_use]
    pub fn router(&self) -> Router {
        http::router(Arc::clone(&self.broker))
    }

    /// Serves until the broker shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the accept loop fails.
    pub async fn serve(self) -> Result<()> {
        let router = self.router();
        let sweeper = self.broker.spawn_sweeper();
        let shutdown = self.broker.shutdown_token().clone();

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        let _ = sweeper.await;
        debug!(addr = %self.local_addr, "Relay stopped");
        Ok(())
    }

    /// Serves on a background task.
    #[must_use]
    pub fn spawn(self) -> RelayHandle {
        let addr = self.local_addr;
        let broker = Arc::clone(&self.broker);
        let task = tokio::spawn(self.serve());

        RelayHandle { addr, broker, task }
    }
}

// ============================================================================
// RelayHandle
// ============================================================================

/// Handle to a relay serving on a background task.
pub struct RelayHandle {
    addr: SocketAddr,
    broker: Arc<Broker>,
    task: JoinHandle<Result<()>>,
}

impl RelayHandle {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the shared relay state.
    #[inline]
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Shuts the relay down and waits for the server task.
    ///
    /// # Errors
    ///
    /// Returns the server task's error, or [`Error::Io`] if it panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.broker.shutdown();

        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(IoError::other(e))),
        }
    }
}
