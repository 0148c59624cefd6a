//! API Relay - HTTP to WebSocket call broker.
//!
//! Lets HTTP callers invoke named operations on remote worker processes
//! that keep a persistent WebSocket open to the relay.
//!
//! # Architecture
//!
//! - **Workers** connect over WebSocket, `register` under an identity, and
//!   keep the binding alive with `heartbeat` frames
//! - **Callers** `POST /call` with `{id, apiname, apiparams}`; the relay
//!   forwards an `api_call` frame carrying a fresh correlation token and
//!   holds the HTTP request open until the matching `response` arrives or
//!   the request timeout fires
//!
//! Key properties:
//!
//! - At most one live connection per worker identity; the last `register`
//!   wins
//! - Every call gets exactly one outcome: reply, timeout, or failure
//! - Silent workers are evicted after two heartbeat intervals
//! - Nothing is persisted; pending calls die with the process
//!
//! # Quick Start
//!
//! ```no_run
//! use api_relay::{RelayConfig, RelayServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::bind(RelayConfig::new().with_port(3000)).await?;
//!     let handle = server.spawn();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`RelayConfig`] and environment loading |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Worker, token and connection ids |
//! | [`protocol`] | Worker frames and HTTP call bodies |
//! | [`relay`] | [`Broker`] and [`Dispatcher`] |
//! | [`server`] | [`RelayServer`] and its routes |
//! | [`store`] | Account persistence |
//! | [`transport`] | Registry, liveness, correlation, socket handler |

// ============================================================================
// Modules
// ============================================================================

/// Relay configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire types.
///
/// Worker frames and the `POST /call` request and outcome bodies.
pub mod protocol;

/// Relay core: shared state and call dispatch.
pub mod relay;

/// HTTP and WebSocket front door.
pub mod server;

/// Account persistence.
pub mod store;

/// Worker WebSocket transport layer.
///
/// Registry, liveness tracking, correlation and the per-socket handler.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config
pub use config::RelayConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestToken, WorkerId};

// Protocol types
pub use protocol::{CallOutcome, CallRequest, InboundFrame, OutboundFrame};

// Relay core
pub use relay::{Broker, Dispatcher};

// Server
pub use server::{RelayHandle, RelayServer};

// Store
pub use store::{Account, AccountPatch, AccountStore, JsonFileStore, NewAccount};
