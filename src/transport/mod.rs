//! Worker WebSocket transport layer.
//!
//! This module owns everything that touches worker sockets: the registry of
//! live connections, liveness tracking, the correlation table, and the
//! per-socket protocol handler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  api_call   ┌──────────────────┐       ┌──────────┐
//! │  Dispatcher  │────────────►│ WorkerConnection │──────►│  Worker  │
//! │              │             │  (command chan)  │  WS   │ process  │
//! │              │◄──oneshot───│                  │◄──────│          │
//! └──────┬───────┘             └──────────────────┘       └──────────┘
//!        │ create/expire              ▲ register/remove
//!        ▼                            │
//! ┌──────────────────┐    ┌───────────┴──────────┐
//! │ CorrelationTable │◄───│  ConnectionHandler   │
//! └──────────────────┘    │  (per-socket loop)   │
//!                         └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Cloneable handle to a worker socket |
//! | `correlation` | Token → pending call map |
//! | `handler` | Per-socket state machine and event loop |
//! | `liveness` | Heartbeat timestamps and stale sweep |
//! | `registry` | Worker identity → connection map |

// ============================================================================
// Submodules
// ============================================================================

/// Cloneable handle to a worker socket.
pub mod connection;

/// Correlation of replies to waiting calls.
pub mod correlation;

/// Per-connection relay protocol handler.
pub mod handler;

/// Heartbeat-based liveness tracking.
pub mod liveness;

/// Registry of live worker connections.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionCommand, WorkerConnection};
pub use correlation::{CallResult, CorrelationTable};
pub use handler::{ConnectionHandler, ConnectionState, FrameAction};
pub use liveness::LivenessTracker;
pub use registry::Registry;
