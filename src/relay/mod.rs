//! Relay core: shared state and call dispatch.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `broker` | Owns the tables, attaches sockets, drives the liveness sweep |
//! | `dispatcher` | Forwards one HTTP call and waits for its outcome |

// ============================================================================
// Submodules
// ============================================================================

/// Shared relay state and lifecycle.
pub mod broker;

/// HTTP-facing call dispatch.
pub mod dispatcher;

// ============================================================================
// Re-exports
// ============================================================================

pub use broker::Broker;
pub use dispatcher::Dispatcher;
