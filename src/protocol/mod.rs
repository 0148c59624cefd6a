//! Relay message types.
//!
//! This module defines the JSON bodies exchanged with HTTP callers and the
//! frames exchanged with workers over their WebSocket.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`CallRequest`] | HTTP caller → relay | Ask a worker to run a call |
//! | [`OutboundFrame::ApiCall`] | relay → worker | Forwarded call with token |
//! | [`InboundFrame::Response`] | worker → relay | Reply carrying the token |
//! | [`CallOutcome`] | relay → HTTP caller | Worker's `result`/`error` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `call` | HTTP request/outcome bodies |
//! | `frame` | Worker socket frames |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP call request and outcome bodies.
pub mod call;

/// Worker socket frame types.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use call::{CallOutcome, CallRequest, ValidCall};
pub use frame::{InboundFrame, OutboundFrame};
