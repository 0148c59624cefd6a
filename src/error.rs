//! Error types for the API relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use api_relay::{Error, Result};
//!
//! async fn example(dispatcher: &Dispatcher, call: CallRequest) -> Result<()> {
//!     let outcome = dispatcher.dispatch(call).await?;
//!     println!("{:?}", outcome.result);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | HTTP |
//! |----------|----------|------|
//! | Caller | [`Error::InvalidRequest`] | 400 |
//! | Routing | [`Error::WorkerUnavailable`] | 404 |
//! | Transport | [`Error::DeliveryFailed`], [`Error::ConnectionClosed`] | 500 |
//! | Timing | [`Error::Timeout`] | 504 |
//! | Worker protocol | [`Error::ReconnectLimitExceeded`], [`Error::MalformedFrame`] | never surfaced |
//! | Collaborators | [`Error::Config`], [`Error::AccountNotFound`], [`Error::Store`] | 500 / 404 |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] | 500 |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::identifiers::{RequestToken, WorkerId};

// ============================================================================
// Public Messages
// ============================================================================

/// Body message for a call that is missing `id` or `apiname`.
pub const MSG_MISSING_PARAMETERS: &str = "Missing required parameters";

/// Body message for a call addressed to a worker that is not connected.
pub const MSG_CLIENT_NOT_CONNECTED: &str = "Client not connected";

/// Body message for a call that could not be written to the worker socket.
pub const MSG_SEND_FAILED: &str = "Failed to send request to client";

/// Body message for a call that received no reply in time.
pub const MSG_TIMEOUT: &str = "Timeout waiting for response";

/// Body of the terminal error frame sent when the reconnect ceiling is hit.
pub const MSG_RECONNECT_LIMIT: &str = "Maximum reconnection attempts reached";

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. The text returned
/// to HTTP callers is [`Error::public_message`], not the `Display` output.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Call Errors
    // ========================================================================
    /// A required call field is missing or the body is unreadable.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// No live connection is registered for the worker identity.
    #[error("Worker not connected: {worker_id}")]
    WorkerUnavailable {
        /// The worker the call was addressed to.
        worker_id: WorkerId,
    },

    /// The call frame could not be written to the worker socket.
    #[error("Failed to deliver call to {worker_id}: {message}")]
    DeliveryFailed {
        /// The worker the call was addressed to.
        worker_id: WorkerId,
        /// Transport failure description.
        message: String,
    },

    /// No reply arrived within the request timeout window.
    #[error("Request {token} timed out after {timeout_ms}ms")]
    Timeout {
        /// Correlation token of the expired call.
        token: RequestToken,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Worker Protocol Errors
    // ========================================================================
    /// A connection sent more `reconnect` frames than allowed.
    #[error("Reconnect limit exceeded: {attempts} attempts (max {max})")]
    ReconnectLimitExceeded {
        /// Attempts counted on this connection.
        attempts: u32,
        /// Configured ceiling.
        max: u32,
    },

    /// An inbound frame could not be parsed.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Parser diagnostic.
        message: String,
    },

    /// The worker connection is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Account id does not exist in the store.
    #[error("Account not found: {id}")]
    AccountNotFound {
        /// The missing account id.
        id: String,
    },

    /// The account document is unreadable or inconsistent.
    #[error("Store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid request error.
    #[inline]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a worker unavailable error.
    #[inline]
    pub fn worker_unavailable(worker_id: WorkerId) -> Self {
        Self::WorkerUnavailable { worker_id }
    }

    /// Creates a delivery failed error.
    #[inline]
    pub fn delivery_failed(worker_id: WorkerId, message: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            worker_id,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(token: RequestToken, timeout_ms: u64) -> Self {
        Self::Timeout { token, timeout_ms }
    }

    /// Creates a reconnect limit error.
    #[inline]
    pub fn reconnect_limit_exceeded(attempts: u32, max: u32) -> Self {
        Self::ReconnectLimitExceeded { attempts, max }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an account not found error.
    #[inline]
    pub fn account_not_found(id: impl Into<String>) -> Self {
        Self::AccountNotFound { id: id.into() }
    }

    /// Creates a store error.
    #[inline]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a worker transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::WorkerUnavailable { .. }
                | Self::DeliveryFailed { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the caller caused the error.
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

// ============================================================================
// HTTP Mapping
// ============================================================================

impl Error {
    /// Returns the HTTP status this error is surfaced as.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::WorkerUnavailable { .. } | Self::AccountNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::DeliveryFailed { .. }
            | Self::ConnectionClosed
            | Self::ReconnectLimitExceeded { .. }
            | Self::MalformedFrame { .. }
            | Self::Config { .. }
            | Self::Store { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::WebSocket(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message placed in the `error` field of an HTTP body.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest { .. } => MSG_MISSING_PARAMETERS.to_string(),
            Self::WorkerUnavailable { .. } => MSG_CLIENT_NOT_CONNECTED.to_string(),
            Self::DeliveryFailed { .. } | Self::ConnectionClosed => MSG_SEND_FAILED.to_string(),
            Self::Timeout { .. } => MSG_TIMEOUT.to_string(),
            Self::ReconnectLimitExceeded { .. } => MSG_RECONNECT_LIMIT.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
