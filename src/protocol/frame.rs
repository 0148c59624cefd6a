//! Worker socket frame types.
//!
//! Every frame is one JSON text message discriminated by its `type` field.
//!
//! # Inbound (worker → relay)
//!
//! ```json
//! {"type": "register", "id": "w1"}
//! {"type": "heartbeat"}
//! {"type": "response", "requestId": "…", "result": "pong"}
//! {"type": "reconnect"}
//! ```
//!
//! # Outbound (relay → worker)
//!
//! ```json
//! {"type": "heartbeat_request"}
//! {"type": "api_call", "requestId": "…", "apiname": "ping", "apiparams": {}}
//! {"type": "error", "error": "Maximum reconnection attempts reached"}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{RequestToken, WorkerId};

// ============================================================================
// InboundFrame
// ============================================================================

/// A frame received from a worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Bind this socket to a worker identity.
    Register {
        /// Identity the worker wants to be reachable under.
        id: WorkerId,
    },

    /// Liveness signal from a registered worker.
    Heartbeat,

    /// Reply to a previously forwarded call.
    Response {
        /// Token from the matching `api_call` frame.
        #[serde(rename = "requestId")]
        request_id: RequestToken,

        /// Call result, if any.
        #[serde(default)]
        result: Option<Value>,

        /// Worker-side error, if any.
        #[serde(default)]
        error: Option<Value>,
    },

    /// Worker announces it is reconnecting.
    Reconnect,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the text is not valid JSON or not
    /// one of the known frame types.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::malformed_frame(e.to_string()))
    }

    /// Returns the frame type name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Heartbeat => "heartbeat",
            Self::Response { .. } => "response",
            Self::Reconnect => "reconnect",
        }
    }
}

// ============================================================================
// OutboundFrame
// ============================================================================

/// A frame sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent once right after the socket is accepted.
    HeartbeatRequest,

    /// A call forwarded from an HTTP caller.
    ApiCall {
        /// Correlation token the worker must echo back.
        #[serde(rename = "requestId")]
        request_id: RequestToken,

        /// Name of the call.
        apiname: String,

        /// Call parameters, passed through untouched. Omitted when the
        /// caller sent none.
        #[serde(skip_serializing_if = "Value::is_null")]
        apiparams: Value,
    },

    /// Terminal error; the relay closes the socket after sending it.
    Error {
        /// Human readable reason.
        error: String,
    },
}

impl OutboundFrame {
    /// Serializes the frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
