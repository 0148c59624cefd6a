//! HTTP call request and outcome bodies.
//!
//! # Request
//!
//! ```json
//! { "id": "w1", "apiname": "get_url_list", "apiparams": {} }
//! ```
//!
//! # Outcome
//!
//! Whatever the worker put in its `response` frame; absent fields are omitted.
//!
//! ```json
//! { "result": ["https://…"] }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::WorkerId;

// ============================================================================
// CallRequest
// ============================================================================

/// Body of `POST /call`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CallRequest {
    /// Target worker identity.
    #[serde(default)]
    pub id: Option<String>,

    /// Name of the call to run on the worker.
    #[serde(default)]
    pub apiname: Option<String>,

    /// Parameters forwarded to the worker untouched.
    #[serde(default)]
    pub apiparams: Value,
}

impl CallRequest {
    /// Creates a call request.
    #[must_use]
    pub fn new(id: impl Into<String>, apiname: impl Into<String>, apiparams: Value) -> Self {
        Self {
            id: Some(id.into()),
            apiname: Some(apiname.into()),
            apiparams,
        }
    }

    /// Checks required fields and splits the request into its parts.
    ///
    /// Empty strings count as missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `id` or `apiname` is missing.
    pub fn validate(self) -> Result<ValidCall> {
        let worker_id = match self.id {
            Some(id) if !id.is_empty() => WorkerId::from(id),
            _ => return Err(Error::invalid_request("missing `id`")),
        };
        let apiname = match self.apiname {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::invalid_request("missing `apiname`")),
        };

        Ok(ValidCall {
            worker_id,
            apiname,
            apiparams: self.apiparams,
        })
    }
}

/// A call request whose required fields are present.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCall {
    /// Target worker.
    pub worker_id: WorkerId,
    /// Call name.
    pub apiname: String,
    /// Call parameters.
    pub apiparams: Value,
}

// ============================================================================
// CallOutcome
// ============================================================================

/// The worker-delivered outcome of a call, returned to HTTP callers as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Worker-side error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl CallOutcome {
    /// Creates a successful outcome.
    #[inline]
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    /// Returns `true` if the worker reported an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

// ============================================================================
// Tests
// ============================================================================
