//! Account records.
//!
//! Serialized in camelCase with RFC 3339 timestamps:
//!
//! ```json
//! {
//!   "id": "1",
//!   "name": "alice",
//!   "facebook": "https://facebook.com/alice",
//!   "instagram": "",
//!   "threads": "",
//!   "tiktok": "",
//!   "createdAt": "2026-01-01T00:00:00Z",
//!   "updatedAt": "2026-01-01T00:00:00Z"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Account
// ============================================================================

/// A stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Store-assigned id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Facebook profile URL.
    #[serde(default)]
    pub facebook: String,
    /// Instagram profile URL.
    #[serde(default)]
    pub instagram: String,
    /// Threads profile URL.
    #[serde(default)]
    pub threads: String,
    /// TikTok profile URL.
    #[serde(default)]
    pub tiktok: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Builds a record from `fields` with both timestamps set to `now`.
    #[must_use]
    pub fn create(id: String, fields: NewAccount, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: fields.name,
            facebook: fields.facebook,
            instagram: fields.instagram,
            threads: fields.threads,
            tiktok: fields.tiktok,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `patch` and bumps `updated_at`. Id and creation time stay.
    pub fn apply(&mut self, patch: AccountPatch, now: DateTime<Utc>) {
        let AccountPatch {
            name,
            facebook,
            instagram,
            threads,
            tiktok,
        } = patch;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(facebook) = facebook {
            self.facebook = facebook;
        }
        if let Some(instagram) = instagram {
            self.instagram = instagram;
        }
        if let Some(threads) = threads {
            self.threads = threads;
        }
        if let Some(tiktok) = tiktok {
            self.tiktok = tiktok;
        }
        self.updated_at = now;
    }
}

// ============================================================================
// NewAccount / AccountPatch
// ============================================================================

/// Fields supplied when adding an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewAccount {
    pub name: String,
    pub facebook: String,
    pub instagram: String,
    pub threads: String,
    pub tiktok: String,
}

impl NewAccount {
    /// Creates an account with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub facebook: Option<String>,
    pub instagram: Option<String>,
    pub threads: Option<String>,
    pub tiktok: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
