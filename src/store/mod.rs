//! Account persistence.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `account` | Account record, creation fields and patches |
//! | `json_file` | [`AccountStore`] trait and its flat-file implementation |

// ============================================================================
// Submodules
// ============================================================================

/// Account records.
pub mod account;

/// Flat-file JSON account store.
pub mod json_file;

// ============================================================================
// Re-exports
// ============================================================================

pub use account::{Account, AccountPatch, NewAccount};
pub use json_file::{AccountStore, JsonFileStore, next_id};
