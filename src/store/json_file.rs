//! Flat-file JSON account store.
//!
//! The whole store is one JSON array. Every mutation reads the document,
//! changes it in memory, and writes it back through a temp file and a
//! rename, so readers never observe a half-written file. Mutations are
//! serialized behind an async mutex.

// ============================================================================
// Imports
// ============================================================================

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

use super::account::{Account, AccountPatch, NewAccount};

// ============================================================================
// AccountStore
// ============================================================================

/// Durable account persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Returns every account in insertion order.
    async fn get_accounts(&self) -> Result<Vec<Account>>;

    /// Stores a new account and returns it with its assigned id.
    async fn add_account(&self, account: NewAccount) -> Result<Account>;

    /// Applies `patch` to account `id` and returns the updated record.
    ///
    /// Returns [`Error::AccountNotFound`] if `id` does not exist.
    async fn update_account(&self, id: &str, patch: AccountPatch) -> Result<Account>;

    /// Removes account `id` and returns the removed record.
    ///
    /// Returns [`Error::AccountNotFound`] if `id` does not exist.
    async fn delete_account(&self, id: &str) -> Result<Account>;
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// [`AccountStore`] backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store over `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the document path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document. A missing or empty file is an empty store.
    async fn load(&self) -> Result<Vec<Account>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::store(format!("{} is not an account list: {e}", self.path.display()))
        })
    }

    /// Replaces the document atomically.
    async fn save(&self, accounts: &[Account]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(accounts)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = accounts.len(), "Accounts saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
    async fn get_accounts(&self) -> Result<Vec<Account>> {
        self.load().await
    }

    async fn add_account(&self, account: NewAccount) -> Result<Account> {
        let _guard = self.write_lock.lock().await;

        let mut accounts = self.load().await?;
        let account = Account::create(next_id(&accounts), account, Utc::now());
        accounts.push(account.clone());
        self.save(&accounts).await?;

        debug!(id = %account.id, "Account added");
        Ok(account)
    }

    async fn update_account(&self, id: &str, patch: AccountPatch) -> Result<Account> {
        let _guard = self.write_lock.lock().await;

        let mut accounts = self.load().await?;
        let account = accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::account_not_found(id))?;
        account.apply(patch, Utc::now());
        let updated = account.clone();
        self.save(&accounts).await?;

        debug!(id, "Account updated");
        Ok(updated)
    }

    async fn delete_account(&self, id: &str) -> Result<Account> {
        let _guard = self.write_lock.lock().await;

        let mut accounts = self.load().await?;
        let index = accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| Error::account_not_found(id))?;
        let removed = accounts.remove(index);
        self.save(&accounts).await?;

        debug!(id, "Account deleted");
        Ok(removed)
    }
}

// ============================================================================
// Id Assignment
// ============================================================================

/// Next id: one past the largest numeric id, `"1"` when there is none.
///
/// Non-numeric ids are ignored.
#[must_use]
pub fn next_id(accounts: &[Account]) -> String {
    accounts
        .iter()
        .filter_map(|a| a.id.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max.saturating_add(1))
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================
