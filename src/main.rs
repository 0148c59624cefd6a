//! `api-relay` binary.
//!
//! Reads [`RelayConfig`] from the environment, serves until Ctrl+C, then
//! shuts down gracefully. Log verbosity follows `RUST_LOG`, defaulting to
//! `api_relay=info`.

// ============================================================================
// Imports
// ============================================================================

use std::process::ExitCode;

use api_relay::{AccountStore, JsonFileStore, RelayConfig, RelayServer, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    install_panic_hook();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = RelayConfig::from_env()?;

    let store = JsonFileStore::new(config.accounts_path.clone());
    match store.get_accounts().await {
        Ok(accounts) => info!(
            path = %store.path().display(),
            count = accounts.len(),
            "Account store ready"
        ),
        Err(e) => warn!(path = %store.path().display(), error = %e, "Account store unreadable"),
    }

    let server = RelayServer::bind(config).await?;
    let handle = server.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received");

    handle.shutdown().await
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("api_relay=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Routes panics through tracing so they land in the same log stream.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "Panic");
    }));
}
