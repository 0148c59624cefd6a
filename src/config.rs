//! Relay configuration.
//!
//! Provides [`RelayConfig`] with defaults, a fluent builder, and loading
//! from environment variables.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use api_relay::RelayConfig;
//!
//! let config = RelayConfig::new()
//!     .with_port(0)
//!     .with_request_timeout(Duration::from_secs(5));
//! config.validate()?;
//! ```
//!
//! # Environment
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `PORT` | `port` | `3000` |
//! | `RELAY_HOST` | `host` | `0.0.0.0` |
//! | `RELAY_HEARTBEAT_INTERVAL_SECS` | `heartbeat_interval` | `30` |
//! | `RELAY_REQUEST_TIMEOUT_SECS` | `request_timeout` | `60` |
//! | `RELAY_MAX_RECONNECT_ATTEMPTS` | `max_reconnect_attempts` | `5` |
//! | `RELAY_ACCOUNTS_PATH` | `accounts_path` | `accounts.json` |

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default interval between liveness sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a call waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default ceiling for `reconnect` frames per connection.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

const DEFAULT_ACCOUNTS_PATH: &str = "accounts.json";

/// Upper bound for the heartbeat interval and the request timeout.
///
/// Keeps the doubled staleness threshold and every deadline representable.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ============================================================================
// RelayConfig
// ============================================================================

/// Runtime configuration for the relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to bind.
    pub host: IpAddr,

    /// Port shared by HTTP and worker WebSocket traffic (0 = OS assigned).
    pub port: u16,

    /// Period of the liveness sweep. Workers silent for twice this long are evicted.
    pub heartbeat_interval: Duration,

    /// How long a dispatched call waits for a reply.
    pub request_timeout: Duration,

    /// Number of `reconnect` frames a connection may send before it is closed.
    pub max_reconnect_attempts: u32,

    /// Location of the account store document.
    pub accounts_path: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            accounts_path: PathBuf::from(DEFAULT_ACCOUNTS_PATH),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from process environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed,
    /// or if the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = parse_var::<IpAddr>(&lookup, "RELAY_HOST")? {
            config.host = host;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "RELAY_HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "RELAY_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>(&lookup, "RELAY_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = max;
        }
        if let Some(path) = lookup("RELAY_ACCOUNTS_PATH") {
            config.accounts_path = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayConfig {
    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the listening port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the liveness sweep period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the per-call reply timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the reconnect ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    /// Sets the account store location.
    #[inline]
    #[must_use]
    pub fn with_accounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.accounts_path = path.into();
        self
    }
}

// ============================================================================
// Accessors & Validation
// ============================================================================

impl RelayConfig {
    /// Age after which a silent worker is evicted.
    #[inline]
    #[must_use]
    pub fn staleness_threshold(&self) -> Duration {
        self.heartbeat_interval.saturating_mul(2)
    }

    /// Socket address to bind.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Checks that all durations are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero heartbeat interval or request
    /// timeout, or for either one above [`MAX_DURATION`].
    pub fn validate(&self) -> Result<()> {
        check_duration("heartbeat interval", self.heartbeat_interval)?;
        check_duration("request timeout", self.request_timeout)
    }
}

fn check_duration(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    if value > MAX_DURATION {
        return Err(Error::config(format!(
            "{name} of {}s exceeds the maximum of {}s",
            value.as_secs(),
            MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::config(format!("{key}={raw:?} is invalid: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
