//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BASKET_API_BASE` - Base URL of the authoritative cart store (http/https)
//! - `BASKET_CHANNEL_URL` - WebSocket URL of the real-time channel (ws/wss)
//!
//! ## Optional
//! - `BASKET_CACHE_DIR` - Directory for the device cache file (default: `.basket`)
//! - `BASKET_DEBOUNCE_MS` - Batching debounce window (default: 500)
//! - `BASKET_MIN_FETCH_INTERVAL_SECS` - Authoritative fetch throttle (default: 60)
//! - `BASKET_CONNECT_TIMEOUT_SECS` - Channel connect timeout (default: 10)
//! - `BASKET_BACKOFF_BASE_MS` - First reconnect delay (default: 1000)
//! - `BASKET_BACKOFF_CEILING_MS` - Reconnect delay ceiling (default: 10000)
//! - `BASKET_MAX_RECONNECT_ATTEMPTS` - Attempts before giving up (default: 8)
//! - `BASKET_ECHO_WINDOW_MS` - Echo suppression window (default: 100)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart synchronization engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the authoritative cart store.
    pub api_base: Url,
    /// WebSocket URL of the real-time channel.
    pub channel_url: Url,
    /// Directory holding the per-device cache file.
    pub cache_dir: PathBuf,
    /// Quiet period before a burst of local mutations is flushed.
    pub debounce: Duration,
    /// Minimum interval between authoritative fetches.
    pub min_fetch_interval: Duration,
    /// How long a channel connection attempt may take before it is treated
    /// as failed.
    pub connect_timeout: Duration,
    /// First reconnect backoff delay.
    pub backoff_base: Duration,
    /// Reconnect backoff ceiling.
    pub backoff_ceiling: Duration,
    /// Reconnect attempts before the channel gives up for the session.
    pub max_reconnect_attempts: u32,
    /// How long inbound-applied changes suppress re-broadcast.
    pub echo_window: Duration,
}

impl SyncConfig {
    /// Create a configuration with default tuning for the given endpoints.
    ///
    /// Tests and embedders override individual fields afterwards; `from_env`
    /// is the production path.
    #[must_use]
    pub fn new(api_base: Url, channel_url: Url) -> Self {
        Self {
            api_base,
            channel_url,
            cache_dir: PathBuf::from(".basket"),
            debounce: Duration::from_millis(500),
            min_fetch_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(10),
            max_reconnect_attempts: 8,
            echo_window: Duration::from_millis(100),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base = get_url("BASKET_API_BASE")?;
        let channel_url = get_url("BASKET_CHANNEL_URL")?;

        let mut config = Self::new(api_base, channel_url);
        config.cache_dir = PathBuf::from(get_env_or_default("BASKET_CACHE_DIR", ".basket"));
        config.debounce = get_duration_ms("BASKET_DEBOUNCE_MS", 500)?;
        config.min_fetch_interval = get_duration_secs("BASKET_MIN_FETCH_INTERVAL_SECS", 60)?;
        config.connect_timeout = get_duration_secs("BASKET_CONNECT_TIMEOUT_SECS", 10)?;
        config.backoff_base = get_duration_ms("BASKET_BACKOFF_BASE_MS", 1_000)?;
        config.backoff_ceiling = get_duration_ms("BASKET_BACKOFF_CEILING_MS", 10_000)?;
        config.max_reconnect_attempts = get_parsed("BASKET_MAX_RECONNECT_ATTEMPTS", 8)?;
        config.echo_window = get_duration_ms("BASKET_ECHO_WINDOW_MS", 100)?;

        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable parsed as a URL.
fn get_url(key: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional environment variable parsed as `T`, falling back to a
/// default when unset.
fn get_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}

fn get_duration_ms(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(get_parsed(key, default_ms)?))
}

fn get_duration_secs(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(get_parsed(key, default_secs)?))
}
