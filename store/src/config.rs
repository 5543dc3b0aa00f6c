//! Configuration management for the stores.

use std::env;
use std::time::Duration;

const DEFAULT_LOCAL_URL: &str = "sqlite://replist.db?mode=rwc";

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite URL of the local mirror
    pub local_url: String,
    /// PostgreSQL connection URL of the remote, if any
    pub remote_url: Option<String>,
    /// Upper bound of pooled remote connections
    pub max_connections: u32,
    /// How long to wait for a remote connection before treating it as down
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            local_url: DEFAULT_LOCAL_URL.to_string(),
            remote_url: None,
            max_connections: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let local_url = lookup("LOCAL_DATABASE_URL").unwrap_or(defaults.local_url);

        let remote_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections(raw))?,
            None => defaults.max_connections,
        };

        let connect_timeout = match lookup("DB_CONNECT_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidConnectTimeout(raw))?,
            None => defaults.connect_timeout,
        };

        Ok(Self {
            local_url,
            remote_url,
            max_connections,
            connect_timeout,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required for a remote store")]
    MissingDatabaseUrl,

    #[error("Invalid DB_MAX_CONNECTIONS value: {0}")]
    InvalidMaxConnections(String),

    #[error("Invalid DB_CONNECT_TIMEOUT_SECS value: {0}")]
    InvalidConnectTimeout(String),
}
