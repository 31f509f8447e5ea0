//! Configuration management for sqldesk.
//!
//! Handles loading configuration from TOML files and environment variables,
//! with support for named database connections and execution settings.

use crate::db::{ConnectionDescriptor, DEFAULT_PORT};
use crate::error::{Result, SqldeskError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default watchdog duration in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default size of the worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Main configuration structure for sqldesk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Query execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Connection catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Named database connections.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionDescriptor>,
}

/// Query execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Watchdog duration applied to every submission.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Number of queries that may run at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_workers: default_max_workers(),
        }
    }
}

impl ExecutionConfig {
    /// Returns the watchdog duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connection catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    /// Catalog database file; defaults to the platform config directory.
    pub path: Option<PathBuf>,
}

impl CatalogConfig {
    /// Returns the configured catalog path or the platform default.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_catalog_path)
    }
}

/// Returns the default catalog database path.
pub fn default_catalog_path() -> PathBuf {
    config_dir().join("catalog.db")
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqldesk")
}

/// Network connection parameters assembled from CLI flags.
///
/// Every field is optional so that flags, a connection string and `PG*`
/// environment variables can be layered before building a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: Option<String>,

    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: Option<String>,

    /// Database user.
    pub user: Option<String>,

    /// Database password (not recommended to store in config).
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            database: None,
            user: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Returns true if no parameter was given.
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.database.is_none()
            && self.user.is_none()
            && self.password.is_none()
            && self.port == default_port()
    }

    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &ConnectionConfig) {
        if other.host.is_some() {
            self.host = other.host.clone();
        }
        if other.port != default_port() {
            self.port = other.port;
        }
        if other.database.is_some() {
            self.database = other.database.clone();
        }
        if other.user.is_some() {
            self.user = other.user.clone();
        }
        if other.password.is_some() {
            self.password = other.password.clone();
        }
    }

    /// Applies environment variables (PGHOST, PGPORT, etc.) as defaults.
    pub fn apply_env_defaults(&mut self) {
        self.apply_defaults_from(|key| std::env::var(key).ok());
    }

    fn apply_defaults_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.host.is_none() {
            self.host = lookup("PGHOST");
        }
        if self.port == default_port() {
            if let Some(port) = lookup("PGPORT").and_then(|p| p.parse().ok()) {
                self.port = port;
            }
        }
        if self.database.is_none() {
            self.database = lookup("PGDATABASE");
        }
        if self.user.is_none() {
            self.user = lookup("PGUSER");
        }
        if self.password.is_none() {
            self.password = lookup("PGPASSWORD");
        }
    }

    /// Builds a network descriptor; missing fields are left empty so that
    /// validation at connect time names them.
    pub fn to_descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::network(
            self.host.clone().unwrap_or_default(),
            self.port,
            self.database.clone().unwrap_or_default(),
            self.user.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_default(),
        )
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Loads configuration from a TOML file; a missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SqldeskError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            SqldeskError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.execution.timeout_ms == 0 {
            return Err(SqldeskError::config(format!(
                "Configuration error in {}:\n  execution.timeout_ms must be greater than 0",
                path.display()
            )));
        }
        if self.execution.max_workers == 0 {
            return Err(SqldeskError::config(format!(
                "Configuration error in {}:\n  execution.max_workers must be greater than 0",
                path.display()
            )));
        }
        Ok(())
    }

    /// Gets a named connection.
    pub fn get_connection(&self, name: &str) -> Option<&ConnectionDescriptor> {
        self.connections.get(name)
    }
}
