//! Error types for sqldesk.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for sqldesk operations.
#[derive(Error, Debug, Clone)]
pub enum SqldeskError {
    /// Database connection errors (incomplete descriptor, host unreachable, auth failed, bad file path)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, constraint violations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// The backend stopped the statement because its cancel/interrupt primitive fired.
    #[error("Query aborted: {0}")]
    Aborted(String),

    /// Configuration errors (invalid config file, bad connection string, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection catalog errors (migrations, CRUD failures).
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SqldeskError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an aborted-statement error with the backend's message.
    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a catalog error with the given message.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Aborted(_) => "Query Aborted",
            Self::Config(_) => "Configuration Error",
            Self::Catalog(_) => "Catalog Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Query(m)
            | Self::Aborted(m)
            | Self::Config(m)
            | Self::Catalog(m)
            | Self::Internal(m) => m,
        }
    }

    /// Returns true if the backend reported the statement as aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Result type alias using SqldeskError.
pub type Result<T> = std::result::Result<T, SqldeskError>;
