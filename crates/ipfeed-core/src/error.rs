//! Error types for the collection pipeline
//!
//! This module defines all error types used throughout the crate.
//!
//! Propagation policy:
//! - `Network` and `Parse` errors are swallowed at strategy/record level and
//!   only ever show up in attempt reports.
//! - `Authentication` and `Storage` errors abort a run and surface in its
//!   outcome.
//! - `ScheduleConfig` errors are rejected synchronously and never reach the
//!   scheduler loop.

use thiserror::Error;

/// Result type alias for collection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the collection pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Login handshake against the portal failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Timeout, connection reset, unexpected HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed page, spreadsheet or JSON payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Record store failure (connection loss, constraint violation)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid schedule parameters (interval out of range, unknown source)
    #[error("Schedule configuration error: {0}")]
    ScheduleConfig(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown source or record
    #[error("Not found: {0}")]
    NotFound(String),

    /// A run for this source is already in flight
    #[error("Collection already running for source: {0}")]
    RunInProgress(String),

    /// The run was stopped at a cancellation checkpoint
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local I/O errors (temporary artifacts)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a schedule configuration error
    pub fn schedule_config(msg: impl Into<String>) -> Self {
        Self::ScheduleConfig(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Whether this error must abort the run it happened in
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Storage(_) | Self::Cancelled(_)
        )
    }
}

/// Transport errors from the portal client are network errors unless they
/// come from decoding a body.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
