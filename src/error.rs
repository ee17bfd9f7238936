//! Error types for sqlrun.

use thiserror::Error;

/// The main error type for workload operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The run configuration is unusable. Always raised before any worker starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening or talking to the database failed at the transport level.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The database rejected or failed a statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// `run` was called while a previous run on the same driver is still active.
    #[error("A workload is already running on this driver")]
    AlreadyRunning,

    /// A query descriptor could not be serialized for the failed-query log.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Errors that must abort a run before it starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::AlreadyRunning)
    }

    /// Errors after which the connection that produced them should not be trusted.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

/// Result type alias for sqlrun operations.
pub type DriverResult<T> = Result<T, DriverError>;
