//! CLI error types.

use calremind_core::TracingError;
use calremind_server::ServerError;
use calremind_store::StoreError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the `calremind` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A secret reference could not be resolved.
    #[error("secret error: {0}")]
    Secret(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// A pipeline task panicked or was aborted.
    #[error("task {task} ended abnormally: {message}")]
    Task { task: String, message: String },

    #[error("logging setup failed: {0}")]
    Tracing(#[from] TracingError),
}

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
