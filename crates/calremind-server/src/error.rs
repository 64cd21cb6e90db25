//! Server error types.

use std::io;

use calremind_protocol::ProtocolError;
use calremind_store::StoreError;
use thiserror::Error;

use crate::mail::MailError;
use crate::queue::QueueError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the notification pipeline.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (signal handlers, files).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Event store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Broker or queue connection error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Message encoding or decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Mail rendering or delivery error.
    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    /// No recipient is known for an event owner.
    #[error("no recipient for owner {owner}")]
    UnknownOwner { owner: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A scheduled action failed too many times in a row.
    #[error("action {action} stopped after {failures} consecutive failures")]
    ActionFailed { action: String, failures: u32 },

    /// Shutdown requested.
    #[error("shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unknown-owner error.
    pub fn unknown_owner(owner: impl Into<String>) -> Self {
        Self::UnknownOwner {
            owner: owner.into(),
        }
    }

    /// Creates an action-failed error.
    pub fn action_failed(action: impl Into<String>, failures: u32) -> Self {
        Self::ActionFailed {
            action: action.into(),
            failures,
        }
    }
}
