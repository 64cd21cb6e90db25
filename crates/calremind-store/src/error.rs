//! Error types for event store operations.

use calremind_core::{EventId, EventValidationError, OwnerId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A specialized Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// An error returned by an [`EventStore`](crate::EventStore) or the
/// [`Calendar`](crate::Calendar) service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The owner already has an event overlapping the requested slot.
    #[error("date busy: owner {owner} already has an event overlapping {start}")]
    DateBusy {
        owner: OwnerId,
        start: DateTime<Utc>,
    },

    /// No event with this id exists.
    #[error("event not found: {id}")]
    NotFound { id: EventId },

    /// The payload failed validation and was not persisted.
    #[error("invalid event: {0}")]
    Invalid(#[from] EventValidationError),

    /// The storage backend failed or holds data it cannot read back.
    #[error("store backend error: {message}")]
    Backend { message: String },

    /// SQLite reported an error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Creates a date-busy error.
    pub fn date_busy(owner: OwnerId, start: DateTime<Utc>) -> Self {
        Self::DateBusy { owner, start }
    }

    /// Creates a not-found error.
    pub fn not_found(id: EventId) -> Self {
        Self::NotFound { id }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true for the business conflict that callers report back to
    /// the user instead of retrying.
    pub fn is_date_busy(&self) -> bool {
        matches!(self, Self::DateBusy { .. })
    }
}
