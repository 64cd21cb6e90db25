//! Event types for scheduled calendar events.
//!
//! This module provides core types for representing events:
//! - [`Event`]: A persisted event with its notification state
//! - [`NewEvent`]: The payload used to create an event
//! - [`EventPatch`]: A partial update applied to matching events
//! - [`NotifyStatus`]: Where an event is in the notification lifecycle

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::time::DateRange;

/// Opaque unique identifier of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reference to the user owning an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where an event is in the notification lifecycle.
///
/// `None -> Blocked` happens atomically when a notifier claims a due event.
/// `Blocked -> Notified` happens once the mail has been sent. An event stays
/// `Blocked` if delivery fails after the claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    /// No notification has been attempted yet.
    #[default]
    None,
    /// A notifier claimed the event and is (or was) publishing it.
    Blocked,
    /// The owner has been notified.
    Notified,
}

impl NotifyStatus {
    /// Returns the stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Blocked => "blocked",
            Self::Notified => "notified",
        }
    }
}

impl fmt::Display for NotifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown notify status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown notify status: {0}")]
pub struct ParseNotifyStatusError(String);

impl FromStr for NotifyStatus {
    type Err = ParseNotifyStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "blocked" => Ok(Self::Blocked),
            "notified" => Ok(Self::Notified),
            other => Err(ParseNotifyStatusError(other.to_string())),
        }
    }
}

/// A scheduled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,
    /// Event title.
    pub title: String,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// Length of the event. Never negative.
    pub duration: Duration,
    /// Owner of the event.
    pub owner_id: OwnerId,
    /// Free-form description.
    pub description: Option<String>,
    /// Lead time before `start` at which the owner should be notified.
    pub notify_term: Duration,
    /// Notification lifecycle state.
    pub notify_status: NotifyStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Builds an event from a creation payload.
    pub fn create(new: NewEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            title: new.title,
            start: new.start,
            duration: new.duration,
            owner_id: new.owner_id,
            description: new.description,
            notify_term: new.notify_term,
            notify_status: NotifyStatus::None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the end instant (exclusive), saturating at the latest
    /// representable instant.
    pub fn end(&self) -> DateTime<Utc> {
        self.start
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the span this event occupies.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.duration)
    }

    /// Returns the instant at which a notification becomes due.
    pub fn notify_at(&self) -> DateTime<Utc> {
        self.start
            .checked_sub_signed(self.notify_term)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Returns true if the event should be notified at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.notify_status == NotifyStatus::None && self.notify_at() <= now
    }
}

/// Validation failure for event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    #[error("event title must not be empty")]
    EmptyTitle,
    #[error("event duration must not be negative")]
    NegativeDuration,
    #[error("notify term must not be negative")]
    NegativeNotifyTerm,
    #[error("owner id must not be empty")]
    EmptyOwner,
    #[error("event end or notification instant is out of range")]
    OutOfRange,
}

/// Rejects schedules whose end or notification instant cannot be represented.
fn check_schedule(
    start: DateTime<Utc>,
    duration: Duration,
    notify_term: Duration,
) -> Result<(), EventValidationError> {
    if start.checked_add_signed(duration).is_none()
        || start.checked_sub_signed(notify_term).is_none()
    {
        return Err(EventValidationError::OutOfRange);
    }
    Ok(())
}

/// Payload for creating an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub owner_id: OwnerId,
    pub description: Option<String>,
    pub notify_term: Duration,
}

impl NewEvent {
    /// Creates a payload with no description and a zero notify term.
    pub fn new(
        owner_id: impl Into<OwnerId>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            title: title.into(),
            start,
            duration,
            owner_id: owner_id.into(),
            description: None,
            notify_term: Duration::zero(),
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set notify term.
    pub fn with_notify_term(mut self, notify_term: Duration) -> Self {
        self.notify_term = notify_term;
        self
    }

    /// Returns the span the new event would occupy.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.duration)
    }

    /// Checks the payload for values the store must never persist.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.title.trim().is_empty() {
            return Err(EventValidationError::EmptyTitle);
        }
        if self.owner_id.as_str().is_empty() {
            return Err(EventValidationError::EmptyOwner);
        }
        if self.duration < Duration::zero() {
            return Err(EventValidationError::NegativeDuration);
        }
        if self.notify_term < Duration::zero() {
            return Err(EventValidationError::NegativeNotifyTerm);
        }
        check_schedule(self.start, self.duration, self.notify_term)
    }
}

/// A partial update. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub notify_term: Option<Duration>,
    pub notify_status: Option<NotifyStatus>,
}

impl EventPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a patch that only moves the notify status.
    pub fn status(status: NotifyStatus) -> Self {
        Self {
            notify_status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_notify_term(mut self, notify_term: Duration) -> Self {
        self.notify_term = Some(notify_term);
        self
    }

    pub fn with_notify_status(mut self, status: NotifyStatus) -> Self {
        self.notify_status = Some(status);
        self
    }

    /// Returns true if applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.start.is_none()
            && self.duration.is_none()
            && self.description.is_none()
            && self.notify_term.is_none()
            && self.notify_status.is_none()
    }

    /// Returns true if the patch moves or resizes the event.
    pub fn changes_schedule(&self) -> bool {
        self.start.is_some() || self.duration.is_some()
    }

    /// Returns the span `event` would occupy after this patch.
    pub fn range_for(&self, event: &Event) -> DateRange {
        DateRange::new(
            self.start.unwrap_or(event.start),
            self.duration.unwrap_or(event.duration),
        )
    }

    /// Checks the patch for values the store must never persist.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(EventValidationError::EmptyTitle);
        }
        if self.duration.is_some_and(|d| d < Duration::zero()) {
            return Err(EventValidationError::NegativeDuration);
        }
        if self.notify_term.is_some_and(|d| d < Duration::zero()) {
            return Err(EventValidationError::NegativeNotifyTerm);
        }
        Ok(())
    }

    /// Checks the schedule `event` would have after this patch.
    pub fn validate_for(&self, event: &Event) -> Result<(), EventValidationError> {
        self.validate()?;
        check_schedule(
            self.start.unwrap_or(event.start),
            self.duration.unwrap_or(event.duration),
            self.notify_term.unwrap_or(event.notify_term),
        )
    }

    /// Applies the patch and bumps `updated_at`.
    pub fn apply(&self, event: &mut Event, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(start) = self.start {
            event.start = start;
        }
        if let Some(duration) = self.duration {
            event.duration = duration;
        }
        if let Some(description) = &self.description {
            event.description = description.clone();
        }
        if let Some(notify_term) = self.notify_term {
            event.notify_term = notify_term;
        }
        if let Some(status) = self.notify_status {
            event.notify_status = status;
        }
        event.updated_at = now;
    }
}

/// Who receives the notification for an owner's events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

impl Recipient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}
