//! The notification message published for each due event.

use calremind_core::{Event, EventId, Recipient, duration_nanos};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Asks the sender to remind `user_email` of an upcoming event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Event to confirm once the mail went out.
    pub event_id: EventId,
    pub title: String,
    pub start: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    pub user_name: String,
    pub user_email: String,
}

impl Notification {
    /// Builds the message for `event`, addressed to `recipient`.
    pub fn from_event(event: &Event, recipient: &Recipient) -> Self {
        Self {
            event_id: event.id,
            title: event.title.clone(),
            start: event.start,
            duration: event.duration,
            user_name: recipient.name.clone(),
            user_email: recipient.email.clone(),
        }
    }
}
