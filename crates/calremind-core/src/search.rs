//! Query descriptor for event stores.
//!
//! [`EventSearch`] is a flat set of optional predicates. Every predicate that
//! is set must hold for an event to match; an empty search matches every
//! event. The struct only describes a query: each store decides how to
//! evaluate it.

use chrono::{DateTime, Utc};

use crate::event::{EventId, NotifyStatus, OwnerId};
use crate::time::{DateRange, DateRangeFilter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSearch {
    /// Only the event with this id.
    pub id: Option<EventId>,
    /// Every event except this one.
    pub exclude_id: Option<EventId>,
    /// Only events of this owner.
    pub owner_id: Option<OwnerId>,
    /// Only events overlapping (or starting within) a range.
    pub date_range: Option<DateRangeFilter>,
    /// Only events due at this instant: status `none` and
    /// `start - notify_term <= due_at`.
    pub due_at: Option<DateTime<Utc>>,
    /// Only events with this notify status.
    pub notify_status: Option<NotifyStatus>,
    /// Only `blocked` events last touched at or before this instant.
    pub blocked_before: Option<DateTime<Utc>>,
    /// Only events that ended strictly before this instant.
    pub finished_before: Option<DateTime<Utc>>,
}

impl EventSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search for a single event by id.
    pub fn by_id(id: EventId) -> Self {
        Self::new().with_id(id)
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn excluding(mut self, id: EventId) -> Self {
        self.exclude_id = Some(id);
        self
    }

    pub fn with_owner(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_date_range(mut self, filter: DateRangeFilter) -> Self {
        self.date_range = Some(filter);
        self
    }

    /// Shorthand for a range filter that includes event durations.
    pub fn overlapping(self, range: DateRange) -> Self {
        self.with_date_range(DateRangeFilter::overlapping(range))
    }

    pub fn due_at(mut self, now: DateTime<Utc>) -> Self {
        self.due_at = Some(now);
        self
    }

    pub fn with_notify_status(mut self, status: NotifyStatus) -> Self {
        self.notify_status = Some(status);
        self
    }

    pub fn blocked_before(mut self, at: DateTime<Utc>) -> Self {
        self.blocked_before = Some(at);
        self
    }

    pub fn finished_before(mut self, at: DateTime<Utc>) -> Self {
        self.finished_before = Some(at);
        self
    }

    /// Returns true if no predicate is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_predicates() {
        let id = EventId::new();
        let other = EventId::new();
        let now = Utc::now();
        let search = EventSearch::by_id(id)
            .excluding(other)
            .with_owner(OwnerId::new("u1"))
            .overlapping(DateRange::point(now))
            .due_at(now);

        assert_eq!(search.id, Some(id));
        assert_eq!(search.exclude_id, Some(other));
        assert_eq!(search.owner_id, Some(OwnerId::new("u1")));
        assert!(search.date_range.unwrap().include_duration);
        assert_eq!(search.due_at, Some(now));
        assert!(!search.is_empty());
    }

    #[test]
    fn default_search_is_empty() {
        assert!(EventSearch::new().is_empty());
    }
}
