//! EventStore trait definition.
//!
//! This module defines the [`EventStore`] trait, the persistence contract
//! shared by the in-memory and SQLite backends, and [`matches`], the
//! reference evaluation of an [`EventSearch`] against a single event.

use std::future::Future;
use std::pin::Pin;

use calremind_core::{Event, EventPatch, EventSearch, NewEvent, NotifyStatus};

use crate::error::StoreResult;

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe so stores can be shared as
/// `Arc<dyn EventStore>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence contract for events.
///
/// # Implementation Notes
///
/// - Every predicate set on an [`EventSearch`] must hold for an event to
///   match; an empty search matches every event.
/// - `update` must be atomic per call: two concurrent calls with the same
///   conditional search never both see the same event as matching. The
///   notifier relies on this to claim due events exactly once.
/// - `get_list` returns events ordered by `(start, id)`.
/// - Dropping a returned future abandons the operation.
pub trait EventStore: Send + Sync {
    /// Returns the name of this backend (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Validates and persists a new event, returning it with its id and
    /// timestamps filled in.
    fn add(&self, event: NewEvent) -> BoxFuture<'_, StoreResult<Event>>;

    /// Applies `patch` to every event matching `search`.
    ///
    /// Returns the number of events changed.
    fn update(&self, patch: EventPatch, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>>;

    /// Deletes every event matching `search`.
    ///
    /// Returns the number of events removed.
    fn delete(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>>;

    /// Lists every event matching `search`.
    fn get_list(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<Vec<Event>>>;
}

/// Checks one event against every predicate set on `search`.
pub fn matches(search: &EventSearch, event: &Event) -> bool {
    if search.id.is_some_and(|id| id != event.id) {
        return false;
    }
    if search.exclude_id.is_some_and(|id| id == event.id) {
        return false;
    }
    if let Some(owner) = &search.owner_id
        && *owner != event.owner_id
    {
        return false;
    }
    if let Some(filter) = &search.date_range
        && !filter.matches(&event.range())
    {
        return false;
    }
    if let Some(now) = search.due_at
        && !event.is_due(now)
    {
        return false;
    }
    if search
        .notify_status
        .is_some_and(|status| status != event.notify_status)
    {
        return false;
    }
    if let Some(at) = search.blocked_before
        && !(event.notify_status == NotifyStatus::Blocked && event.updated_at <= at)
    {
        return false;
    }
    if search.finished_before.is_some_and(|at| event.end() >= at) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use calremind_core::{DateRange, DateRangeFilter, EventId, OwnerId};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn utc(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 5, h, min, 0).unwrap()
    }

    fn event(owner: &str, h: u32, minutes: i64) -> Event {
        Event::create(
            NewEvent::new(owner, "meeting", utc(h, 0), Duration::minutes(minutes))
                .with_notify_term(Duration::minutes(30)),
            utc(0, 0),
        )
    }

    #[test]
    fn empty_search_matches_everything() {
        assert!(matches(&EventSearch::new(), &event("u1", 10, 60)));
    }

    #[test]
    fn id_and_exclude() {
        let e = event("u1", 10, 60);
        assert!(matches(&EventSearch::by_id(e.id), &e));
        assert!(!matches(&EventSearch::by_id(EventId::new()), &e));
        assert!(!matches(&EventSearch::new().excluding(e.id), &e));
    }

    #[test]
    fn owner_filter() {
        let e = event("u1", 10, 60);
        assert!(matches(&EventSearch::new().with_owner(OwnerId::new("u1")), &e));
        assert!(!matches(&EventSearch::new().with_owner(OwnerId::new("u2")), &e));
    }

    #[test]
    fn date_range_honours_include_duration() {
        let e = event("u1", 10, 60);
        let probe = DateRange::new(utc(10, 30), Duration::minutes(5));
        assert!(matches(
            &EventSearch::new().with_date_range(DateRangeFilter::overlapping(probe)),
            &e
        ));
        assert!(!matches(
            &EventSearch::new().with_date_range(DateRangeFilter::starting_within(probe)),
            &e
        ));
    }

    #[test]
    fn due_at_requires_status_none() {
        let mut e = event("u1", 10, 60);
        assert!(!matches(&EventSearch::new().due_at(utc(9, 29)), &e));
        assert!(matches(&EventSearch::new().due_at(utc(9, 30)), &e));

        e.notify_status = NotifyStatus::Blocked;
        assert!(!matches(&EventSearch::new().due_at(utc(9, 30)), &e));
    }

    #[test]
    fn blocked_before() {
        let mut e = event("u1", 10, 60);
        assert!(!matches(&EventSearch::new().blocked_before(utc(1, 0)), &e));

        e.notify_status = NotifyStatus::Blocked;
        e.updated_at = utc(0, 30);
        assert!(matches(&EventSearch::new().blocked_before(utc(1, 0)), &e));
        assert!(!matches(&EventSearch::new().blocked_before(utc(0, 29)), &e));
    }

    #[test]
    fn finished_before_is_strict() {
        let e = event("u1", 10, 60);
        assert!(!matches(&EventSearch::new().finished_before(utc(11, 0)), &e));
        assert!(matches(&EventSearch::new().finished_before(utc(11, 1)), &e));
    }
}
