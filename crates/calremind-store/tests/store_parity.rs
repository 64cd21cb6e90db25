//! The in-memory and SQLite stores must agree on every search predicate.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use calremind_core::{
    DateRange, DateRangeFilter, EventId, EventPatch, EventSearch, NewEvent, NotifyStatus, OwnerId,
};
use calremind_store::{EventStore, InMemoryEventStore, SqliteEventStore};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn utc(h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, h, min, 0).unwrap()
}

fn fixtures() -> Vec<NewEvent> {
    vec![
        NewEvent::new("u1", "a", utc(9, 0), Duration::minutes(60)),
        NewEvent::new("u1", "b", utc(10, 0), Duration::minutes(30)),
        NewEvent::new("u1", "point", utc(11, 0), Duration::zero()),
        NewEvent::new("u1", "long", utc(12, 0), Duration::hours(3))
            .with_notify_term(Duration::hours(4)),
        NewEvent::new("u2", "other", utc(10, 15), Duration::minutes(30)),
        NewEvent::new("u2", "past", utc(1, 0), Duration::minutes(30)),
    ]
}

fn searches() -> Vec<EventSearch> {
    let owner = OwnerId::new("u1");
    let ranges = [
        DateRange::new(utc(9, 30), Duration::minutes(60)),
        DateRange::new(utc(10, 0), Duration::minutes(60)),
        DateRange::new(utc(10, 30), Duration::minutes(30)),
        DateRange::new(utc(11, 0), Duration::minutes(1)),
        DateRange::point(utc(9, 0)),
        DateRange::point(utc(10, 0)),
        DateRange::point(utc(11, 0)),
        DateRange::point(utc(13, 0)),
        DateRange::between(utc(15, 0), utc(8, 0)),
    ];

    let mut searches = vec![
        EventSearch::new(),
        EventSearch::new().with_owner(owner.clone()),
        EventSearch::new().due_at(utc(8, 0)),
        EventSearch::new().due_at(utc(9, 59)),
        EventSearch::new().due_at(utc(23, 0)),
        EventSearch::new().with_notify_status(NotifyStatus::None),
        EventSearch::new().finished_before(utc(10, 0)),
        EventSearch::new().finished_before(utc(10, 30)),
        EventSearch::new().blocked_before(Utc::now() + Duration::hours(1)),
    ];
    for range in ranges {
        searches.push(
            EventSearch::new()
                .with_owner(owner.clone())
                .with_date_range(DateRangeFilter::overlapping(range)),
        );
        searches.push(
            EventSearch::new()
                .with_owner(owner.clone())
                .with_date_range(DateRangeFilter::starting_within(range)),
        );
    }
    searches
}

async fn seed(store: &dyn EventStore) -> Vec<(EventId, String)> {
    let mut ids = Vec::new();
    for new in fixtures() {
        let event = store.add(new).await.unwrap();
        ids.push((event.id, event.title));
    }
    ids
}

fn titles(events: &[calremind_core::Event]) -> Vec<String> {
    events.iter().map(|e| e.title.clone()).collect()
}

#[tokio::test]
async fn searches_agree() {
    let memory: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let sqlite: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open_in_memory().unwrap());
    seed(memory.as_ref()).await;
    seed(sqlite.as_ref()).await;

    for search in searches() {
        let a = memory.get_list(search.clone()).await.unwrap();
        let b = sqlite.get_list(search.clone()).await.unwrap();
        assert_eq!(titles(&a), titles(&b), "stores disagree on {search:?}");
    }
}

#[tokio::test]
async fn blocked_predicates_agree() {
    let memory: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let sqlite: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open_in_memory().unwrap());

    for store in [&memory, &sqlite] {
        let ids = seed(store.as_ref()).await;
        let (first, _) = ids[0];
        let claimed = store
            .update(
                EventPatch::status(NotifyStatus::Blocked),
                EventSearch::by_id(first).due_at(utc(23, 0)),
            )
            .await
            .unwrap();
        assert_eq!(claimed, 1, "{} claim", store.name());

        let again = store
            .update(
                EventPatch::status(NotifyStatus::Blocked),
                EventSearch::by_id(first).due_at(utc(23, 0)),
            )
            .await
            .unwrap();
        assert_eq!(again, 0, "{} second claim", store.name());
    }

    for search in [
        EventSearch::new().with_notify_status(NotifyStatus::Blocked),
        EventSearch::new().blocked_before(Utc::now() + Duration::hours(1)),
        EventSearch::new().blocked_before(Utc::now() - Duration::hours(1)),
        EventSearch::new().due_at(utc(23, 0)),
    ] {
        let a = memory.get_list(search.clone()).await.unwrap();
        let b = sqlite.get_list(search.clone()).await.unwrap();
        assert_eq!(titles(&a), titles(&b), "stores disagree on {search:?}");
    }
}

#[tokio::test]
async fn delete_counts_agree() {
    let memory: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let sqlite: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open_in_memory().unwrap());
    seed(memory.as_ref()).await;
    seed(sqlite.as_ref()).await;

    let search = EventSearch::new().finished_before(utc(10, 30));
    let a = memory.delete(search.clone()).await.unwrap();
    let b = sqlite.delete(search).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a, 2);
}
