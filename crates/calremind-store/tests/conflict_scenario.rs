//! Booking scenarios run against every store backend.

use std::sync::Arc;

use calremind_core::{EventPatch, EventSearch, NewEvent};
use calremind_store::{Calendar, EventStore, InMemoryEventStore};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn utc(h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, h, min, 0).unwrap()
}

fn stores() -> Vec<Arc<dyn EventStore>> {
    #[allow(unused_mut)]
    let mut stores: Vec<Arc<dyn EventStore>> = vec![Arc::new(InMemoryEventStore::new())];
    #[cfg(feature = "sqlite")]
    stores.push(Arc::new(
        calremind_store::SqliteEventStore::open_in_memory().unwrap(),
    ));
    stores
}

#[tokio::test]
async fn overlapping_rejected_adjacent_accepted() {
    for store in stores() {
        let name = store.name().to_string();
        let cal = Calendar::new(store);

        // A: 10:00-11:00
        cal.create(NewEvent::new("u1", "A", utc(10, 0), Duration::hours(1)))
            .await
            .unwrap();

        // B: 10:30-11:30 collides with A
        let err = cal
            .create(NewEvent::new("u1", "B", utc(10, 30), Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(err.is_date_busy(), "{name}: {err}");

        // C: 11:00-11:30 only touches A
        cal.create(NewEvent::new("u1", "C", utc(11, 0), Duration::minutes(30)))
            .await
            .unwrap();

        let titles: Vec<_> = cal
            .list(EventSearch::new())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["A", "C"], "{name}");
    }
}

#[tokio::test]
async fn start_only_policy_accepts_event_inside_running_one() {
    for store in stores() {
        let name = store.name().to_string();
        let cal = Calendar::new(store).with_include_duration(false);

        cal.create(NewEvent::new("u1", "A", utc(10, 0), Duration::hours(1)))
            .await
            .unwrap();
        cal.create(NewEvent::new("u1", "B", utc(10, 30), Duration::hours(1)))
            .await
            .unwrap_or_else(|e| panic!("{name}: {e}"));

        // Same start instant still collides.
        let err = cal
            .create(NewEvent::new("u1", "C", utc(10, 0), Duration::minutes(5)))
            .await
            .unwrap_err();
        assert!(err.is_date_busy(), "{name}");
    }
}

#[tokio::test]
async fn zero_length_events_collide_at_same_instant() {
    for store in stores() {
        let cal = Calendar::new(store);
        cal.create(NewEvent::new("u1", "ping", utc(9, 0), Duration::zero()))
            .await
            .unwrap();

        assert!(
            cal.create(NewEvent::new("u1", "pong", utc(9, 0), Duration::zero()))
                .await
                .unwrap_err()
                .is_date_busy()
        );
        cal.create(NewEvent::new("u1", "later", utc(9, 1), Duration::zero()))
            .await
            .unwrap();
        // A range starting at the point covers it.
        assert!(
            cal.create(NewEvent::new("u1", "block", utc(8, 30), Duration::hours(1)))
                .await
                .unwrap_err()
                .is_date_busy()
        );
    }
}

#[tokio::test]
async fn reschedule_checks_conflicts() {
    for store in stores() {
        let cal = Calendar::new(store);
        cal.create(NewEvent::new("u1", "A", utc(10, 0), Duration::hours(1)))
            .await
            .unwrap();
        let b = cal
            .create(NewEvent::new("u1", "B", utc(12, 0), Duration::hours(1)))
            .await
            .unwrap();

        let err = cal
            .update(b.id, EventPatch::new().with_duration(Duration::hours(1)).with_start(utc(10, 59)))
            .await
            .unwrap_err();
        assert!(err.is_date_busy());

        let moved = cal
            .update(b.id, EventPatch::new().with_start(utc(11, 0)))
            .await
            .unwrap();
        assert_eq!(moved.start, utc(11, 0));
    }
}
