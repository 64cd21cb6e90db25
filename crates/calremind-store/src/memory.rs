//! In-memory event store.

use std::collections::HashMap;

use calremind_core::{Event, EventId, EventPatch, EventSearch, NewEvent};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreResult;
use crate::store::{BoxFuture, EventStore, matches};

/// An [`EventStore`] backed by a `HashMap` behind a tokio `RwLock`.
///
/// Each `update` and `delete` runs entirely under one write lock, which
/// makes conditional updates atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<EventId, Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl EventStore for InMemoryEventStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn add(&self, new: NewEvent) -> BoxFuture<'_, StoreResult<Event>> {
        Box::pin(async move {
            new.validate()?;
            let event = Event::create(new, Utc::now());
            self.events.write().await.insert(event.id, event.clone());
            debug!(event_id = %event.id, owner = %event.owner_id, "event added");
            Ok(event)
        })
    }

    fn update(&self, patch: EventPatch, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            patch.validate()?;
            let now = Utc::now();
            let mut events = self.events.write().await;
            let mut changed = 0;
            for event in events.values_mut() {
                if matches(&search, event) {
                    patch.apply(event, now);
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn delete(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|_, event| !matches(&search, event));
            Ok(before - events.len())
        })
    }

    fn get_list(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<Vec<Event>>> {
        Box::pin(async move {
            let events = self.events.read().await;
            let mut found: Vec<Event> = events
                .values()
                .filter(|event| matches(&search, event))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
            Ok(found)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use calremind_core::NotifyStatus;
    use chrono::{DateTime, Duration, TimeZone};

    fn utc(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn add_assigns_id_and_status() {
        let store = InMemoryEventStore::new();
        let event = store
            .add(NewEvent::new("u1", "Lunch", utc(12), Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(event.notify_status, NotifyStatus::None);
        assert_eq!(event.created_at, event.updated_at);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn add_rejects_invalid() {
        let store = InMemoryEventStore::new();
        let result = store
            .add(NewEvent::new("u1", "  ", utc(12), Duration::hours(1)))
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_is_ordered_by_start() {
        let store = InMemoryEventStore::new();
        for h in [15, 9, 12] {
            store
                .add(NewEvent::new("u1", "e", utc(h), Duration::hours(1)))
                .await
                .unwrap();
        }
        let starts: Vec<_> = store
            .get_list(EventSearch::new())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.start)
            .collect();
        assert_eq!(starts, vec![utc(9), utc(12), utc(15)]);
    }

    #[tokio::test]
    async fn conditional_update_claims_once() {
        let store = InMemoryEventStore::new();
        let event = store
            .add(NewEvent::new("u1", "e", utc(1), Duration::hours(1)))
            .await
            .unwrap();
        let claim = || {
            store.update(
                EventPatch::status(NotifyStatus::Blocked),
                EventSearch::by_id(event.id).due_at(utc(2)),
            )
        };

        assert_eq!(claim().await.unwrap(), 1);
        assert_eq!(claim().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_returns_count() {
        let store = InMemoryEventStore::new();
        let keep = store
            .add(NewEvent::new("u1", "keep", utc(1), Duration::hours(1)))
            .await
            .unwrap();
        store
            .add(NewEvent::new("u2", "drop", utc(2), Duration::hours(1)))
            .await
            .unwrap();

        let removed = store
            .delete(EventSearch::new().with_owner("u2".into()))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let left = store.get_list(EventSearch::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, keep.id);
    }
}
