//! Calendar service and the confirmation API used by the notification
//! pipeline.

use std::sync::Arc;

use calremind_core::{
    Event, EventId, EventPatch, EventSearch, EventValidationError, NewEvent, NotifyStatus, OwnerId,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::conflict::ConflictPolicy;
use crate::error::{StoreError, StoreResult};
use crate::store::{BoxFuture, EventStore};

/// Callbacks from the sender and housekeeping jobs into the source of truth.
pub trait EventApi: Send + Sync {
    /// Marks an event as notified.
    ///
    /// Calling it again for an already notified event succeeds. Fails with
    /// [`StoreError::NotFound`] if the event no longer exists.
    fn set_notified(&self, id: EventId) -> BoxFuture<'_, StoreResult<()>>;

    /// Deletes events that ended more than `store_time` ago.
    ///
    /// Returns the number of events removed.
    fn cleanup_old_events(&self, store_time: Duration) -> BoxFuture<'_, StoreResult<usize>>;

    /// Returns events stuck in `blocked` for longer than `timeout` to `none`
    /// so the next notifier tick picks them up again.
    ///
    /// Returns the number of events re-armed.
    fn rearm_stale_blocked(&self, timeout: Duration) -> BoxFuture<'_, StoreResult<usize>>;
}

/// CRUD facade over an [`EventStore`] that refuses double bookings.
///
/// The conflict check and the write are two separate store calls. Two
/// concurrent creates for the same owner and slot can both pass the check.
#[derive(Clone)]
pub struct Calendar {
    store: Arc<dyn EventStore>,
    conflicts: ConflictPolicy,
}

impl Calendar {
    /// Creates a calendar whose conflict checks include event durations.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        let conflicts = ConflictPolicy::new(Arc::clone(&store));
        Self { store, conflicts }
    }

    /// Builder method to set whether conflict checks include durations.
    #[must_use]
    pub fn with_include_duration(mut self, include_duration: bool) -> Self {
        self.conflicts = self.conflicts.with_include_duration(include_duration);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn conflicts(&self) -> &ConflictPolicy {
        &self.conflicts
    }

    /// Creates an event unless it collides with one of the owner's events.
    pub async fn create(&self, new: NewEvent) -> StoreResult<Event> {
        new.validate()?;
        if self
            .conflicts
            .has_conflict(&new.owner_id, new.range(), None)
            .await?
        {
            warn!(owner = %new.owner_id, start = %new.start, "rejecting event: date busy");
            return Err(StoreError::date_busy(new.owner_id, new.start));
        }
        let event = self.store.add(new).await?;
        info!(event_id = %event.id, owner = %event.owner_id, start = %event.start, "event created");
        Ok(event)
    }

    /// Applies `patch` to one event.
    ///
    /// Moving or resizing the event re-runs the conflict check, ignoring the
    /// event itself.
    pub async fn update(&self, id: EventId, patch: EventPatch) -> StoreResult<Event> {
        patch.validate()?;
        let existing = self.get(id).await?;
        patch.validate_for(&existing)?;

        if patch.changes_schedule() {
            let candidate = patch.range_for(&existing);
            if self
                .conflicts
                .has_conflict(&existing.owner_id, candidate, Some(id))
                .await?
            {
                warn!(event_id = %id, owner = %existing.owner_id, "rejecting reschedule: date busy");
                return Err(StoreError::date_busy(existing.owner_id, candidate.start()));
            }
        }

        if self.store.update(patch, EventSearch::by_id(id)).await? == 0 {
            return Err(StoreError::not_found(id));
        }
        debug!(event_id = %id, "event updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: EventId) -> StoreResult<()> {
        if self.store.delete(EventSearch::by_id(id)).await? == 0 {
            return Err(StoreError::not_found(id));
        }
        info!(event_id = %id, "event deleted");
        Ok(())
    }

    pub async fn get(&self, id: EventId) -> StoreResult<Event> {
        self.store
            .get_list(EventSearch::by_id(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(id))
    }

    pub async fn list(&self, search: EventSearch) -> StoreResult<Vec<Event>> {
        self.store.get_list(search).await
    }

    /// Lists one owner's events.
    pub async fn list_for(&self, owner: &OwnerId) -> StoreResult<Vec<Event>> {
        self.list(EventSearch::new().with_owner(owner.clone())).await
    }
}

impl EventApi for Calendar {
    fn set_notified(&self, id: EventId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let changed = self
                .store
                .update(EventPatch::status(NotifyStatus::Notified), EventSearch::by_id(id))
                .await?;
            if changed == 0 {
                return Err(StoreError::not_found(id));
            }
            debug!(event_id = %id, "event marked notified");
            Ok(())
        })
    }

    fn cleanup_old_events(&self, store_time: Duration) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            let cutoff = cutoff_before(store_time)?;
            let removed = self
                .store
                .delete(EventSearch::new().finished_before(cutoff))
                .await?;
            if removed > 0 {
                info!(removed, %cutoff, "removed finished events");
            }
            Ok(removed)
        })
    }

    fn rearm_stale_blocked(&self, timeout: Duration) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            let cutoff = cutoff_before(timeout)?;
            let rearmed = self
                .store
                .update(
                    EventPatch::status(NotifyStatus::None),
                    EventSearch::new().blocked_before(cutoff),
                )
                .await?;
            if rearmed > 0 {
                warn!(rearmed, %cutoff, "re-armed events stuck in blocked");
            }
            Ok(rearmed)
        })
    }
}

/// Returns `now - age`, or an error if that instant cannot be represented.
fn cutoff_before(age: Duration) -> StoreResult<DateTime<Utc>> {
    Utc::now()
        .checked_sub_signed(age)
        .ok_or(StoreError::Invalid(EventValidationError::OutOfRange))
}

impl std::fmt::Debug for Calendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calendar")
            .field("store", &self.store.name())
            .field("conflicts", &self.conflicts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEventStore;
    use chrono::TimeZone;

    fn utc(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, h, min, 0).unwrap()
    }

    fn calendar() -> Calendar {
        Calendar::new(Arc::new(InMemoryEventStore::new()))
    }

    fn standup(h: u32, min: u32, minutes: i64) -> NewEvent {
        NewEvent::new("u1", "Standup", utc(h, min), Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn create_rejects_overlap() {
        let cal = calendar();
        cal.create(standup(10, 0, 60)).await.unwrap();

        let err = cal.create(standup(10, 30, 60)).await.unwrap_err();
        assert!(err.is_date_busy());
        assert_eq!(cal.list(EventSearch::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_ignores_self_when_rescheduling() {
        let cal = calendar();
        let event = cal.create(standup(10, 0, 60)).await.unwrap();

        let moved = cal
            .update(event.id, EventPatch::new().with_start(utc(10, 30)))
            .await
            .unwrap();
        assert_eq!(moved.start, utc(10, 30));
    }

    #[tokio::test]
    async fn update_rejects_move_onto_other_event() {
        let cal = calendar();
        cal.create(standup(9, 0, 60)).await.unwrap();
        let event = cal.create(standup(11, 0, 30)).await.unwrap();

        let err = cal
            .update(event.id, EventPatch::new().with_start(utc(9, 30)))
            .await
            .unwrap_err();
        assert!(err.is_date_busy());
        assert_eq!(cal.get(event.id).await.unwrap().start, utc(11, 0));
    }

    #[tokio::test]
    async fn missing_event_is_not_found() {
        let cal = calendar();
        let id = EventId::new();
        assert!(matches!(
            cal.update(id, EventPatch::new().with_title("x")).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(cal.delete(id).await, Err(StoreError::NotFound { .. })));
        assert!(matches!(cal.set_notified(id).await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn set_notified_is_idempotent() {
        let cal = calendar();
        let event = cal.create(standup(10, 0, 60)).await.unwrap();

        cal.set_notified(event.id).await.unwrap();
        cal.set_notified(event.id).await.unwrap();
        assert_eq!(
            cal.get(event.id).await.unwrap().notify_status,
            NotifyStatus::Notified
        );
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_events() {
        let cal = calendar();
        let past = Utc::now() - Duration::days(10);
        cal.create(NewEvent::new("u1", "old", past, Duration::hours(1)))
            .await
            .unwrap();
        let kept = cal.create(standup(10, 0, 60)).await.unwrap();

        let removed = cal.cleanup_old_events(Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        let left = cal.list(EventSearch::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, kept.id);
    }

    #[tokio::test]
    async fn unrepresentable_schedules_are_refused() {
        let cal = calendar();
        let err = cal
            .create(standup(10, 0, 60).with_notify_term(Duration::days(1_000_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Invalid(EventValidationError::OutOfRange)
        ));

        let event = cal.create(standup(10, 0, 60)).await.unwrap();
        let err = cal
            .update(
                event.id,
                EventPatch::new().with_notify_term(Duration::days(1_000_000_000)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Invalid(EventValidationError::OutOfRange)
        ));
        assert_eq!(cal.get(event.id).await.unwrap().notify_term, Duration::zero());
    }

    #[tokio::test]
    async fn oversized_retention_is_an_error_not_a_panic() {
        let cal = calendar();
        cal.create(standup(10, 0, 60)).await.unwrap();
        let huge = Duration::days(1_000_000_000);
        assert!(matches!(
            cal.cleanup_old_events(huge).await,
            Err(StoreError::Invalid(EventValidationError::OutOfRange))
        ));
        assert!(matches!(
            cal.rearm_stale_blocked(huge).await,
            Err(StoreError::Invalid(EventValidationError::OutOfRange))
        ));
        assert_eq!(cal.list(EventSearch::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rearm_only_touches_stale_blocked() {
        let cal = calendar();
        let blocked = cal.create(standup(10, 0, 60)).await.unwrap();
        let idle = cal.create(standup(12, 0, 60)).await.unwrap();
        cal.store()
            .update(
                EventPatch::status(NotifyStatus::Blocked),
                EventSearch::by_id(blocked.id),
            )
            .await
            .unwrap();

        assert_eq!(cal.rearm_stale_blocked(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(cal.rearm_stale_blocked(Duration::zero()).await.unwrap(), 1);
        assert_eq!(
            cal.get(blocked.id).await.unwrap().notify_status,
            NotifyStatus::None
        );
        assert_eq!(cal.get(idle.id).await.unwrap().notify_status, NotifyStatus::None);
    }
}
