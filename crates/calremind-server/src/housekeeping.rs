//! Periodic maintenance of the event store.

use std::sync::Arc;

use calremind_store::{BoxFuture, EventApi};
use chrono::Duration;
use tracing::debug;

use crate::error::ServerResult;
use crate::scheduler::Action;
use crate::signals::ShutdownHandle;

/// Deletes events that ended more than `store_time` ago.
pub struct CleanupAction {
    events: Arc<dyn EventApi>,
    store_time: Duration,
}

impl CleanupAction {
    pub fn new(events: Arc<dyn EventApi>, store_time: Duration) -> Self {
        Self { events, store_time }
    }
}

impl Action for CleanupAction {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn do_action<'a>(
        &'a mut self,
        _shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            let removed = self.events.cleanup_old_events(self.store_time).await?;
            debug!(removed, "cleanup pass finished");
            Ok(())
        })
    }
}

/// Returns events stuck in `blocked` for longer than `timeout` to `none`.
///
/// Events whose notification was claimed but never confirmed (publish
/// failed, unknown owner, mail failed) get another chance. Recipients may
/// receive a reminder twice if the first one was in fact delivered.
pub struct ReclaimAction {
    events: Arc<dyn EventApi>,
    timeout: Duration,
}

impl ReclaimAction {
    pub fn new(events: Arc<dyn EventApi>, timeout: Duration) -> Self {
        Self { events, timeout }
    }
}

impl Action for ReclaimAction {
    fn name(&self) -> &str {
        "reclaim"
    }

    fn do_action<'a>(
        &'a mut self,
        _shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            let rearmed = self.events.rearm_stale_blocked(self.timeout).await?;
            debug!(rearmed, "reclaim pass finished");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calremind_core::{EventPatch, EventSearch, NewEvent, NotifyStatus};
    use calremind_store::{Calendar, EventStore, InMemoryEventStore};
    use chrono::Utc;

    fn calendar() -> (Arc<InMemoryEventStore>, Arc<Calendar>) {
        let store = Arc::new(InMemoryEventStore::new());
        let calendar = Arc::new(Calendar::new(store.clone()));
        (store, calendar)
    }

    #[tokio::test]
    async fn cleanup_removes_old_events() {
        let (store, calendar) = calendar();
        let now = Utc::now();
        calendar
            .create(NewEvent::new("u1", "old", now - Duration::days(10), Duration::hours(1)))
            .await
            .unwrap();
        calendar
            .create(NewEvent::new("u1", "recent", now - Duration::hours(3), Duration::hours(1)))
            .await
            .unwrap();

        let mut action = CleanupAction::new(calendar, Duration::days(1));
        action.do_action(&ShutdownHandle::new()).await.unwrap();

        let left = store.get_list(EventSearch::new()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "recent");
    }

    #[tokio::test]
    async fn reclaim_rearms_only_stale_blocked() {
        let (store, calendar) = calendar();
        let now = Utc::now();
        let event = calendar
            .create(NewEvent::new("u1", "standup", now + Duration::hours(1), Duration::hours(1)))
            .await
            .unwrap();
        store
            .update(EventPatch::status(NotifyStatus::Blocked), EventSearch::by_id(event.id))
            .await
            .unwrap();

        // Blocked just now: not stale yet.
        let mut action = ReclaimAction::new(calendar.clone(), Duration::minutes(10));
        action.do_action(&ShutdownHandle::new()).await.unwrap();
        let current = calendar.get(event.id).await.unwrap();
        assert_eq!(current.notify_status, NotifyStatus::Blocked);

        // A zero timeout treats every blocked event as stale.
        let mut action = ReclaimAction::new(calendar.clone(), Duration::zero());
        action.do_action(&ShutdownHandle::new()).await.unwrap();
        let current = calendar.get(event.id).await.unwrap();
        assert_eq!(current.notify_status, NotifyStatus::None);
    }
}
