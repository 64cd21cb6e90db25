//! Turns due events into queued notifications.
//!
//! Each tick claims due events by flipping them from `none` to `blocked`
//! with a conditional update, then publishes one [`Notification`] per
//! claimed event. The conditional update is the only coordination between
//! concurrent notifiers: an event is published by whichever claims it first.
//!
//! A claimed event whose publish fails stays `blocked`. Nothing re-arms it
//! unless a [`ReclaimAction`](crate::ReclaimAction) is scheduled.
//!
//! Shutdown is checked between events, never between a claim and its
//! publish, so a stopping notifier leaves the rest of its batch `none`.

use std::sync::Arc;

use calremind_core::{Event, EventPatch, EventSearch, NotifyStatus};
use calremind_protocol::Notification;
use calremind_store::{BoxFuture, EventStore, UserDirectory};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::error::{ServerError, ServerResult};
use crate::queue::Producer;
use crate::scheduler::Action;
use crate::signals::ShutdownHandle;

/// Outcome of one notifier pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Due events considered in this pass.
    pub due: usize,
    /// Claimed and published.
    pub published: usize,
    /// Claimed by someone else first.
    pub skipped: usize,
    /// Claimed but not published; left `blocked`.
    pub failed: usize,
    /// Left unclaimed for a later pass because shutdown was requested.
    pub deferred: usize,
}

pub struct Notifier {
    store: Arc<dyn EventStore>,
    users: Arc<dyn UserDirectory>,
    producer: Producer,
    config: NotifierConfig,
    last_report: Option<NotifyReport>,
}

impl Notifier {
    pub fn new(store: Arc<dyn EventStore>, users: Arc<dyn UserDirectory>, producer: Producer) -> Self {
        Self {
            store,
            users,
            producer,
            config: NotifierConfig::default(),
            last_report: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: NotifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Report of the last scheduled pass.
    pub fn last_report(&self) -> Option<NotifyReport> {
        self.last_report
    }

    /// Claims and publishes every event due at `now`.
    ///
    /// Fails only if the due events cannot be listed. Per-event failures
    /// are logged and counted.
    pub async fn notify_due(&mut self, now: DateTime<Utc>) -> ServerResult<NotifyReport> {
        self.notify_due_until(now, None).await
    }

    /// Like [`notify_due`](Self::notify_due), but stops claiming once
    /// `shutdown` fires. An event already claimed is still published.
    pub async fn notify_due_until(
        &mut self,
        now: DateTime<Utc>,
        shutdown: Option<&ShutdownHandle>,
    ) -> ServerResult<NotifyReport> {
        let mut due = self.store.get_list(EventSearch::new().due_at(now)).await?;
        if let Some(max) = self.config.max_batch
            && due.len() > max
        {
            debug!(due = due.len(), max, "due events over batch limit, deferring the rest");
            due.truncate(max);
        }

        let mut report = NotifyReport {
            due: due.len(),
            ..Default::default()
        };
        for (i, event) in due.iter().enumerate() {
            if shutdown.is_some_and(ShutdownHandle::is_shutdown) {
                report.deferred = due.len() - i;
                info!(deferred = report.deferred, "shutdown requested, leaving due events for later");
                break;
            }
            match self.notify_one(event, now).await {
                Ok(true) => report.published += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(event_id = %event.id, owner = %event.owner_id, error = %e, "notification failed, event left blocked");
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                published = report.published,
                skipped = report.skipped,
                failed = report.failed,
                deferred = report.deferred,
                "notifier pass finished"
            );
        }
        Ok(report)
    }

    /// Returns false if another notifier claimed the event first.
    async fn notify_one(&mut self, event: &Event, now: DateTime<Utc>) -> ServerResult<bool> {
        let claimed = self
            .store
            .update(
                EventPatch::status(NotifyStatus::Blocked),
                EventSearch::by_id(event.id).due_at(now),
            )
            .await?;
        if claimed == 0 {
            debug!(event_id = %event.id, "event already claimed");
            return Ok(false);
        }

        let recipient = self
            .users
            .lookup(&event.owner_id)
            .await
            .ok_or_else(|| ServerError::unknown_owner(event.owner_id.as_str()))?;

        let notification = Notification::from_event(event, &recipient);
        self.producer.publish(&notification).await?;
        debug!(event_id = %event.id, to = %recipient.email, "event notified");
        Ok(true)
    }
}

impl Action for Notifier {
    fn name(&self) -> &str {
        "notifier"
    }

    fn do_action<'a>(
        &'a mut self,
        shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, ServerResult<()>> {
        Box::pin(async move {
            let report = self.notify_due_until(Utc::now(), Some(shutdown)).await?;
            self.last_report = Some(report);
            Ok(())
        })
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("store", &self.store.name())
            .field("producer", &self.producer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
