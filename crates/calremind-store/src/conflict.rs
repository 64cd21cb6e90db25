//! Double-booking detection.

use std::sync::Arc;

use calremind_core::{DateRange, DateRangeFilter, EventId, EventSearch, OwnerId};
use tracing::debug;

use crate::error::StoreResult;
use crate::store::EventStore;

/// Decides whether a candidate slot collides with an owner's existing events.
///
/// With `include_duration` (the default) whole spans are compared. Without
/// it, existing events count only by their start instant, so an event that
/// began before the candidate and is still running does not conflict.
#[derive(Clone)]
pub struct ConflictPolicy {
    store: Arc<dyn EventStore>,
    include_duration: bool,
}

impl ConflictPolicy {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            include_duration: true,
        }
    }

    #[must_use]
    pub fn with_include_duration(mut self, include_duration: bool) -> Self {
        self.include_duration = include_duration;
        self
    }

    pub fn include_duration(&self) -> bool {
        self.include_duration
    }

    /// Builds the search that finds events colliding with `candidate`.
    pub fn search_for(
        &self,
        owner: &OwnerId,
        candidate: DateRange,
        exclude: Option<EventId>,
    ) -> EventSearch {
        let mut search = EventSearch::new()
            .with_owner(owner.clone())
            .with_date_range(DateRangeFilter {
                range: candidate,
                include_duration: self.include_duration,
            });
        search.exclude_id = exclude;
        search
    }

    /// Returns true if `owner` already has an event colliding with
    /// `candidate`, ignoring `exclude`.
    pub async fn has_conflict(
        &self,
        owner: &OwnerId,
        candidate: DateRange,
        exclude: Option<EventId>,
    ) -> StoreResult<bool> {
        let search = self.search_for(owner, candidate, exclude);
        let clashes = self.store.get_list(search).await?;
        if let Some(first) = clashes.first() {
            debug!(
                owner = %owner,
                clash = %first.id,
                count = clashes.len(),
                "candidate slot is busy"
            );
        }
        Ok(!clashes.is_empty())
    }
}

impl std::fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictPolicy")
            .field("store", &self.store.name())
            .field("include_duration", &self.include_duration)
            .finish()
    }
}
