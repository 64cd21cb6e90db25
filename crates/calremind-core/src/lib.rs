//! Core types: events, date ranges, searches, tracing

pub mod event;
pub mod search;
pub mod time;
pub mod tracing;

pub use event::{
    Event, EventId, EventPatch, EventValidationError, NewEvent, NotifyStatus, OwnerId,
    ParseNotifyStatusError, Recipient,
};
pub use search::EventSearch;
pub use time::{DateRange, DateRangeFilter, duration_nanos};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing, parse_level};
