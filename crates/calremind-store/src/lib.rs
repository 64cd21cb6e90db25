//! Event persistence and booking rules for calremind.
//!
//! - [`EventStore`] - The persistence contract, with [`InMemoryEventStore`]
//!   and (feature `sqlite`) [`SqliteEventStore`]
//! - [`ConflictPolicy`] - Double-booking detection
//! - [`Calendar`] - CRUD facade that consults the policy before writing
//! - [`EventApi`] - Confirmation and housekeeping callbacks for the pipeline
//! - [`UserDirectory`] - Owner to mail recipient resolution
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use calremind_store::{Calendar, InMemoryEventStore};
//!
//! let calendar = Calendar::new(Arc::new(InMemoryEventStore::new()));
//! let event = calendar.create(new_event).await?;
//! ```

pub mod calendar;
pub mod conflict;
pub mod error;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod users;

pub use calendar::{Calendar, EventApi};
pub use conflict::ConflictPolicy;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryEventStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEventStore;
pub use store::{BoxFuture, EventStore, matches};
pub use users::{InMemoryUserDirectory, UserDirectory};
