//! Subcommand implementations.

pub mod config;
pub mod daemon;
pub mod event;

use std::sync::Arc;

use calremind_store::{Calendar, EventStore, InMemoryEventStore};
use tracing::{debug, warn};

use crate::config::{StoreBackend, StoreSettings};
use crate::error::CliResult;

/// Opens the configured event store.
pub fn open_store(settings: &StoreSettings) -> CliResult<Arc<dyn EventStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            debug!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StoreBackend::Sqlite => open_sqlite(settings),
    }
}

/// Opens the configured store behind a [`Calendar`].
pub fn open_calendar(settings: &StoreSettings) -> CliResult<Calendar> {
    if settings.backend == StoreBackend::Memory {
        warn!("store.backend is memory; events are lost when this command exits");
    }
    let store = open_store(settings)?;
    Ok(Calendar::new(store).with_include_duration(settings.include_duration))
}

#[cfg(feature = "sqlite")]
fn open_sqlite(settings: &StoreSettings) -> CliResult<Arc<dyn EventStore>> {
    let path = settings.sqlite_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "opening sqlite event store");
    Ok(Arc::new(calremind_store::SqliteEventStore::open(&path)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_settings: &StoreSettings) -> CliResult<Arc<dyn EventStore>> {
    Err(crate::error::CliError::config(
        "store.backend = \"sqlite\" requires the `sqlite` feature",
    ))
}
