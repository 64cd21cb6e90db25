//! SQLite event store.
//!
//! Instants and durations are stored as integer nanoseconds since the Unix
//! epoch, so every [`EventSearch`] predicate translates to plain integer
//! comparisons and an event reads back exactly as it was written.

use std::path::Path;
use std::sync::{Arc, Mutex};

use calremind_core::{
    DateRangeFilter, Event, EventId, EventPatch, EventSearch, NewEvent, NotifyStatus, OwnerId,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{BoxFuture, EventStore};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    start_ns INTEGER NOT NULL,
    duration_ns INTEGER NOT NULL CHECK (duration_ns >= 0),
    owner_id TEXT NOT NULL,
    description TEXT,
    notify_term_ns INTEGER NOT NULL CHECK (notify_term_ns >= 0),
    notify_status TEXT NOT NULL DEFAULT 'none',
    created_at_ns INTEGER NOT NULL,
    updated_at_ns INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_owner_start ON events (owner_id, start_ns);
CREATE INDEX IF NOT EXISTS idx_events_status_start ON events (notify_status, start_ns);
";

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    title,
    start_ns,
    duration_ns,
    owner_id,
    description,
    notify_term_ns,
    notify_status,
    created_at_ns,
    updated_at_ns
FROM events";

/// An [`EventStore`] persisted in a SQLite database.
///
/// The connection sits behind a mutex and every statement runs on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Opens (or creates) a database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened sqlite event store");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::backend("sqlite connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::backend(format!("sqlite task failed: {e}")))?
    }
}

impl EventStore for SqliteEventStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn add(&self, new: NewEvent) -> BoxFuture<'_, StoreResult<Event>> {
        Box::pin(async move {
            new.validate()?;
            let event = Event::create(new, Utc::now());
            let row = event.clone();
            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO events (
                        id,
                        title,
                        start_ns,
                        duration_ns,
                        owner_id,
                        description,
                        notify_term_ns,
                        notify_status,
                        created_at_ns,
                        updated_at_ns
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                    params![
                        row.id.to_string(),
                        row.title,
                        instant_to_db(row.start)?,
                        duration_to_db(row.duration)?,
                        row.owner_id.as_str(),
                        row.description,
                        duration_to_db(row.notify_term)?,
                        row.notify_status.as_str(),
                        instant_to_db(row.created_at)?,
                        instant_to_db(row.updated_at)?,
                    ],
                )?;
                Ok(())
            })
            .await?;
            debug!(event_id = %event.id, owner = %event.owner_id, "event added");
            Ok(event)
        })
    }

    fn update(&self, patch: EventPatch, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            patch.validate()?;
            let now = Utc::now();
            self.with_conn(move |conn| {
                let (set_sql, mut values) = set_clause(&patch, now)?;
                let (where_sql, where_values) = where_clause(&search)?;
                values.extend(where_values);
                let sql = format!("UPDATE events SET {set_sql} WHERE {where_sql};");
                Ok(conn.execute(&sql, params_from_iter(values))?)
            })
            .await
        })
    }

    fn delete(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let (where_sql, values) = where_clause(&search)?;
                let sql = format!("DELETE FROM events WHERE {where_sql};");
                Ok(conn.execute(&sql, params_from_iter(values))?)
            })
            .await
        })
    }

    fn get_list(&self, search: EventSearch) -> BoxFuture<'_, StoreResult<Vec<Event>>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let (where_sql, values) = where_clause(&search)?;
                let sql = format!("{EVENT_SELECT_SQL} WHERE {where_sql} ORDER BY start_ns, id;");
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(values))?;
                let mut events = Vec::new();
                while let Some(row) = rows.next()? {
                    events.push(parse_event_row(row)?);
                }
                Ok(events)
            })
            .await
        })
    }
}

fn set_clause(patch: &EventPatch, now: DateTime<Utc>) -> StoreResult<(String, Vec<Value>)> {
    let mut sets = Vec::new();
    let mut values = Vec::new();

    if let Some(title) = &patch.title {
        sets.push("title = ?");
        values.push(Value::Text(title.clone()));
    }
    if let Some(start) = patch.start {
        sets.push("start_ns = ?");
        values.push(Value::Integer(instant_to_db(start)?));
    }
    if let Some(duration) = patch.duration {
        sets.push("duration_ns = ?");
        values.push(Value::Integer(duration_to_db(duration)?));
    }
    if let Some(description) = &patch.description {
        sets.push("description = ?");
        values.push(match description {
            Some(text) => Value::Text(text.clone()),
            None => Value::Null,
        });
    }
    if let Some(term) = patch.notify_term {
        sets.push("notify_term_ns = ?");
        values.push(Value::Integer(duration_to_db(term)?));
    }
    if let Some(status) = patch.notify_status {
        sets.push("notify_status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    sets.push("updated_at_ns = ?");
    values.push(Value::Integer(instant_to_db(now)?));

    Ok((sets.join(", "), values))
}

/// Translates a search into a WHERE clause with positional parameters.
fn where_clause(search: &EventSearch) -> StoreResult<(String, Vec<Value>)> {
    let mut conds: Vec<String> = Vec::new();
    let mut values = Vec::new();

    if let Some(id) = search.id {
        conds.push("id = ?".into());
        values.push(Value::Text(id.to_string()));
    }
    if let Some(id) = search.exclude_id {
        conds.push("id <> ?".into());
        values.push(Value::Text(id.to_string()));
    }
    if let Some(owner) = &search.owner_id {
        conds.push("owner_id = ?".into());
        values.push(Value::Text(owner.as_str().to_string()));
    }
    if let Some(filter) = &search.date_range {
        range_condition(filter, &mut conds, &mut values)?;
    }
    if let Some(now) = search.due_at {
        conds.push("(notify_status = ? AND start_ns - notify_term_ns <= ?)".into());
        values.push(Value::Text(NotifyStatus::None.as_str().to_string()));
        values.push(Value::Integer(instant_to_db(now)?));
    }
    if let Some(status) = search.notify_status {
        conds.push("notify_status = ?".into());
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(at) = search.blocked_before {
        conds.push("(notify_status = ? AND updated_at_ns <= ?)".into());
        values.push(Value::Text(NotifyStatus::Blocked.as_str().to_string()));
        values.push(Value::Integer(instant_to_db(at)?));
    }
    if let Some(at) = search.finished_before {
        conds.push("start_ns + duration_ns < ?".into());
        values.push(Value::Integer(instant_to_db(at)?));
    }

    if conds.is_empty() {
        return Ok(("1 = 1".into(), values));
    }
    Ok((conds.join(" AND "), values))
}

// Mirrors DateRange::overlaps: a zero-length side is a point that must fall
// inside the other side's half-open span, two points must be equal.
fn range_condition(
    filter: &DateRangeFilter,
    conds: &mut Vec<String>,
    values: &mut Vec<Value>,
) -> StoreResult<()> {
    let start = instant_to_db(filter.range.start())?;
    let end = instant_to_db(filter.range.end())?;
    let point = filter.range.is_point();

    match (filter.include_duration, point) {
        (true, false) => {
            conds.push(
                "(start_ns < ? AND ((duration_ns > 0 AND start_ns + duration_ns > ?) \
                 OR (duration_ns = 0 AND start_ns >= ?)))"
                    .into(),
            );
            values.extend([end, start, start].map(Value::Integer));
        }
        (true, true) => {
            conds.push(
                "((duration_ns > 0 AND start_ns <= ? AND start_ns + duration_ns > ?) \
                 OR (duration_ns = 0 AND start_ns = ?))"
                    .into(),
            );
            values.extend([start, start, start].map(Value::Integer));
        }
        (false, false) => {
            conds.push("(start_ns >= ? AND start_ns < ?)".into());
            values.extend([start, end].map(Value::Integer));
        }
        (false, true) => {
            conds.push("start_ns = ?".into());
            values.push(Value::Integer(start));
        }
    }
    Ok(())
}

fn parse_event_row(row: &Row<'_>) -> StoreResult<Event> {
    let id_text: String = row.get("id")?;
    let id: EventId = id_text
        .parse()
        .map_err(|_| StoreError::backend(format!("invalid event id `{id_text}` in events.id")))?;

    let status_text: String = row.get("notify_status")?;
    let notify_status: NotifyStatus = status_text.parse().map_err(|_| {
        StoreError::backend(format!(
            "invalid notify status `{status_text}` in events.notify_status"
        ))
    })?;

    Ok(Event {
        id,
        title: row.get("title")?,
        start: DateTime::<Utc>::from_timestamp_nanos(row.get("start_ns")?),
        duration: Duration::nanoseconds(row.get("duration_ns")?),
        owner_id: OwnerId::new(row.get::<_, String>("owner_id")?),
        description: row.get("description")?,
        notify_term: Duration::nanoseconds(row.get("notify_term_ns")?),
        notify_status,
        created_at: DateTime::<Utc>::from_timestamp_nanos(row.get("created_at_ns")?),
        updated_at: DateTime::<Utc>::from_timestamp_nanos(row.get("updated_at_ns")?),
    })
}

fn instant_to_db(at: DateTime<Utc>) -> StoreResult<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::backend(format!("instant {at} out of storable range")))
}

fn duration_to_db(duration: Duration) -> StoreResult<i64> {
    duration
        .num_nanoseconds()
        .ok_or_else(|| StoreError::backend(format!("duration {duration} out of storable range")))
}
