//! Event commands.

use calremind_core::{Event, EventId, EventSearch, NewEvent, OwnerId};
use calremind_store::Calendar;
use chrono::{DateTime, Duration, Utc};

use crate::error::{CliError, CliResult};

/// Builds a create payload from command-line values given in minutes.
pub fn new_event(
    owner: &str,
    title: &str,
    start: DateTime<Utc>,
    duration_minutes: i64,
    notify_minutes: i64,
    description: Option<String>,
) -> CliResult<NewEvent> {
    if duration_minutes < 0 || notify_minutes < 0 {
        return Err(CliError::config("durations must not be negative"));
    }
    let duration = Duration::try_minutes(duration_minutes)
        .ok_or_else(|| CliError::config(format!("--duration {duration_minutes} is too large")))?;
    let notify_term = Duration::try_minutes(notify_minutes)
        .ok_or_else(|| CliError::config(format!("--notify {notify_minutes} is too large")))?;
    let mut new = NewEvent::new(owner, title, start, duration).with_notify_term(notify_term);
    new.description = description;
    new.validate().map_err(calremind_store::StoreError::from)?;
    Ok(new)
}

/// Creates an event and prints its id.
pub async fn add(calendar: &Calendar, new: NewEvent) -> CliResult<Event> {
    let event = calendar.create(new).await?;
    println!("created {}", event.id);
    Ok(event)
}

/// Prints events ordered by start, optionally for one owner.
pub async fn list(calendar: &Calendar, owner: Option<&str>) -> CliResult<Vec<Event>> {
    let mut events = match owner {
        Some(owner) => calendar.list_for(&OwnerId::new(owner)).await?,
        None => calendar.list(EventSearch::new()).await?,
    };
    events.sort_by_key(|e| (e.start, e.id));

    if events.is_empty() {
        println!("No events.");
    }
    for event in &events {
        println!("{}", format_line(event));
    }
    Ok(events)
}

/// Deletes an event.
pub async fn delete(calendar: &Calendar, id: EventId) -> CliResult<()> {
    calendar.delete(id).await?;
    println!("deleted {id}");
    Ok(())
}

fn format_line(event: &Event) -> String {
    format!(
        "{}  {}  {:>4} min  {:<10}  {:<8}  {}",
        event.id,
        event.start.format("%Y-%m-%d %H:%M"),
        event.duration.num_minutes(),
        event.owner_id.as_str(),
        event.notify_status.as_str(),
        event.title
    )
}
