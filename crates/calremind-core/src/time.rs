//! Time types for calendar events.
//!
//! This module provides [`DateRange`] for representing the span an event
//! occupies, and [`DateRangeFilter`] for overlap queries against stored
//! events.

use chrono::{DateTime, Duration, Utc};

/// A span of time expressed as a start plus a duration.
///
/// Ranges are always normalized so that `start <= end`: constructing a range
/// with a negative duration moves the start back instead. A range with a zero
/// duration is a single point in time, which still takes part in overlap
/// checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: DateTime<Utc>,
    duration: Duration,
}

impl DateRange {
    /// Creates a new range from a start and a (possibly negative) duration.
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        if duration < Duration::zero() {
            let earlier = start
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            Self {
                start: earlier,
                duration: start - earlier,
            }
        } else {
            Self { start, duration }
        }
    }

    /// Creates a range spanning two instants, in either order.
    pub fn between(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        Self::new(a, b - a)
    }

    /// Creates a zero-length range at the given instant.
    pub fn point(at: DateTime<Utc>) -> Self {
        Self {
            start: at,
            duration: Duration::zero(),
        }
    }

    /// Returns the start of the range (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the end of the range (exclusive), saturating at the latest
    /// representable instant.
    pub fn end(&self) -> DateTime<Utc> {
        self.start
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the length of the range. Never negative.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns true if the range is a single point.
    pub fn is_point(&self) -> bool {
        self.duration.is_zero()
    }

    /// Checks if an instant falls within this range.
    ///
    /// Uses half-open interval semantics: `[start, end)`. A point range
    /// contains nothing.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end()
    }

    /// Checks if two ranges share any instant.
    ///
    /// Ranges that merely touch (`a.end == b.start`) do not overlap. Point
    /// ranges overlap a range that contains them, and another point at the
    /// same instant.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        match (self.is_point(), other.is_point()) {
            (false, false) => self.start < other.end() && other.start < self.end(),
            (true, false) => other.contains(self.start),
            (false, true) => self.contains(other.start),
            (true, true) => self.start == other.start,
        }
    }
}

/// An overlap filter for event queries.
///
/// When `include_duration` is false, a stored event is reduced to its start
/// instant before being tested against `range`, so only events *starting*
/// inside the range match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangeFilter {
    /// The range to test against.
    pub range: DateRange,
    /// Whether the stored event's duration takes part in the test.
    pub include_duration: bool,
}

impl DateRangeFilter {
    /// Creates a filter that compares whole event spans.
    pub fn overlapping(range: DateRange) -> Self {
        Self {
            range,
            include_duration: true,
        }
    }

    /// Creates a filter that only compares event start instants.
    pub fn starting_within(range: DateRange) -> Self {
        Self {
            range,
            include_duration: false,
        }
    }

    /// Checks a stored event span against this filter.
    pub fn matches(&self, event: &DateRange) -> bool {
        if self.include_duration {
            self.range.overlaps(event)
        } else {
            self.range.overlaps(&DateRange::point(event.start()))
        }
    }
}

/// Serde helpers for `chrono::Duration` as integer nanoseconds.
pub mod duration_nanos {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = duration
            .num_nanoseconds()
            .ok_or_else(|| ser::Error::custom("duration out of range"))?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        if nanos < 0 {
            return Err(de::Error::custom("duration must not be negative"));
        }
        Ok(Duration::nanoseconds(nanos))
    }
}
