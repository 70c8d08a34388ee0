use std::fmt::{self, Display};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::time::TimeRange;

/// Placeholder identity for events whose other participants are not disclosed.
pub const SELF_SENTINEL: &str = "SELF";

/// An attendee, identified by email address, or the `SELF` sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(identity: impl AsRef<str>) -> Identity {
        Identity(identity.as_ref().trim().to_string())
    }

    pub fn redacted() -> Identity {
        Identity(SELF_SENTINEL.to_string())
    }

    pub fn is_redacted(&self) -> bool {
        self.0 == SELF_SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`, or the whole identity when there is none.
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    /// Identities compare case-insensitively when deduplicating attendee lists.
    pub fn matches(&self, other: &Identity) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the instant `day` at `time` in `offset` local time.
pub fn local_instant(day: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = day.and_time(time) - Duration::seconds(offset.local_minus_utc().into());
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Span of time with a fixed UTC offset. `start < end` always holds.
///
/// The offset of the start instant is kept as received, nothing is normalized to UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "UncheckedInterval")]
pub struct TimeInterval {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

#[derive(Deserialize)]
struct UncheckedInterval {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TryFrom<UncheckedInterval> for TimeInterval {
    type Error = String;

    fn try_from(unchecked: UncheckedInterval) -> Result<Self, Self::Error> {
        TimeInterval::new(unchecked.start, unchecked.end).ok_or_else(|| {
            format!(
                "interval end {} is not after start {}",
                unchecked.end, unchecked.start
            )
        })
    }
}

impl TimeInterval {
    /// Returns `None` unless `start < end`.
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Option<TimeInterval> {
        if start < end {
            Some(TimeInterval { start, end })
        } else {
            None
        }
    }

    /// `minutes` long interval beginning at `start`. A zero length is bumped to one minute.
    pub fn starting_at(start: DateTime<FixedOffset>, minutes: u32) -> TimeInterval {
        TimeInterval {
            start,
            end: start + Duration::minutes(i64::from(minutes.max(1))),
        }
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Seconds relative to `origin`, for the integer interval algebra in [`crate::time`].
    pub fn to_range(&self, origin: DateTime<FixedOffset>) -> TimeRange<i64> {
        TimeRange::new(
            (self.start - origin).num_seconds(),
            (self.end - origin).num_seconds(),
        )
    }

    /// Inverse of [`TimeInterval::to_range`]; the result carries `origin`'s offset.
    pub fn from_range(origin: DateTime<FixedOffset>, range: TimeRange<i64>) -> Option<TimeInterval> {
        TimeInterval::new(
            origin + Duration::seconds(range.start()),
            origin + Duration::seconds(range.end()),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub interval: TimeInterval,
    pub attendees: Vec<Identity>,
    pub summary: String,
    /// Real attendance. Matches `attendees.len()` unless the list is redacted to `SELF`.
    pub attendee_count: usize,
}

impl CalendarEvent {
    pub fn new(interval: TimeInterval, attendees: Vec<Identity>, summary: impl Into<String>) -> Self {
        CalendarEvent {
            interval,
            attendee_count: attendees.len(),
            attendees,
            summary: summary.into(),
        }
    }

    /// An event whose participants are hidden behind the `SELF` sentinel.
    pub fn redacted(interval: TimeInterval, attendee_count: usize, summary: impl Into<String>) -> Self {
        CalendarEvent {
            interval,
            attendees: vec![Identity::redacted()],
            summary: summary.into(),
            attendee_count,
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self.attendees.as_slice(), [only] if only.is_redacted())
    }
}

/// One attendee's busy events for a single resolution, sorted by start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendeeAvailability {
    identity: Identity,
    busy: Vec<CalendarEvent>,
}

impl AttendeeAvailability {
    pub fn new(identity: Identity, mut busy: Vec<CalendarEvent>) -> Self {
        busy.sort_by_key(|event| event.interval.start());
        AttendeeAvailability { identity, busy }
    }

    /// An attendee with nothing on their calendar, or whose calendar could not be read.
    pub fn free(identity: Identity) -> Self {
        AttendeeAvailability {
            identity,
            busy: Vec::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn busy(&self) -> &[CalendarEvent] {
        &self.busy
    }

    pub fn is_busy_during(&self, slot: &TimeInterval) -> bool {
        self.busy.iter().any(|event| event.interval.overlaps(slot))
    }
}
