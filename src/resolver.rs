use std::collections::HashMap;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime};
use log::{debug, trace};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::event::{local_instant, AttendeeAvailability, CalendarEvent, Identity, TimeInterval};
use crate::time::{Available, FirstFit, TimeMerge, TimeRange};

/// Everything the resolver needs to place one meeting on one day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeetingQuery {
    pub participants: Vec<Identity>,
    pub day: NaiveDate,
    pub duration_minutes: u32,
    /// Pins the slot start. Skips the gap search entirely.
    pub time: Option<NaiveTime>,
    /// Summary of the synthesized event.
    pub subject: String,
}

/// How the slot was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStrategy {
    Explicit,
    FirstFit,
    Fallback,
}

/// One participant's calendar for the day, with the new meeting inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendeeEvents {
    pub identity: Identity,
    pub events: Vec<CalendarEvent>,
    /// An existing event overlaps the slot.
    pub conflicted: bool,
}

impl AttendeeEvents {
    /// Someone on the request who is not invited: their calendar as-is, never conflicted.
    pub fn uninvited(
        identity: &Identity,
        availabilities: &HashMap<Identity, AttendeeAvailability>,
    ) -> Self {
        AttendeeEvents {
            identity: identity.clone(),
            events: availabilities
                .get(identity)
                .map(|a| a.busy().to_vec())
                .unwrap_or_default(),
            conflicted: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSlot {
    pub slot: TimeInterval,
    /// Working-hours window of the day that was searched.
    pub window: TimeInterval,
    /// In participant order.
    pub per_attendee_events: Vec<AttendeeEvents>,
    pub conflicts_detected: usize,
    pub strategy: SlotStrategy,
}

/// Deterministic slot placement over working hours.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotResolver {
    work_start: NaiveTime,
    work_end: NaiveTime,
    fallback_start: NaiveTime,
    offset: FixedOffset,
}

impl SlotResolver {
    pub fn new(config: &SchedulerConfig) -> Self {
        SlotResolver {
            work_start: config.work_start,
            work_end: config.work_end,
            fallback_start: config.fallback_start,
            offset: config.offset(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Working hours of `day`.
    pub fn day_window(&self, day: NaiveDate) -> TimeInterval {
        let start = local_instant(day, self.work_start, self.offset);
        let end = local_instant(day, self.work_end, self.offset);
        TimeInterval::new(start, end).unwrap_or_else(|| TimeInterval::starting_at(start, 1))
    }

    /// Midnight to midnight. Calendars are read over the whole day so that an explicit time
    /// outside working hours still sees its conflicts.
    pub fn full_day(&self, day: NaiveDate) -> TimeInterval {
        let start = local_instant(day, NaiveTime::MIN, self.offset);
        TimeInterval::starting_at(start, 24 * 60)
    }

    /// Places the meeting and builds every participant's updated event list.
    ///
    /// Never fails: an explicit time is taken as-is, otherwise the first free gap of the
    /// working window is used, otherwise the fixed fallback slot. Participants without an
    /// entry in `availabilities` are free all day.
    pub fn resolve(
        &self,
        query: &MeetingQuery,
        availabilities: &HashMap<Identity, AttendeeAvailability>,
    ) -> ResolvedSlot {
        let window = self.day_window(query.day);
        let minutes = query.duration_minutes.max(1);

        let (slot, strategy) = match query.time {
            Some(time) => (
                TimeInterval::starting_at(local_instant(query.day, time, self.offset), minutes),
                SlotStrategy::Explicit,
            ),
            None => self
                .first_gap(query, availabilities, &window, minutes)
                .map(|slot| (slot, SlotStrategy::FirstFit))
                .unwrap_or_else(|| {
                    let start = local_instant(query.day, self.fallback_start, self.offset);
                    (TimeInterval::starting_at(start, minutes), SlotStrategy::Fallback)
                }),
        };
        debug!("Slot {:?} via {:?}", slot, strategy);

        let attendee_events = |identity: &Identity| {
            let availability = availabilities.get(identity);
            let busy = availability.map(|a| a.busy()).unwrap_or(&[]);
            AttendeeEvents {
                identity: identity.clone(),
                events: with_meeting(busy, &slot, &query.participants, &query.subject),
                conflicted: availability.map_or(false, |a| a.is_busy_during(&slot)),
            }
        };

        #[cfg(feature = "rayon")]
        let per_attendee_events: Vec<AttendeeEvents> =
            query.participants.par_iter().map(attendee_events).collect();
        #[cfg(not(feature = "rayon"))]
        let per_attendee_events: Vec<AttendeeEvents> =
            query.participants.iter().map(attendee_events).collect();

        let conflicts_detected = per_attendee_events
            .iter()
            .filter(|attendee| attendee.conflicted)
            .count();

        ResolvedSlot {
            slot,
            window,
            per_attendee_events,
            conflicts_detected,
            strategy,
        }
    }

    fn first_gap(
        &self,
        query: &MeetingQuery,
        availabilities: &HashMap<Identity, AttendeeAvailability>,
        window: &TimeInterval,
        minutes: u32,
    ) -> Option<TimeInterval> {
        let origin = window.start();
        let bounds = window.to_range(origin);

        let busy: Vec<TimeRange<i64>> = query
            .participants
            .iter()
            .filter_map(|identity| availabilities.get(identity))
            .flat_map(|availability| availability.busy())
            .filter_map(|event| event.interval.to_range(origin).clamp(bounds))
            .collect();
        trace!("Merged busy set {:?}", busy.iter().time_merge());

        let free = busy.iter().get_availability(&[bounds]);
        debug!("Free gaps {:?}", free);

        free.iter()
            .first_fit(Duration::minutes(i64::from(minutes)).num_seconds())
            .and_then(|gap| TimeInterval::from_range(origin, gap))
    }
}

/// `busy` with one event for `slot` inserted after every event starting no later than it.
fn with_meeting(
    busy: &[CalendarEvent],
    slot: &TimeInterval,
    participants: &[Identity],
    subject: &str,
) -> Vec<CalendarEvent> {
    let position = busy.partition_point(|event| event.interval.start() <= slot.start());
    let mut events = Vec::with_capacity(busy.len() + 1);
    events.extend_from_slice(&busy[..position]);
    events.push(CalendarEvent::new(*slot, participants.to_vec(), subject));
    events.extend_from_slice(&busy[position..]);
    events
}
