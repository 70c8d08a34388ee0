use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use itertools::Itertools;
use log::{debug, trace, warn};
use serde::Deserialize;

use crate::error::CalendarError;
use crate::event::{local_instant, CalendarEvent, Identity, TimeInterval};

pub const UNTITLED_EVENT: &str = "No Title";

/// Read access to attendee calendars.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events of `identity` that overlap `window`, sorted by start. An empty calendar is `Ok(vec![])`.
    async fn busy_intervals(
        &self,
        identity: &Identity,
        window: &TimeInterval,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
}

fn overlapping_sorted(events: &[CalendarEvent], window: &TimeInterval) -> Vec<CalendarEvent> {
    events
        .iter()
        .filter(|event| event.interval.overlaps(window))
        .cloned()
        .sorted_by_key(|event| event.interval.start())
        .collect()
}

/// In-memory calendars keyed by identity.
#[derive(Clone, Debug, Default)]
pub struct StaticCalendar {
    events: HashMap<String, Vec<CalendarEvent>>,
    failing: HashSet<String>,
}

impl StaticCalendar {
    pub fn new() -> Self {
        StaticCalendar::default()
    }

    pub fn with_events(mut self, identity: &Identity, events: Vec<CalendarEvent>) -> Self {
        self.events
            .entry(identity.as_str().to_ascii_lowercase())
            .or_default()
            .extend(events);
        self
    }

    /// Lookups for `identity` fail as if its calendar service were down.
    pub fn failing_for(mut self, identity: &Identity) -> Self {
        self.failing.insert(identity.as_str().to_ascii_lowercase());
        self
    }
}

#[async_trait]
impl CalendarProvider for StaticCalendar {
    async fn busy_intervals(
        &self,
        identity: &Identity,
        window: &TimeInterval,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let key = identity.as_str().to_ascii_lowercase();
        if self.failing.contains(&key) {
            return Err(CalendarError::Unavailable {
                identity: identity.to_string(),
                reason: "calendar marked as failing".to_string(),
            });
        }

        Ok(self
            .events
            .get(&key)
            .map(|events| overlapping_sorted(events, window))
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteAttendee {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteEvent {
    #[serde(default)]
    start: RemoteTime,
    #[serde(default)]
    end: RemoteTime,
    attendees: Option<Vec<RemoteAttendee>>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteEventList {
    #[serde(default)]
    items: Vec<RemoteEvent>,
}

fn parse_all_day(date: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| CalendarError::InvalidEvent(format!("bad date `{}`", date)))
}

fn parse_instant(time: &RemoteTime, offset: FixedOffset, end: bool) -> Result<DateTime<FixedOffset>, CalendarError> {
    if let Some(date_time) = &time.date_time {
        return DateTime::parse_from_rfc3339(date_time)
            .map_err(|_| CalendarError::InvalidEvent(format!("bad dateTime `{}`", date_time)));
    }

    let date = time
        .date
        .as_deref()
        .ok_or_else(|| CalendarError::InvalidEvent("event without start or end".to_string()))
        .and_then(parse_all_day)?;

    let clock = if end {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .unwrap_or(NaiveTime::MIN);

    Ok(local_instant(date, clock, offset))
}

impl RemoteEvent {
    fn into_event(self, offset: FixedOffset) -> Result<CalendarEvent, CalendarError> {
        let start = parse_instant(&self.start, offset, false)?;

        // All-day end dates are exclusive: a one-day event ends on the following date.
        let end = match (&self.start.date, &self.end.date, &self.end.date_time) {
            (Some(first), Some(last), None) if first != last => {
                let last = parse_all_day(last)?.pred_opt().unwrap_or(start.date_naive());
                local_instant(last, NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN), offset)
            }
            (Some(_), None, None) => parse_instant(&self.start, offset, true)?,
            _ => parse_instant(&self.end, offset, true)?,
        };

        let interval = TimeInterval::new(start, end).ok_or_else(|| {
            CalendarError::InvalidEvent(format!(
                "event ends before it starts: {} .. {}",
                start.to_rfc3339_opts(SecondsFormat::Secs, false),
                end.to_rfc3339_opts(SecondsFormat::Secs, false)
            ))
        })?;
        let summary = self.summary.unwrap_or_else(|| UNTITLED_EVENT.to_string());

        match self.attendees {
            None => Ok(CalendarEvent::redacted(interval, 1, summary)),
            Some(attendees) => {
                let attendees = attendees
                    .into_iter()
                    .filter_map(|attendee| attendee.email)
                    .map(Identity::new)
                    .unique_by(|identity| identity.as_str().to_ascii_lowercase())
                    .collect();
                Ok(CalendarEvent::new(interval, attendees, summary))
            }
        }
    }
}

/// Reads Google-Calendar-shaped event lists over HTTP:
/// `GET {base_url}/calendars/{identity}/events?timeMin=..&timeMax=..`.
///
/// All-day events span `00:00:00`..`23:59:59` at the configured offset. Events without an
/// attendee list belong to the calendar owner alone and are reported as `SELF`.
pub struct HttpCalendar {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    offset: FixedOffset,
    timeout: Duration,
}

impl HttpCalendar {
    pub fn new(base_url: impl Into<String>, offset: FixedOffset, timeout: Duration) -> Self {
        HttpCalendar {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: None,
            offset,
            timeout,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendar {
    async fn busy_intervals(
        &self,
        identity: &Identity,
        window: &TimeInterval,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url.trim_end_matches('/'),
            identity
        );
        let unavailable = |reason: String| CalendarError::Unavailable {
            identity: identity.to_string(),
            reason,
        };

        let mut call = self
            .client
            .get(url)
            .timeout(self.timeout)
            .query(&[
                ("timeMin", window.start().to_rfc3339_opts(SecondsFormat::Secs, false)),
                ("timeMax", window.end().to_rfc3339_opts(SecondsFormat::Secs, false)),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ]);
        if let Some(token) = &self.bearer_token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            if e.is_timeout() {
                CalendarError::Timeout {
                    identity: identity.to_string(),
                    timeout: self.timeout,
                }
            } else {
                unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let list: RemoteEventList = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        debug!("{} remote events for {}", list.items.len(), identity);

        let events: Vec<CalendarEvent> = list
            .items
            .into_iter()
            .filter_map(|remote| match remote.into_event(self.offset) {
                Ok(event) => {
                    trace!("{} {:?}", identity, event);
                    Some(event)
                }
                Err(e) => {
                    warn!("Skipping event for {}: {}", identity, e);
                    None
                }
            })
            .collect();

        Ok(overlapping_sorted(&events, window))
    }
}
