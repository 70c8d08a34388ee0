use std::ops::RangeInclusive;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use itertools::Itertools;
use log::{debug, trace};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::day::{parse_day_phrase, parse_day_phrase_from, DayConstraint};
use crate::error::IntentError;
use crate::event::Identity;

pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Structured scheduling requirement: who, how long, when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingIntent {
    /// Organizer first, then attendees in request order. No duplicates.
    pub participants: Vec<Identity>,
    pub duration_minutes: u32,
    pub day: DayConstraint,
    /// An explicit clock time. When present the slot is pinned to it.
    pub time: Option<NaiveTime>,
}

impl SchedulingIntent {
    /// Used whenever extraction fails: everybody, default duration, any day.
    pub fn fallback(request: &IntentRequest<'_>, duration_minutes: u32) -> SchedulingIntent {
        SchedulingIntent {
            participants: request.everyone(),
            duration_minutes,
            day: DayConstraint::Flexible,
            time: None,
        }
    }

    /// # Errors
    /// `IntentError::Malformed` when the duration falls outside `bounds`.
    pub fn within(self, bounds: &RangeInclusive<u32>) -> Result<SchedulingIntent, IntentError> {
        if bounds.contains(&self.duration_minutes) {
            Ok(self)
        } else {
            Err(IntentError::Malformed(format!(
                "duration {} minutes outside {}..={}",
                self.duration_minutes,
                bounds.start(),
                bounds.end()
            )))
        }
    }
}

/// Where the intent used for a resolution came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Extractor,
    Default,
}

/// Input handed to an [`IntentExtractor`].
#[derive(Clone, Copy, Debug)]
pub struct IntentRequest<'a> {
    pub text: &'a str,
    pub organizer: &'a Identity,
    pub attendees: &'a [Identity],
    /// Day the request was sent. Explicit dates before it are ignored.
    pub sent_on: Option<NaiveDate>,
}

impl<'a> IntentRequest<'a> {
    /// Organizer followed by every attendee, deduplicated case-insensitively.
    pub fn everyone(&self) -> Vec<Identity> {
        std::iter::once(self.organizer)
            .chain(self.attendees.iter())
            .unique_by(|identity| identity.as_str().to_ascii_lowercase())
            .cloned()
            .collect()
    }

    /// Finds a known identity by full address, by local part, or by the first dotted segment of
    /// the local part ("userone" finds `userone.amd@gmail.com`).
    fn lookup(&self, name: &str) -> Option<&'a Identity> {
        let candidate = Identity::new(name);
        let local = local_name(name);
        std::iter::once(self.organizer)
            .chain(self.attendees.iter())
            .find(|known| {
                if name.contains('@') {
                    return known.matches(&candidate);
                }
                let known_local = known.local_part();
                known_local.eq_ignore_ascii_case(&local)
                    || known_local
                        .split('.')
                        .next()
                        .map_or(false, |first| first.eq_ignore_ascii_case(&local))
            })
    }
}

/// Duration as reported by an extractor: a number, or text such as "an hour".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedDuration {
    Minutes(i64),
    Text(String),
}

/// Raw extractor output, the JSON contract of the language model:
/// `{"participants": [...], "duration_minutes": 30, "time_constraints": "Monday 9 AM"}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIntent {
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub duration_minutes: Option<ReportedDuration>,
    #[serde(default)]
    pub time_constraints: Option<String>,
}

impl RawIntent {
    /// Enforces the extractor contract on raw output.
    ///
    /// Participants are limited to the organizer and listed attendees; bare names resolve to
    /// the attendee with that local part, or to `name@placeholder_domain`. The organizer is
    /// always kept. Day and time come from `time_constraints`, falling back to the request text.
    ///
    /// # Errors
    /// `IntentError::Malformed` when the reported duration is not a positive number of minutes.
    pub fn into_intent(
        self,
        request: &IntentRequest<'_>,
        placeholder_domain: &str,
    ) -> Result<SchedulingIntent, IntentError> {
        let participants = self.resolve_participants(request, placeholder_domain);

        let duration_minutes = match self.duration_minutes {
            None => DEFAULT_DURATION_MINUTES,
            Some(ReportedDuration::Minutes(minutes)) => u32::try_from(minutes)
                .ok()
                .filter(|minutes| *minutes > 0)
                .ok_or_else(|| IntentError::Malformed(format!("duration {} minutes", minutes)))?,
            Some(ReportedDuration::Text(text)) => text
                .trim()
                .parse::<u32>()
                .ok()
                .or_else(|| parse_duration_minutes(&text))
                .filter(|minutes| *minutes > 0)
                .ok_or_else(|| IntentError::Malformed(format!("duration `{}`", text)))?,
        };

        let constraints = self.time_constraints.unwrap_or_default();
        let read_day = |phrase: &str| match request.sent_on {
            Some(sent_on) => parse_day_phrase_from(phrase, sent_on),
            None => parse_day_phrase(phrase),
        };
        let day = match read_day(&constraints) {
            DayConstraint::Flexible => read_day(request.text),
            day => day,
        };
        let time = parse_time_of_day(&constraints).or_else(|| parse_time_of_day(request.text));

        debug!(
            "Intent: {} participants, {} minutes, day {:?}, time {:?}",
            participants.len(),
            duration_minutes,
            day,
            time
        );

        Ok(SchedulingIntent {
            participants,
            duration_minutes,
            day,
            time,
        })
    }

    fn resolve_participants(&self, request: &IntentRequest<'_>, placeholder_domain: &str) -> Vec<Identity> {
        let everyone = request.everyone();
        if self.participants.is_empty() {
            return everyone;
        }

        let named: Vec<Identity> = self
            .participants
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| match request.lookup(name) {
                Some(known) => known.clone(),
                None if name.contains('@') => Identity::new(name),
                None => synthetic_email(name, placeholder_domain),
            })
            .filter(|candidate| {
                let allowed = everyone.iter().any(|known| known.matches(candidate));
                if !allowed {
                    trace!("Dropping participant {} outside the attendee list", candidate);
                }
                allowed
            })
            .collect();

        let chosen: Vec<Identity> = std::iter::once(request.organizer.clone())
            .chain(named)
            .unique_by(|identity| identity.as_str().to_ascii_lowercase())
            .collect();

        if chosen.len() == 1 {
            everyone
        } else {
            chosen
        }
    }
}

fn local_name(name: &str) -> String {
    name.split_whitespace().join(".").to_ascii_lowercase()
}

fn synthetic_email(name: &str, placeholder_domain: &str) -> Identity {
    Identity::new(format!("{}@{}", local_name(name), placeholder_domain))
}

fn hours_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(?:hours?|hrs?)\b").expect("hours pattern is valid")
    })
}

fn minutes_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+)\s*(?:minutes?|mins?)\b").expect("minutes pattern is valid")
    })
}

fn worded_duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(an hour and a half|half an hour|half hour|an hour|one hour)\b")
            .expect("worded duration pattern is valid")
    })
}

/// Reads a meeting length from free text.
///
/// # Examples
/// ```
/// use meetplan::intent::parse_duration_minutes;
///
/// assert_eq!(parse_duration_minutes("a 45 min sync"), Some(45));
/// assert_eq!(parse_duration_minutes("for an hour"), Some(60));
/// assert_eq!(parse_duration_minutes("1.5 hours"), Some(90));
/// assert_eq!(parse_duration_minutes("2 hrs 30 mins"), Some(150));
/// assert_eq!(parse_duration_minutes("let's talk"), None);
/// ```
pub fn parse_duration_minutes(text: &str) -> Option<u32> {
    if let Some(found) = worded_duration_pattern().find(text) {
        return match found.as_str().to_ascii_lowercase().as_str() {
            "an hour and a half" => Some(90),
            "half an hour" | "half hour" => Some(30),
            _ => Some(60),
        };
    }

    // "2 hrs 30 mins" is both parts summed
    let hours = hours_pattern()
        .captures(text)
        .and_then(|captures| captures[1].parse::<f64>().ok());
    let minutes = minutes_pattern()
        .captures(text)
        .and_then(|captures| captures[1].parse::<f64>().ok());
    if hours.is_none() && minutes.is_none() {
        return None;
    }

    Some((hours.unwrap_or(0.0) * 60.0 + minutes.unwrap_or(0.0)).round())
        .filter(|total| *total >= 1.0 && *total <= f64::from(u32::MAX))
        .map(|total| total as u32)
}

fn meridiem_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s?m\b\.?")
            .expect("meridiem pattern is valid")
    })
}

fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").expect("clock pattern is valid")
    })
}

fn noon_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bnoon\b").expect("noon pattern is valid"))
}

/// Reads an explicit clock time from free text: "9:00 AM", "11:00 A.M", "10 am", "14:30", "noon".
///
/// # Examples
/// ```
/// use chrono::NaiveTime;
/// use meetplan::intent::parse_time_of_day;
///
/// assert_eq!(parse_time_of_day("Monday at 9:00 AM"), NaiveTime::from_hms_opt(9, 0, 0));
/// assert_eq!(parse_time_of_day("at 3 p.m."), NaiveTime::from_hms_opt(15, 0, 0));
/// assert_eq!(parse_time_of_day("next Thursday"), None);
/// ```
pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    if let Some(captures) = meridiem_pattern().captures(text) {
        let hour: u32 = captures[1].parse().ok()?;
        let minute: u32 = captures.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = captures[3].eq_ignore_ascii_case("p");
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (hour, true) => hour + 12,
            (hour, false) => hour,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    if let Some(captures) = clock_pattern().captures(text) {
        return NaiveTime::from_hms_opt(captures[1].parse().ok()?, captures[2].parse().ok()?, 0);
    }

    if noon_pattern().is_match(text) {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }

    None
}

/// Parses a model reply into a [`RawIntent`]. Markdown fences and prose around the JSON object
/// are ignored.
///
/// # Errors
/// `IntentError::Malformed` when no JSON object with the expected shape is found.
pub fn parse_model_content(content: &str) -> Result<RawIntent, IntentError> {
    let start = content.find('{');
    let end = content.rfind('}');

    match (start, end) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&content[start..=end])
            .map_err(|e| IntentError::Malformed(e.to_string())),
        _ => Err(IntentError::Malformed(format!(
            "no JSON object in reply `{}`",
            content.chars().take(80).collect::<String>()
        ))),
    }
}

/// Turns a meeting request's free text into a raw intent.
///
/// Implementations only report what they read; [`RawIntent::into_intent`] applies the
/// participant, duration, and day rules uniformly.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, request: &IntentRequest<'_>) -> Result<RawIntent, IntentError>;

    fn name(&self) -> &'static str;
}

/// Deterministic, rule-based extractor. Reads explicit durations from the text and hands the
/// whole text on as the time constraint.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordExtractor;

#[async_trait]
impl IntentExtractor for KeywordExtractor {
    async fn extract(&self, request: &IntentRequest<'_>) -> Result<RawIntent, IntentError> {
        Ok(RawIntent {
            participants: Vec::new(),
            duration_minutes: parse_duration_minutes(request.text)
                .map(|minutes| ReportedDuration::Minutes(i64::from(minutes))),
            time_constraints: Some(request.text.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Canned answers for tests. Each call pops the next reply; the last one repeats.
#[derive(Debug)]
pub struct FixtureExtractor {
    replies: Mutex<Vec<Result<String, IntentError>>>,
}

impl FixtureExtractor {
    /// Replies with `content` as if a model had produced it.
    pub fn replying(content: impl Into<String>) -> Self {
        FixtureExtractor {
            replies: Mutex::new(vec![Ok(content.into())]),
        }
    }

    pub fn failing(error: IntentError) -> Self {
        FixtureExtractor {
            replies: Mutex::new(vec![Err(error)]),
        }
    }

    pub fn sequence(replies: Vec<Result<String, IntentError>>) -> Self {
        let mut replies = replies;
        replies.reverse();
        FixtureExtractor {
            replies: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl IntentExtractor for FixtureExtractor {
    async fn extract(&self, _request: &IntentRequest<'_>) -> Result<RawIntent, IntentError> {
        let reply = {
            let mut replies = self.replies.lock();
            if replies.len() > 1 {
                replies.pop()
            } else {
                replies.last().cloned()
            }
        };

        match reply {
            Some(Ok(content)) => parse_model_content(&content),
            Some(Err(error)) => Err(error),
            None => Err(IntentError::Unavailable("no fixture configured".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
