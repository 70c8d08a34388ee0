//! JSON payloads of the three pipeline stages and their assembly.
//!
//! Field names are fixed by the wire contract. Every stage carries every field of the stage
//! before it.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::event::{local_instant, CalendarEvent, Identity, TimeInterval};
use crate::intent::IntentSource;
use crate::resolver::{AttendeeEvents, ResolvedSlot};

/// Summary used for the new meeting when the request has no subject.
pub const DEFAULT_SUBJECT: &str = "Meeting";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeRef {
    pub email: String,
}

/// Stage 1: the request as received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    #[serde(rename = "Request_id", default)]
    pub request_id: String,
    /// `DD-MM-YYYYTHH:MM:SS`
    #[serde(rename = "Datetime", default)]
    pub datetime: String,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Attendees", default)]
    pub attendees: Vec<AttendeeRef>,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "EmailContent", default)]
    pub email_content: String,
}

/// A request that passed validation, with identities and timestamp parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub organizer: Identity,
    /// Listed attendees in request order, without duplicates or the organizer.
    pub attendees: Vec<Identity>,
    pub received_at: DateTime<FixedOffset>,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn parse_email(raw: &str) -> Result<Identity, ValidationError> {
    let trimmed = raw.trim();
    if email_pattern().is_match(trimmed) {
        Ok(Identity::new(trimmed))
    } else {
        Err(ValidationError::InvalidEmail(raw.to_string()))
    }
}

/// Parses the request `Datetime` in `offset` local time.
///
/// Accepts `DD-MM-YYYYTHH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, and the bare dates `DD-MM-YYYY` and
/// `YYYY-MM-DD` (read as noon). A value that carries its own offset keeps it.
///
/// # Examples
/// ```
/// use chrono::FixedOffset;
/// use meetplan::wire::{format_timestamp, parse_request_datetime};
///
/// let ist = FixedOffset::east_opt(19_800).unwrap();
/// let parsed = parse_request_datetime("02-07-2025T12:34:55", ist).unwrap();
///
/// assert_eq!(format_timestamp(&parsed), "2025-07-02T12:34:55+05:30");
/// assert!(parse_request_datetime("July 2nd", ist).is_err());
/// ```
pub fn parse_request_datetime(
    raw: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, ValidationError> {
    let value = raw.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Ok(with_offset);
    }

    let local = ["%d-%m-%YT%H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            ["%d-%m-%Y", "%Y-%m-%d"]
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .and_then(|date| NaiveTime::from_hms_opt(12, 0, 0).map(|noon| date.and_time(noon)))
        })
        .ok_or_else(|| ValidationError::InvalidDatetime(raw.to_string()))?;

    Ok(local_instant(local.date(), local.time(), offset))
}

/// RFC 3339 with whole seconds and a numeric offset: `2025-07-17T10:30:00+05:30`.
pub fn format_timestamp(instant: &DateTime<FixedOffset>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl MeetingRequest {
    /// Checks required fields, email syntax and the datetime format.
    ///
    /// # Errors
    /// The first problem found, in field order: `Request_id`, `Datetime`, `From`, `Attendees`,
    /// `EmailContent`.
    pub fn validate(&self, offset: FixedOffset) -> Result<ValidatedRequest, ValidationError> {
        if self.request_id.trim().is_empty() {
            return Err(ValidationError::MissingField("Request_id"));
        }
        if self.datetime.trim().is_empty() {
            return Err(ValidationError::MissingField("Datetime"));
        }
        let received_at = parse_request_datetime(&self.datetime, offset)?;

        if self.from.trim().is_empty() {
            return Err(ValidationError::MissingField("From"));
        }
        let organizer = parse_email(&self.from)?;

        let attendees = self
            .attendees
            .iter()
            .map(|attendee| parse_email(&attendee.email))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|attendee| !attendee.matches(&organizer))
            .unique_by(|attendee| attendee.as_str().to_ascii_lowercase())
            .collect();

        if self.email_content.trim().is_empty() {
            return Err(ValidationError::MissingField("EmailContent"));
        }

        Ok(ValidatedRequest {
            organizer,
            attendees,
            received_at,
        })
    }

    /// The new meeting's summary.
    pub fn summary(&self) -> &str {
        self.subject
            .as_deref()
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
    }
}

/// Stage 2: the request plus the search window and duration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRequest {
    #[serde(flatten)]
    pub request: MeetingRequest,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
    /// Minutes, as a string.
    #[serde(rename = "Duration_mins")]
    pub duration_mins: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "StartTime")]
    pub start_time: String,
    #[serde(rename = "EndTime")]
    pub end_time: String,
    #[serde(rename = "NumAttendees")]
    pub num_attendees: usize,
    /// Emails, or `["SELF"]` for a redacted event.
    #[serde(rename = "Attendees")]
    pub attendees: Vec<String>,
    #[serde(rename = "Summary")]
    pub summary: String,
}

impl From<&CalendarEvent> for WireEvent {
    fn from(event: &CalendarEvent) -> Self {
        WireEvent {
            start_time: format_timestamp(&event.interval.start()),
            end_time: format_timestamp(&event.interval.end()),
            num_attendees: event.attendee_count,
            attendees: event.attendees.iter().map(|a| a.to_string()).collect(),
            summary: event.summary.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeWithEvents {
    pub email: String,
    #[serde(default)]
    pub events: Vec<WireEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarAccess {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Completion flag per pipeline stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowFlags {
    pub request_received: bool,
    pub intent_extracted: bool,
    pub availability_gathered: bool,
    pub slot_resolved: bool,
    pub output_assembled: bool,
}

/// Annotations on a final payload. An empty object deserializes to the default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub conflicts_detected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_source: Option<IntentSource>,
    pub warnings: Vec<String>,
    pub calendar_access: CalendarAccess,
    pub workflow: WorkflowFlags,
}

/// Stage 3: the request, the window, every participant's events and the chosen slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMeeting {
    #[serde(rename = "Request_id")]
    pub request_id: String,
    #[serde(rename = "Datetime")]
    pub datetime: String,
    #[serde(rename = "Location")]
    pub location: Option<String>,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Attendees")]
    pub attendees: Vec<AttendeeWithEvents>,
    #[serde(rename = "Subject")]
    pub subject: Option<String>,
    #[serde(rename = "EmailContent")]
    pub email_content: String,
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
    #[serde(rename = "EventStart")]
    pub event_start: String,
    #[serde(rename = "EventEnd")]
    pub event_end: String,
    #[serde(rename = "Duration_mins")]
    pub duration_mins: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Builds stage 2 from stage 1.
pub fn assemble_processed(
    request: &MeetingRequest,
    window: &TimeInterval,
    duration_minutes: u32,
) -> ProcessedRequest {
    ProcessedRequest {
        request: request.clone(),
        start: format_timestamp(&window.start()),
        end: format_timestamp(&window.end()),
        duration_mins: duration_minutes.to_string(),
    }
}

/// Builds stage 3 from stage 2 and a resolution. `metadata.conflicts_detected` is always
/// taken from `resolved`.
///
/// Participants come first, then `uninvited`: people on the request the meeting leaves out,
/// listed with their own events only.
pub fn assemble_output(
    processed: &ProcessedRequest,
    resolved: &ResolvedSlot,
    uninvited: &[AttendeeEvents],
    metadata: Metadata,
) -> ScheduledMeeting {
    let request = &processed.request;
    let attendees = resolved
        .per_attendee_events
        .iter()
        .chain(uninvited)
        .map(|attendee| AttendeeWithEvents {
            email: attendee.identity.to_string(),
            events: attendee.events.iter().map(WireEvent::from).collect(),
        })
        .collect();

    ScheduledMeeting {
        request_id: request.request_id.clone(),
        datetime: request.datetime.clone(),
        location: request.location.clone(),
        from: request.from.clone(),
        attendees,
        subject: request.subject.clone(),
        email_content: request.email_content.clone(),
        start: processed.start.clone(),
        end: processed.end.clone(),
        event_start: format_timestamp(&resolved.slot.start()),
        event_end: format_timestamp(&resolved.slot.end()),
        duration_mins: processed.duration_mins.clone(),
        metadata: Metadata {
            conflicts_detected: resolved.conflicts_detected,
            ..metadata
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::resolver::{MeetingQuery, SlotResolver};
    use chrono::TimeZone;
    use std::collections::{BTreeSet, HashMap};

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(19_800).unwrap()
    }

    fn sample() -> MeetingRequest {
        serde_json::from_str(
            r#"{
                "Request_id": "6118b54f-907b-4451-8d48-dd13d76033a5",
                "Datetime": "02-07-2025T12:34:55",
                "Location": "IISc Bangalore",
                "From": "userone.amd@gmail.com",
                "Attendees": [
                    {"email": "usertwo.amd@gmail.com"},
                    {"email": "userthree.amd@gmail.com"},
                    {"email": "UserTwo.amd@gmail.com"},
                    {"email": "userone.amd@gmail.com"}
                ],
                "Subject": "Agentic AI Project Status Update",
                "EmailContent": "Hi team, let's meet on Thursday for 30 minutes to discuss the status of Agentic AI Project."
            }"#,
        )
        .unwrap()
    }

    fn keys(value: &serde_json::Value) -> BTreeSet<String> {
        value
            .as_object()
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn validation_normalizes_attendees() {
        let validated = sample().validate(ist()).unwrap();

        assert_eq!(validated.organizer, Identity::new("userone.amd@gmail.com"));
        assert_eq!(
            validated.attendees,
            vec![
                Identity::new("usertwo.amd@gmail.com"),
                Identity::new("userthree.amd@gmail.com")
            ]
        );
        assert_eq!(format_timestamp(&validated.received_at), "2025-07-02T12:34:55+05:30");
    }

    #[test]
    fn validation_errors_carry_codes() {
        let mut missing = sample();
        missing.email_content = "  ".to_string();
        let mut bad_email = sample();
        bad_email.attendees.push(AttendeeRef {
            email: "not-an-email".to_string(),
        });
        let mut bad_datetime = sample();
        bad_datetime.datetime = "2025/07/02 12:34".to_string();

        assert_eq!(
            missing.validate(ist()).unwrap_err().error_code(),
            "MISSING_REQUIRED_FIELD"
        );
        assert_eq!(bad_email.validate(ist()).unwrap_err().error_code(), "INVALID_EMAIL");
        assert_eq!(
            bad_datetime.validate(ist()).unwrap_err().error_code(),
            "INVALID_DATETIME_FORMAT"
        );
    }

    #[test]
    fn datetime_formats() {
        for raw in [
            "17-07-2025T10:00:00",
            "2025-07-17T10:00:00",
            "2025-07-17T10:00:00+05:30",
        ] {
            assert_eq!(
                format_timestamp(&parse_request_datetime(raw, ist()).unwrap()),
                "2025-07-17T10:00:00+05:30",
                "{}",
                raw
            );
        }
        assert_eq!(
            format_timestamp(&parse_request_datetime("17-07-2025", ist()).unwrap()),
            "2025-07-17T12:00:00+05:30"
        );
    }

    #[test]
    fn missing_subject_uses_default_summary() {
        let mut request = sample();
        request.subject = None;
        assert_eq!(request.summary(), DEFAULT_SUBJECT);

        request.subject = Some("  Goals ".to_string());
        assert_eq!(request.summary(), "Goals");
    }

    #[test]
    fn stage_one_round_trips_location_as_null() {
        let mut request = sample();
        request.location = None;

        let value = serde_json::to_value(&request).unwrap();

        assert!(value["Location"].is_null());
        assert_eq!(
            keys(&value),
            ["Attendees", "Datetime", "EmailContent", "From", "Location", "Request_id", "Subject"]
                .iter()
                .map(|key| key.to_string())
                .collect::<BTreeSet<String>>()
        );
    }

    #[test]
    fn redacted_events_keep_their_count() {
        let start = ist().with_ymd_and_hms(2025, 7, 17, 10, 0, 0).unwrap();
        let interval = TimeInterval::starting_at(start, 60);
        let event = CalendarEvent::redacted(interval, 3, "1:1");

        let wire = serde_json::to_value(WireEvent::from(&event)).unwrap();

        assert_eq!(wire["NumAttendees"], 3);
        assert_eq!(wire["Attendees"], serde_json::json!(["SELF"]));
        assert_eq!(wire["StartTime"], "2025-07-17T10:00:00+05:30");
        assert_eq!(wire["EndTime"], "2025-07-17T11:00:00+05:30");
    }

    #[test]
    fn empty_metadata_object_is_valid() {
        let metadata: Metadata = serde_json::from_str("{}").unwrap();
        assert_eq!(metadata, Metadata::default());
    }

    #[test]
    fn every_stage_keeps_the_previous_fields() {
        let request = sample();
        let validated = request.validate(ist()).unwrap();
        let resolver = SlotResolver::new(&SchedulerConfig::default());
        let day = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
        let participants = std::iter::once(validated.organizer)
            .chain(validated.attendees)
            .collect();
        let resolved = resolver.resolve(
            &MeetingQuery {
                participants,
                day,
                duration_minutes: 30,
                time: None,
                subject: request.summary().to_string(),
            },
            &HashMap::new(),
        );

        let processed = assemble_processed(&request, &resolver.day_window(day), 30);
        let output = assemble_output(&processed, &resolved, &[], Metadata::default());

        let stage_one = serde_json::to_value(&request).unwrap();
        let stage_two = serde_json::to_value(&processed).unwrap();
        let stage_three = serde_json::to_value(&output).unwrap();

        assert!(keys(&stage_one).is_subset(&keys(&stage_two)));
        assert!(keys(&stage_two).is_subset(&keys(&stage_three)));
        assert_eq!(stage_two["Start"], "2025-07-03T09:00:00+05:30");
        assert_eq!(stage_two["End"], "2025-07-03T17:30:00+05:30");
        assert_eq!(stage_two["Duration_mins"], "30");
        assert_eq!(stage_three["EventStart"], "2025-07-03T09:00:00+05:30");
        assert_eq!(stage_three["EventEnd"], "2025-07-03T09:30:00+05:30");
        assert_eq!(stage_three["Attendees"][0]["email"], "userone.amd@gmail.com");
        assert_eq!(stage_three["Attendees"].as_array().map(Vec::len), Some(3));
        for (echo, attendee) in stage_one["Attendees"]
            .as_array()
            .into_iter()
            .flatten()
            .zip(stage_three["Attendees"].as_array().into_iter().flatten())
        {
            assert!(keys(echo).is_subset(&keys(attendee)));
        }
    }
}
