#![no_main]
use std::collections::HashMap;

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
use libfuzzer_sys::fuzz_target;
use meetplan::resolver::SlotStrategy;
use meetplan::{
    AttendeeAvailability, CalendarEvent, Identity, MeetingQuery, SchedulerConfig, SlotResolver,
    TimeInterval,
};

// Minutes since midnight, clamped to one day.
fuzz_target!(|data: (u8, Option<u16>, Vec<Vec<(u16, u8)>>)| {
    #[cfg(feature = "log")]
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Debug)
        .chain(std::io::stdout())
        .apply();

    let (duration, time, calendars) = data;
    let offset = FixedOffset::east_opt(19_800).unwrap();
    let day = NaiveDate::from_ymd_opt(2025, 7, 17).unwrap();
    let midnight = offset.with_ymd_and_hms(2025, 7, 17, 0, 0, 0).unwrap();

    let participants: Vec<Identity> = (0..calendars.len().min(16))
        .map(|i| Identity::new(format!("user{}@example.com", i)))
        .collect();
    let availabilities: HashMap<Identity, AttendeeAvailability> = participants
        .iter()
        .zip(calendars.iter())
        .map(|(identity, spans)| {
            let events = spans
                .iter()
                .filter_map(|&(start, len)| {
                    let start = midnight + chrono::Duration::minutes(i64::from(start % 1440));
                    let end = start + chrono::Duration::minutes(i64::from(len));
                    TimeInterval::new(start, end)
                })
                .map(|interval| CalendarEvent::new(interval, vec![identity.clone()], "Busy"))
                .collect();
            (identity.clone(), AttendeeAvailability::new(identity.clone(), events))
        })
        .collect();

    let query = MeetingQuery {
        participants: participants.clone(),
        day,
        duration_minutes: u32::from(duration),
        time: time.and_then(|t| NaiveTime::from_hms_opt(u32::from(t % 1440) / 60, u32::from(t % 60), 0)),
        subject: "Fuzz".to_string(),
    };

    let resolver = SlotResolver::new(&SchedulerConfig::default());
    let resolved = resolver.resolve(&query, &availabilities);

    assert_eq!(
        resolved.slot.duration().num_minutes(),
        i64::from(duration.max(1)),
        "Slot length should match the request"
    );
    assert_eq!(resolved.per_attendee_events.len(), participants.len());

    let expected = participants
        .iter()
        .filter(|identity| availabilities[*identity].is_busy_during(&resolved.slot))
        .count();
    assert_eq!(resolved.conflicts_detected, expected);

    for attendee in &resolved.per_attendee_events {
        assert_eq!(
            attendee.events.len(),
            availabilities[&attendee.identity].busy().len() + 1,
            "Exactly one event should be added"
        );
    }

    if resolved.strategy == SlotStrategy::FirstFit {
        assert_eq!(resolved.conflicts_detected, 0, "A free gap cannot conflict");
        assert!(resolved.window.start() <= resolved.slot.start());
        assert!(resolved.slot.end() <= resolved.window.end());
    }

    assert_eq!(resolver.resolve(&query, &availabilities), resolved);
});
