//! Maps day phrases ("next Thursday", "tomorrow", "2025-07-17") onto one calendar day.
//!
//! Every relative phrase is resolved against the request's own timestamp, never the wall clock.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DayConstraint {
    /// A named weekday, with or without "next".
    Weekday(Weekday),
    Date(NaiveDate),
    Tomorrow,
    NextWeek,
    Flexible,
}

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

/// Weekday meetings in "next week" land on.
const NEXT_WEEK_DAY: Weekday = Weekday::Tue;

fn weekday_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
            .expect("weekday pattern is valid")
    })
}

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date pattern is valid")
    })
}

fn dmy_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{4})\b").expect("dmy date pattern is valid")
    })
}

fn tomorrow_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\btomorrow\b").expect("tomorrow pattern is valid"))
}

fn next_week_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bnext\s+week\b").expect("next week pattern is valid"))
}

fn explicit_dates(phrase: &str) -> impl Iterator<Item = NaiveDate> + '_ {
    fn from_captures(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
    }

    let iso = iso_date_pattern()
        .captures_iter(phrase)
        .filter_map(|c| from_captures(&c[1], &c[2], &c[3]));
    let dmy = dmy_date_pattern()
        .captures_iter(phrase)
        .filter_map(|c| from_captures(&c[3], &c[2], &c[1]));
    iso.chain(dmy)
}

/// Reads the first day phrase found in `phrase`.
///
/// Precedence: explicit date, weekday name (earliest mention wins), "tomorrow", "next week".
/// Anything else is [`DayConstraint::Flexible`].
///
/// # Examples
/// ```
/// use chrono::Weekday;
/// use meetplan::day::{parse_day_phrase, DayConstraint};
///
/// assert_eq!(parse_day_phrase("Let's meet next Thursday"), DayConstraint::Weekday(Weekday::Thu));
/// assert_eq!(parse_day_phrase("sometime soon"), DayConstraint::Flexible);
/// ```
pub fn parse_day_phrase(phrase: &str) -> DayConstraint {
    day_phrase(phrase, None)
}

/// [`parse_day_phrase`] for a request sent on `earliest`. Dates before it are references to
/// the past, not proposals, so they are skipped.
///
/// # Examples
/// ```
/// use chrono::{NaiveDate, Weekday};
/// use meetplan::day::{parse_day_phrase_from, DayConstraint};
///
/// let sent = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
/// assert_eq!(
///     parse_day_phrase_from("Following up on the 2025-06-30 review, let's meet Thursday", sent),
///     DayConstraint::Weekday(Weekday::Thu)
/// );
/// ```
pub fn parse_day_phrase_from(phrase: &str, earliest: NaiveDate) -> DayConstraint {
    day_phrase(phrase, Some(earliest))
}

fn day_phrase(phrase: &str, earliest: Option<NaiveDate>) -> DayConstraint {
    let upcoming = explicit_dates(phrase)
        .find(|date| earliest.map_or(true, |earliest| *date >= earliest));
    if let Some(date) = upcoming {
        return DayConstraint::Date(date);
    }

    if let Some(found) = weekday_pattern().find(phrase) {
        let name = found.as_str().to_ascii_lowercase();
        if let Some((_, weekday)) = WEEKDAYS.iter().find(|(day, _)| *day == name) {
            return DayConstraint::Weekday(*weekday);
        }
    }

    if tomorrow_pattern().is_match(phrase) {
        DayConstraint::Tomorrow
    } else if next_week_pattern().is_match(phrase) {
        DayConstraint::NextWeek
    } else {
        DayConstraint::Flexible
    }
}

/// Next occurrence of `weekday` strictly after `reference`. Asking for today's weekday yields
/// the same weekday seven days later.
pub fn next_weekday(reference: NaiveDate, weekday: Weekday) -> NaiveDate {
    let today = i64::from(reference.weekday().num_days_from_monday());
    let target = i64::from(weekday.num_days_from_monday());
    let mut days_ahead = target - today;
    if days_ahead <= 0 {
        days_ahead += 7;
    }
    reference + Duration::days(days_ahead)
}

/// The first weekday after `reference`.
pub fn next_business_day(reference: NaiveDate) -> NaiveDate {
    let mut day = reference + Duration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day + Duration::days(1);
    }
    day
}

/// Resolves `constraint` to a single day, relative to the request's date. A date before
/// `reference` is treated as [`DayConstraint::Flexible`].
///
/// # Examples
/// ```
/// use chrono::{NaiveDate, Weekday};
/// use meetplan::day::{resolve_day, DayConstraint};
///
/// // 2025-07-03 is a Thursday
/// let thursday = NaiveDate::from_ymd_opt(2025, 7, 3).unwrap();
///
/// assert_eq!(
///     resolve_day(thursday, DayConstraint::Weekday(Weekday::Thu)),
///     NaiveDate::from_ymd_opt(2025, 7, 10).unwrap()
/// );
/// assert_eq!(
///     resolve_day(thursday, DayConstraint::Flexible),
///     NaiveDate::from_ymd_opt(2025, 7, 4).unwrap()
/// );
/// ```
pub fn resolve_day(reference: NaiveDate, constraint: DayConstraint) -> NaiveDate {
    match constraint {
        DayConstraint::Weekday(weekday) => next_weekday(reference, weekday),
        DayConstraint::Date(date) if date >= reference => date,
        DayConstraint::Date(_) | DayConstraint::Flexible => next_business_day(reference),
        DayConstraint::Tomorrow => reference + Duration::days(1),
        DayConstraint::NextWeek => {
            let next_monday = next_weekday(reference, Weekday::Mon);
            next_monday + Duration::days(i64::from(NEXT_WEEK_DAY.num_days_from_monday()))
        }
    }
}
