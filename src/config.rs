use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use log::warn;
use serde::Deserialize;

/// Seconds east of UTC for +05:30.
pub const DEFAULT_UTC_OFFSET_SECONDS: i32 = 19_800;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start of the working-hours search window.
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    /// Slot start used when no gap in the window is long enough.
    pub fallback_start: NaiveTime,
    pub default_duration_minutes: u32,
    /// Extracted durations outside `min..=max` are rejected.
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub utc_offset_seconds: i32,
    /// Domain appended to bare participant names.
    pub placeholder_domain: String,
    pub calendar_timeout_ms: u64,
    pub intent_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN),
            fallback_start: NaiveTime::from_hms_opt(10, 30, 0).unwrap_or(NaiveTime::MIN),
            default_duration_minutes: 30,
            min_duration_minutes: 15,
            max_duration_minutes: 480,
            utc_offset_seconds: DEFAULT_UTC_OFFSET_SECONDS,
            placeholder_domain: "example.com".to_string(),
            calendar_timeout_ms: 5_000,
            intent_timeout_ms: 20_000,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overlaid with `MEETPLAN_*` environment variables. Values that do not parse are
    /// logged and ignored.
    ///
    /// | Variable | Example |
    /// |---|---|
    /// | `MEETPLAN_WORK_START` | `09:00` |
    /// | `MEETPLAN_WORK_END` | `17:30` |
    /// | `MEETPLAN_FALLBACK_START` | `10:30` |
    /// | `MEETPLAN_DEFAULT_DURATION_MINUTES` | `30` |
    /// | `MEETPLAN_MIN_DURATION_MINUTES` | `15` |
    /// | `MEETPLAN_MAX_DURATION_MINUTES` | `480` |
    /// | `MEETPLAN_UTC_OFFSET` | `+05:30` |
    /// | `MEETPLAN_PLACEHOLDER_DOMAIN` | `example.com` |
    /// | `MEETPLAN_CALENDAR_TIMEOUT_MS` | `5000` |
    /// | `MEETPLAN_INTENT_TIMEOUT_MS` | `20000` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = SchedulerConfig::default();

        overlay(&lookup, "MEETPLAN_WORK_START", parse_clock, &mut config.work_start);
        overlay(&lookup, "MEETPLAN_WORK_END", parse_clock, &mut config.work_end);
        overlay(&lookup, "MEETPLAN_FALLBACK_START", parse_clock, &mut config.fallback_start);
        overlay(
            &lookup,
            "MEETPLAN_DEFAULT_DURATION_MINUTES",
            |v| u32::from_str(v).ok().filter(|minutes| *minutes > 0),
            &mut config.default_duration_minutes,
        );
        overlay(
            &lookup,
            "MEETPLAN_MIN_DURATION_MINUTES",
            |v| u32::from_str(v).ok().filter(|minutes| *minutes > 0),
            &mut config.min_duration_minutes,
        );
        overlay(
            &lookup,
            "MEETPLAN_MAX_DURATION_MINUTES",
            |v| u32::from_str(v).ok().filter(|minutes| *minutes > 0),
            &mut config.max_duration_minutes,
        );
        overlay(&lookup, "MEETPLAN_UTC_OFFSET", parse_offset_seconds, &mut config.utc_offset_seconds);
        overlay(
            &lookup,
            "MEETPLAN_PLACEHOLDER_DOMAIN",
            |v| Some(v.trim().to_string()).filter(|domain| !domain.is_empty()),
            &mut config.placeholder_domain,
        );
        overlay(
            &lookup,
            "MEETPLAN_CALENDAR_TIMEOUT_MS",
            |v| u64::from_str(v).ok(),
            &mut config.calendar_timeout_ms,
        );
        overlay(
            &lookup,
            "MEETPLAN_INTENT_TIMEOUT_MS",
            |v| u64::from_str(v).ok(),
            &mut config.intent_timeout_ms,
        );

        if config.work_start >= config.work_end {
            warn!(
                "Working window {}..{} is empty, using defaults",
                config.work_start, config.work_end
            );
            let defaults = SchedulerConfig::default();
            config.work_start = defaults.work_start;
            config.work_end = defaults.work_end;
        }

        if config.min_duration_minutes > config.max_duration_minutes {
            warn!(
                "Duration bounds {}..={} are empty, using defaults",
                config.min_duration_minutes, config.max_duration_minutes
            );
            let defaults = SchedulerConfig::default();
            config.min_duration_minutes = defaults.min_duration_minutes;
            config.max_duration_minutes = defaults.max_duration_minutes;
        }
        if !config.duration_bounds().contains(&config.default_duration_minutes) {
            let clamped = config
                .default_duration_minutes
                .clamp(config.min_duration_minutes, config.max_duration_minutes);
            warn!(
                "Default duration {} is outside {:?}, using {}",
                config.default_duration_minutes,
                config.duration_bounds(),
                clamped
            );
            config.default_duration_minutes = clamped;
        }

        config
    }

    pub fn duration_bounds(&self) -> RangeInclusive<u32> {
        self.min_duration_minutes..=self.max_duration_minutes
    }

    /// The offset every produced timestamp carries. An out-of-range value falls back to UTC.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_seconds).unwrap_or_else(|| Utc.fix())
    }

    pub fn calendar_timeout(&self) -> Duration {
        Duration::from_millis(self.calendar_timeout_ms)
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::from_millis(self.intent_timeout_ms)
    }
}

fn overlay<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match parse(raw.trim()) {
            Some(value) => *slot = value,
            None => warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// `+05:30`, `-0800`, or `Z`.
fn parse_offset_seconds(value: &str) -> Option<i32> {
    if value.eq_ignore_ascii_case("z") {
        return Some(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// Connection settings for an OpenAI-compatible chat completion server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatCompletionConfig {
    /// Scheme and host, without the `/v1/...` path.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for ChatCompletionConfig {
    fn default() -> Self {
        ChatCompletionConfig {
            base_url: "http://localhost:3000".to_string(),
            model: "deepseek-ai/DeepSeek-R1-Distill-Qwen-7B".to_string(),
            api_key: None,
            temperature: 0.0,
            timeout_ms: 20_000,
        }
    }
}

impl ChatCompletionConfig {
    /// Reads `MEETPLAN_LLM_BASE_URL`, `MEETPLAN_LLM_MODEL`, `MEETPLAN_LLM_API_KEY`,
    /// `MEETPLAN_LLM_TEMPERATURE` and `MEETPLAN_LLM_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = ChatCompletionConfig::default();
        let lookup = |key: &str| env::var(key).ok();

        overlay(&lookup, "MEETPLAN_LLM_BASE_URL", |v| Some(v.trim_end_matches('/').to_string()), &mut config.base_url);
        overlay(&lookup, "MEETPLAN_LLM_MODEL", |v| Some(v.to_string()), &mut config.model);
        config.api_key = lookup("MEETPLAN_LLM_API_KEY").filter(|key| !key.is_empty());
        overlay(&lookup, "MEETPLAN_LLM_TEMPERATURE", |v| f32::from_str(v).ok(), &mut config.temperature);
        overlay(&lookup, "MEETPLAN_LLM_TIMEOUT_MS", |v| u64::from_str(v).ok(), &mut config.timeout_ms);

        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
