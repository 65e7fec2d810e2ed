//! Lookback window over the untyped `date_posted` strings adapters emit.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
const MONTH_SCALE_HOURS: u32 = 30 * 24;

static RE_DAYS_AGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\+?\s*(?:days?|d)\s+ago").expect("valid relative date regex")
});

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow {
    hours: u32,
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_HOURS)
    }
}

impl RecencyWindow {
    pub fn new(hours: u32) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    /// Saturates at the earliest representable instant for windows wider than chrono's range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_hours(i64::from(self.hours))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Inclusive at the cutoff. Dates that cannot be interpreted are admitted.
    pub fn admits(&self, date_posted: &str, now: DateTime<Utc>) -> bool {
        let raw = date_posted.trim();
        if raw.is_empty() {
            return true;
        }
        if let Some(ts) = parse_timestamp(raw) {
            return ts >= self.cutoff(now);
        }

        let lower = raw.to_lowercase();
        if lower.contains("month") || lower.contains("year") {
            return self.hours >= MONTH_SCALE_HOURS;
        }
        if let Some(days) = RE_DAYS_AGO
            .captures(&lower)
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            return days.saturating_mul(24) <= u64::from(self.hours);
        }
        true
    }
}

/// Absolute timestamps: ISO-8601 variants, RFC 2822 and unix seconds or millis.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let ts = raw.parse::<f64>().ok().filter(|ts| ts.is_finite() && *ts >= 0.0)?;
    let secs = if ts > 1e12 { ts / 1000.0 } else { ts };
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
}
