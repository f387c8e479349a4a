//! Dispatch-interval arithmetic and calendar boundaries.
//!
//! All times are naive NEM market time (AEST, no daylight saving). Dispatch
//! observations are stamped at the *end* of their 5-minute interval.

use crate::error::{NemedError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const DISPATCH_INTERVAL_MINUTES: i64 = 5;

/// Format accepted by the public entry points.
pub const MARKET_TIME_FORMAT: &str = "%Y/%m/%d %H:%M";

pub fn dispatch_interval() -> Duration {
    Duration::minutes(DISPATCH_INTERVAL_MINUTES)
}

/// Hours covered by one dispatch interval (5/60).
pub fn interval_hours() -> f64 {
    DISPATCH_INTERVAL_MINUTES as f64 / 60.0
}

/// Parse `yyyy/mm/dd HH:MM` (a trailing `:SS` is tolerated).
pub fn parse_market_time(value: &str, name: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    NaiveDateTime::parse_from_str(trimmed, MARKET_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y/%m/%d %H:%M:%S"))
        .map_err(|_| {
            NemedError::Validation(format!(
                "Invalid date string {:?} passed as {}. Required date format: yyyy/mm/dd HH:MM",
                value, name
            ))
        })
}

pub fn format_market_time(t: NaiveDateTime) -> String {
    t.format(MARKET_TIME_FORMAT).to_string()
}

pub fn is_interval_aligned(t: NaiveDateTime) -> bool {
    t.minute() as i64 % DISPATCH_INTERVAL_MINUTES == 0 && t.second() == 0 && t.nanosecond() == 0
}

/// A request window must be non-empty and sit on interval boundaries.
pub fn validate_range(start: NaiveDateTime, end: NaiveDateTime) -> Result<()> {
    if start >= end {
        return Err(NemedError::Validation(format!(
            "start ({}) must be before end ({})",
            format_market_time(start),
            format_market_time(end)
        )));
    }
    for (name, t) in [("start", start), ("end", end)] {
        if !is_interval_aligned(t) {
            return Err(NemedError::Validation(format!(
                "{} ({}) is not on a {}-minute dispatch interval boundary",
                name, t, DISPATCH_INTERVAL_MINUTES
            )));
        }
    }
    Ok(())
}

/// Dispatch intervals ending in `(start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl IntervalRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start >= end {
            return Err(NemedError::Validation(format!(
                "start ({}) must be before end ({})",
                format_market_time(start),
                format_market_time(end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start < t && t <= self.end
    }

    /// The same range with `intervals` extra intervals at the front.
    pub fn extend_back(&self, intervals: i64) -> Self {
        Self {
            start: self.start - dispatch_interval() * intervals as i32,
            end: self.end,
        }
    }

    /// Months holding at least one interval end of the range.
    pub fn months(&self) -> Vec<(i32, u32)> {
        months_spanned(self.start + dispatch_interval(), self.end)
    }

    /// Trading days whose intervals `(day 00:00, day+1 00:00]` overlap the range.
    pub fn trading_days(&self) -> Vec<NaiveDate> {
        days_spanned(self.start, self.end - dispatch_interval())
    }
}

/// Start of the interval ending at `end`.
pub fn interval_start(end: NaiveDateTime) -> NaiveDateTime {
    end - dispatch_interval()
}

pub fn start_of_day(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(NaiveTime::MIN)
}

pub fn start_of_hour(t: NaiveDateTime) -> NaiveDateTime {
    start_of_day(t) + Duration::hours(t.hour() as i64)
}

pub fn start_of_month(t: NaiveDateTime) -> NaiveDateTime {
    start_of_day(t) - Duration::days(t.day0() as i64)
}

pub fn start_of_next_month(t: NaiveDateTime) -> NaiveDateTime {
    start_of_month(start_of_month(t) + Duration::days(32))
}

pub fn start_of_year(t: NaiveDateTime) -> NaiveDateTime {
    start_of_day(t) - Duration::days(t.ordinal0() as i64)
}

pub fn start_of_next_year(t: NaiveDateTime) -> NaiveDateTime {
    start_of_year(start_of_year(t) + Duration::days(366))
}

/// Split `[start, end)` at calendar-month boundaries.
pub fn month_chunks(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let boundary = start_of_next_month(cursor).min(end);
        chunks.push((cursor, boundary));
        cursor = boundary;
    }
    chunks
}

/// Every (year, month) touched by the closed range `[start, end]`.
pub fn months_spanned(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let mut cursor = start_of_month(start);
    while cursor <= end {
        months.push((cursor.year(), cursor.month()));
        cursor = start_of_next_month(cursor);
    }
    months
}

/// Every calendar day touched by the closed range `[start, end]`.
pub fn days_spanned(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut cursor = start.date();
    while cursor <= end.date() {
        days.push(cursor);
        cursor += Duration::days(1);
    }
    days
}

pub fn to_millis(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}
