// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron-like calendar intervals matched against local time.

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A five-field cron-like specification.
///
/// `None` is a wildcard and matches any value. Fields follow crontab(5)
/// conventions: minute 0–59, hour 0–23, day of month 1–31, weekday 0–6 with
/// Sunday as 0 (7 normalizes to 0), month 1–12. In manifests a wildcard is
/// written either by omitting the field or as the string `"*"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInterval {
    #[serde(default, deserialize_with = "wildcard_field")]
    pub minute: Option<u32>,
    #[serde(default, deserialize_with = "wildcard_field")]
    pub hour: Option<u32>,
    #[serde(default, deserialize_with = "wildcard_field")]
    pub day: Option<u32>,
    #[serde(default, deserialize_with = "wildcard_field")]
    pub weekday: Option<u32>,
    #[serde(default, deserialize_with = "wildcard_field")]
    pub month: Option<u32>,
}

/// Calendar field range errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("minute {0} out of range 0-59")]
    Minute(u32),

    #[error("hour {0} out of range 0-23")]
    Hour(u32),

    #[error("day {0} out of range 1-31")]
    Day(u32),

    #[error("weekday {0} out of range 0-7")]
    Weekday(u32),

    #[error("month {0} out of range 1-12")]
    Month(u32),
}

impl CalendarInterval {
    /// Validate field ranges and normalize weekday 7 (Sunday) to 0.
    pub fn validated(mut self) -> Result<Self, CalendarError> {
        if let Some(m) = self.minute {
            if m > 59 {
                return Err(CalendarError::Minute(m));
            }
        }
        if let Some(h) = self.hour {
            if h > 23 {
                return Err(CalendarError::Hour(h));
            }
        }
        if let Some(d) = self.day {
            if d == 0 || d > 31 {
                return Err(CalendarError::Day(d));
            }
        }
        if let Some(w) = self.weekday {
            if w > 7 {
                return Err(CalendarError::Weekday(w));
            }
            if w == 7 {
                self.weekday = Some(0);
            }
        }
        if let Some(m) = self.month {
            if m == 0 || m > 12 {
                return Err(CalendarError::Month(m));
            }
        }
        Ok(self)
    }

    /// Time until the next matching minute today, or `None` when the job does
    /// not run again today.
    ///
    /// The non-time fields (month, day, weekday) disqualify the whole day on
    /// mismatch. When they match, the time-of-day offset is compared against
    /// the current offset; a spec whose offset is already past is skipped for
    /// today. An offset equal to the current minute runs now (zero delay).
    pub fn next_today(&self, now: &DateTime<Local>) -> Option<Duration> {
        if let Some(month) = self.month {
            if month != now.month() {
                return None;
            }
        }
        if let Some(day) = self.day {
            if day != now.day() {
                return None;
            }
        }
        if let Some(weekday) = self.weekday {
            if weekday != now.weekday().num_days_from_sunday() {
                return None;
            }
        }

        // Offsets in minutes from 00:00 of the current day; a wildcard
        // hour/minute matches the current value.
        let cur_offset = 60 * now.hour() + now.minute();
        let job_offset =
            60 * self.hour.unwrap_or_else(|| now.hour()) + self.minute.unwrap_or_else(|| now.minute());

        if cur_offset > job_offset {
            return None;
        }

        Some(Duration::from_secs(u64::from(job_offset - cur_offset) * 60))
    }
}

/// Accept an integer, the string `"*"`, or an absent field.
fn wildcard_field<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Value(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Value(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s == "*" => Ok(None),
        Some(Raw::Text(s)) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected integer or \"*\", got \"{s}\""))),
    }
}

#[cfg(test)]
#[path = "calendar_tests.rs"]
mod tests;
