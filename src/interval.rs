//! Fixed-width durations such as chunk widths and retention windows.
//!
//! Parsed from strings like `1 day`, `6h`, `90 minutes` or the SQL form
//! `interval '1 day'`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timestamp::NANOS_PER_SECOND;
use crate::{Error, Result};

const UNITS: &[(i64, &str, &[&str])] = &[
    (
        7 * 24 * 3600 * NANOS_PER_SECOND,
        "week",
        &["w", "wk", "wks", "week", "weeks"],
    ),
    (
        24 * 3600 * NANOS_PER_SECOND,
        "day",
        &["d", "day", "days"],
    ),
    (
        3600 * NANOS_PER_SECOND,
        "hour",
        &["h", "hr", "hrs", "hour", "hours"],
    ),
    (
        60 * NANOS_PER_SECOND,
        "minute",
        &["m", "min", "mins", "minute", "minutes"],
    ),
    (
        NANOS_PER_SECOND,
        "second",
        &["s", "sec", "secs", "second", "seconds"],
    ),
    (
        1_000_000,
        "millisecond",
        &["ms", "msec", "millisecond", "milliseconds"],
    ),
    (
        1_000,
        "microsecond",
        &["us", "usec", "microsecond", "microseconds"],
    ),
    (1, "nanosecond", &["ns", "nanosecond", "nanoseconds"]),
];

/// A strictly positive duration with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    nanos: i64,
}

impl Interval {
    pub const DAY: Interval = Interval {
        nanos: 24 * 3600 * NANOS_PER_SECOND,
    };

    pub fn from_nanos(nanos: i64) -> Result<Self> {
        if nanos <= 0 {
            return Err(Error::validation(format!(
                "interval must be positive, got {nanos}ns"
            )));
        }
        Ok(Self { nanos })
    }

    pub fn from_duration(duration: Duration) -> Result<Self> {
        let nanos = i64::try_from(duration.as_nanos())
            .map_err(|_| Error::validation("interval too large"))?;
        Self::from_nanos(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos as u64)
    }

    pub fn as_time_duration(&self) -> time::Duration {
        time::Duration::nanoseconds(self.nanos)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::DAY
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let malformed = || Error::validation(format!("malformed interval '{input}'"));

        let mut text = input.trim();
        if let Some(rest) = strip_prefix_ignore_case(text, "interval") {
            text = rest.trim();
            text = text
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
                .ok_or_else(malformed)?
                .trim();
        }

        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(malformed)?;
        let (count, unit) = text.split_at(split);
        let count: i64 = count.parse().map_err(|_| malformed())?;
        let unit = unit.trim().to_ascii_lowercase();

        let (scale, _, _) = UNITS
            .iter()
            .find(|(_, _, aliases)| aliases.contains(&unit.as_str()))
            .ok_or_else(malformed)?;
        let nanos = count.checked_mul(*scale).ok_or_else(malformed)?;
        Self::from_nanos(nanos)
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scale, unit, _) = UNITS
            .iter()
            .find(|(scale, _, _)| self.nanos % scale == 0)
            .unwrap_or(&UNITS[UNITS.len() - 1]);
        let count = self.nanos / scale;
        if count == 1 {
            write!(f, "1 {unit}")
        } else {
            write!(f, "{count} {unit}s")
        }
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}
