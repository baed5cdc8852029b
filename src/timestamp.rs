//! Timestamp conversions and half-open time ranges.
//!
//! The store keeps every `time` value as signed nanoseconds since the Unix
//! epoch. Values outside that range are rejected as malformed.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::{Error, Result};

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a timestamp to nanoseconds since the Unix epoch.
///
/// # Errors
///
/// - `Error::Validation`: the timestamp does not fit in signed 64-bit nanoseconds
pub fn to_ns(time: OffsetDateTime) -> Result<i64> {
    i64::try_from(time.unix_timestamp_nanos())
        .map_err(|_| Error::validation(format!("time {time} is outside the storable range")))
}

/// Like [`to_ns`], but also rejects `i64::MAX`.
///
/// Ranges are half-open, so a message at `i64::MAX` ns could never be matched
/// by any query. Stored times are therefore limited to `[i64::MIN, i64::MAX)`.
pub fn to_storable_ns(time: OffsetDateTime) -> Result<i64> {
    match to_ns(time)? {
        i64::MAX => Err(Error::validation(format!(
            "time {time} is outside the storable range"
        ))),
        ns => Ok(ns),
    }
}

/// Convert nanoseconds since the Unix epoch back to a UTC timestamp.
pub fn from_ns(ns: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ns))
        .map_err(|_| Error::Corrupt("timestamp out of range"))
}

/// Parse a user supplied timestamp.
///
/// Accepts RFC 3339 (`2024-01-01T00:00:00Z`), a naive date-time interpreted as
/// UTC (`2024-01-01T00:00:00`, `2024-01-01 00:00:00.250`) or a bare date
/// (`2024-01-01`, midnight UTC).
pub fn parse_time(input: &str) -> Result<OffsetDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::validation("time is empty"));
    }
    if let Ok(time) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(time);
    }

    let normalized = input.replacen(' ', "T", 1);
    let with_subsec =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let without_subsec = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(time) = PrimitiveDateTime::parse(&normalized, with_subsec) {
        return Ok(time.assume_utc());
    }
    if let Ok(time) = PrimitiveDateTime::parse(&normalized, without_subsec) {
        return Ok(time.assume_utc());
    }
    if let Ok(date) = Date::parse(input, format_description!("[year]-[month]-[day]")) {
        return Ok(date.midnight().assume_utc());
    }

    Err(Error::validation(format!("malformed time '{input}'")))
}

/// Format as `YYYY-mm-dd HH:MM:SS.mmm`.
pub fn format_millis(time: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    time.format(format)
        .unwrap_or_else(|_| time.unix_timestamp().to_string())
}

/// Format as RFC 3339, falling back to raw nanoseconds.
pub fn format_rfc3339(ns: i64) -> String {
    from_ns(ns)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{ns}ns"))
}

/// Half-open time interval `[start, end)` in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start_ns: i64,
    end_ns: i64,
}

impl TimeRange {
    /// Range covering `[start, end)`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRange`: `start` is after `end`
    /// - `Error::Validation`: either bound is outside the storable range
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self> {
        Self::from_ns(to_ns(start)?, to_ns(end)?)
    }

    pub fn from_ns(start_ns: i64, end_ns: i64) -> Result<Self> {
        if start_ns > end_ns {
            return Err(Error::InvalidRange(format!(
                "start {} is after end {}",
                format_rfc3339(start_ns),
                format_rfc3339(end_ns)
            )));
        }
        Ok(Self { start_ns, end_ns })
    }

    /// Every storable time.
    pub fn all() -> Self {
        Self {
            start_ns: i64::MIN,
            end_ns: i64::MAX,
        }
    }

    /// Times strictly after `time`.
    pub fn after(time: OffsetDateTime) -> Result<Self> {
        let ns = to_ns(time)?;
        Ok(Self {
            start_ns: ns.saturating_add(1),
            end_ns: i64::MAX,
        })
    }

    /// Times strictly before `time`.
    pub fn before(time: OffsetDateTime) -> Result<Self> {
        Ok(Self {
            start_ns: i64::MIN,
            end_ns: to_ns(time)?,
        })
    }

    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> i64 {
        self.end_ns
    }

    pub fn is_empty(&self) -> bool {
        self.start_ns >= self.end_ns
    }

    pub fn contains(&self, ns: i64) -> bool {
        ns >= self.start_ns && ns < self.end_ns
    }

    /// True if `[start_ns, end_ns)` shares at least one instant with this range.
    pub fn overlaps(&self, start_ns: i64, end_ns: i64) -> bool {
        start_ns < self.end_ns && self.start_ns < end_ns
    }

    /// True if `[start_ns, end_ns)` lies entirely inside this range.
    pub fn covers(&self, start_ns: i64, end_ns: i64) -> bool {
        start_ns >= self.start_ns && end_ns <= self.end_ns
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |ns: i64| match ns {
            i64::MIN => "-inf".to_string(),
            i64::MAX => "+inf".to_string(),
            ns => format_rfc3339(ns),
        };
        write!(f, "[{}, {})", bound(self.start_ns), bound(self.end_ns))
    }
}
