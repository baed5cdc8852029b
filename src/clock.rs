use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// A source of message timestamps.
///
/// Publishers and access cursors read the current time through this trait so
/// tests can pin it.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in nanoseconds since the UNIX epoch.
    fn now_ns(&self) -> i64;
}

/// Wall-clock time from `time::OffsetDateTime::now_utc`.
///
/// Susceptible to NTP adjustments; the publisher compensates for backward
/// jumps when assigning message times.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        i64::try_from(nanos).unwrap_or(i64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(now_ns),
        }
    }

    pub fn set(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::Release);
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::Acquire)
    }
}
