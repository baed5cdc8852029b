//! A `log` backend that publishes records as messages.
//!
//! The record target becomes the topic, with `::` path separators mapped to
//! the `.` topic separator so `myapp::db` lands under the `myapp` tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::message::TOPIC_SEP;
use crate::publisher::{Publisher, PublisherStats};
use crate::{Error, Result};

/// Records from this crate are never published, so the publisher's own
/// logging cannot feed back into itself.
const OWN_TARGET: &str = "streamkit";

/// Level names as stored in the `level` field.
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

pub struct PublisherLogger {
    publisher: RwLock<Option<Publisher>>,
    level: LevelFilter,
    dropped: AtomicU64,
}

impl PublisherLogger {
    pub fn new(publisher: Publisher, level: LevelFilter) -> Self {
        Self {
            publisher: RwLock::new(Some(publisher)),
            level,
            dropped: AtomicU64::new(0),
        }
    }

    /// Records that could not be published: rejected by the publisher, or
    /// logged after [`PublisherLogger::shutdown`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Install as the global logger.
    ///
    /// Keep the returned reference to call [`PublisherLogger::shutdown`]
    /// before exiting; messages still queued at exit are otherwise lost.
    pub fn install(self) -> Result<&'static PublisherLogger> {
        let level = self.level;
        let logger: &'static PublisherLogger = Box::leak(Box::new(self));
        log::set_logger(logger)
            .map_err(|_| Error::Config("a global logger is already installed".into()))?;
        log::set_max_level(level);
        Ok(logger)
    }

    /// Stop the publisher, flushing queued records. Later records are dropped.
    pub fn shutdown(&self) -> Result<PublisherStats> {
        let publisher = self
            .publisher
            .write()
            .map_err(|_| Error::Corrupt("logger lock poisoned"))?
            .take();
        match publisher {
            Some(publisher) => publisher.stop(),
            None => Ok(PublisherStats::default()),
        }
    }
}

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn topic_for(target: &str) -> String {
    target.replace("::", &TOPIC_SEP.to_string())
}

impl Log for PublisherLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let published = match self.publisher.read() {
            Ok(guard) => guard.as_ref().is_some_and(|publisher| {
                publisher
                    .publish(
                        record.args().to_string(),
                        Some(level_name(record.level())),
                        Some(&topic_for(record.target())),
                    )
                    .is_ok()
            }),
            Err(_) => false,
        };
        // Reporting through `log` would recurse into this logger.
        if !published {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}
