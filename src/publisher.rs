//! Batched background publishing.
//!
//! `write` stamps a message and hands it to a bounded queue; a worker thread
//! commits queued messages to the store in batches.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::message::{local_hostname, Message};
use crate::store::MessageStore;
use crate::timestamp;
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Topic used when `write` is not given one.
    pub topic: Option<String>,
    /// Level used when `write` is not given one.
    pub level: Option<String>,
    /// Messages committed per insert.
    /// Default: 10
    pub batch_size: usize,
    /// How long the worker waits for each message before committing a
    /// partial batch.
    /// Default: 5 s
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: None,
            level: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PublisherConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }
}

/// Totals reported when a publisher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub failed_batches: u64,
    pub failed_messages: u64,
}

/// Writes messages to the store from a background thread.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use streamkit::{MessageStore, Publisher, PublisherConfig, StoreConfig};
///
/// let store = Arc::new(MessageStore::open_or_create(StoreConfig::new("/var/lib/streamkit"))?);
/// let publisher = Publisher::new(store, PublisherConfig::default().with_topic("app"))?;
/// publisher.write_to("hello, world!", "INFO", "app")?;
/// let stats = publisher.stop()?;
/// assert_eq!(stats.published, 1);
/// # Ok::<(), streamkit::Error>(())
/// ```
pub struct Publisher {
    sender: Option<SyncSender<Message>>,
    worker: Option<JoinHandle<PublisherStats>>,
    topic: Option<String>,
    level: Option<String>,
    clock: Arc<dyn Clock>,
    last_ns: AtomicI64,
}

impl Publisher {
    pub fn new(store: Arc<MessageStore>, config: PublisherConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<MessageStore>,
        config: PublisherConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::Config("publisher batch size must be positive".into()));
        }
        let (sender, receiver) = mpsc::sync_channel(2 * config.batch_size);
        let batch_size = config.batch_size;
        let timeout = config.timeout;
        let worker = thread::Builder::new()
            .name("streamkit-publisher".into())
            .spawn(move || run_worker(store, receiver, batch_size, timeout))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            topic: config.topic,
            level: config.level,
            clock,
            last_ns: AtomicI64::new(i64::MIN),
        })
    }

    /// Publish `text` under the default topic and level.
    pub fn write(&self, text: impl Into<String>) -> Result<()> {
        self.publish(text.into(), None, None)
    }

    /// Publish `text` under an explicit level and topic.
    pub fn write_to(&self, text: impl Into<String>, level: &str, topic: &str) -> Result<()> {
        self.publish(text.into(), Some(level), Some(topic))
    }

    /// Publish with optional overrides of the default level and topic.
    ///
    /// # Errors
    ///
    /// - `Error::Validation`: no topic or level available, or invalid fields
    /// - `Error::Closed`: the publisher has stopped
    pub fn publish(&self, text: String, level: Option<&str>, topic: Option<&str>) -> Result<()> {
        let topic = topic
            .or(self.topic.as_deref())
            .ok_or_else(|| Error::validation("message.topic is required"))?;
        let level = level
            .or(self.level.as_deref())
            .ok_or_else(|| Error::validation("message.level is required"))?;
        let sender = self.sender.as_ref().ok_or(Error::Closed)?;

        let message = Message {
            time: timestamp::from_ns(self.next_time_ns())?,
            topic: topic.to_string(),
            level: level.to_string(),
            host: local_hostname().to_string(),
            text,
        };
        message.validate()?;
        sender.send(message).map_err(|_| Error::Closed)
    }

    /// Drain the queue, stop the worker and report what was written.
    pub fn stop(mut self) -> Result<PublisherStats> {
        self.shutdown()
    }

    /// Strictly increasing per publisher, even if the clock stalls or steps
    /// backwards.
    fn next_time_ns(&self) -> i64 {
        let now = self.clock.now_ns();
        let mut last = self.last_ns.load(Ordering::Acquire);
        loop {
            let next = now.max(last.saturating_add(1));
            match self
                .last_ns
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    fn shutdown(&mut self) -> Result<PublisherStats> {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::Corrupt("publisher thread panicked")),
            None => Ok(PublisherStats::default()),
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.shutdown() {
                error!("publisher shutdown failed: {err}");
            }
        }
    }
}

fn run_worker(
    store: Arc<MessageStore>,
    receiver: mpsc::Receiver<Message>,
    batch_size: usize,
    timeout: Duration,
) -> PublisherStats {
    debug!("starting publisher thread");
    let mut stats = PublisherStats::default();
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        let mut disconnected = false;
        while batch.len() < batch_size {
            match receiver.recv_timeout(timeout) {
                Ok(message) => batch.push(message),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if !batch.is_empty() {
            let count = batch.len() as u64;
            match store.insert_batch(&batch) {
                Ok(_) => {
                    stats.published += count;
                    info!("added {count} messages");
                }
                Err(err) => {
                    stats.failed_batches += 1;
                    stats.failed_messages += count;
                    error!("failed to publish {count} messages: {err}");
                }
            }
            batch.clear();
        }

        if disconnected {
            break;
        }
    }
    debug!("stopping publisher thread");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::StoreConfig;
    use crate::timestamp::TimeRange;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<MessageStore> {
        Arc::new(MessageStore::open_or_create(StoreConfig::new(dir.path())).unwrap())
    }

    #[test]
    fn stop_drains_queue() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let config = PublisherConfig {
            batch_size: 4,
            timeout: Duration::from_millis(20),
            ..PublisherConfig::default()
        }
        .with_topic("app")
        .with_level("INFO");
        let publisher = Publisher::new(store.clone(), config).unwrap();
        for i in 0..10 {
            publisher.write(format!("line {i}")).unwrap();
        }
        let stats = publisher.stop().unwrap();
        assert_eq!(stats.published, 10);
        assert_eq!(stats.failed_batches, 0);

        let messages = store.query(TimeRange::all()).unwrap().to_vec().unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.text.clone()).collect();
        let expected: Vec<_> = (0..10).map(|i| format!("line {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn times_strictly_increase_with_frozen_clock() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let clock = Arc::new(ManualClock::new(1_700_000_000_000_000_000));
        let config = PublisherConfig::default().with_topic("app").with_level("INFO");
        let publisher = Publisher::with_clock(store.clone(), config, clock.clone()).unwrap();
        for _ in 0..5 {
            publisher.write("same instant").unwrap();
        }
        clock.set(1_600_000_000_000_000_000);
        publisher.write("clock stepped back").unwrap();
        publisher.stop().unwrap();

        let times: Vec<_> = store
            .query(TimeRange::all())
            .unwrap()
            .iter()
            .map(|m| m.unwrap().time)
            .collect();
        assert_eq!(times.len(), 6);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn missing_topic_or_level_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let publisher = Publisher::new(store(&dir), PublisherConfig::default()).unwrap();
        assert!(matches!(publisher.write("x"), Err(Error::Validation(_))));
        assert!(matches!(
            publisher.publish("x".into(), Some("INFO"), None),
            Err(Error::Validation(_))
        ));
        assert!(publisher.write_to("x", "INFO", "app").is_ok());
        assert_eq!(publisher.stop().unwrap().published, 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = PublisherConfig {
            batch_size: 0,
            ..PublisherConfig::default()
        };
        assert!(matches!(
            Publisher::new(store(&dir), config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn drop_flushes_pending_messages() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        {
            let config = PublisherConfig::default().with_topic("app").with_level("WARN");
            let publisher = Publisher::new(store.clone(), config).unwrap();
            publisher.write("bye").unwrap();
        }
        assert_eq!(store.query(TimeRange::all()).unwrap().count().unwrap(), 1);
    }
}
