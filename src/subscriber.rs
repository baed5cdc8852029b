//! Polling subscriptions over topic trees.
//!
//! A manager thread expands each requested root topic into the concrete
//! topics below it and starts one polling worker per topic. Workers resume
//! from the subscriber's access cursor and push new messages into a bounded
//! channel that [`Subscriber::next_message`] reads from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::access::AccessCursors;
use crate::message::{topic_in_tree, validate_topic, Message};
use crate::store::MessageStore;
use crate::wait::{sleep_until, WAIT_SLICE};
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Most messages fetched per topic per poll.
    /// Default: 10
    pub batch_size: usize,
    /// Interval between polls of each topic.
    /// Default: 1 s
    pub poll: Duration,
    /// How long `next_message` waits by default. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll: DEFAULT_POLL,
            timeout: None,
        }
    }
}

/// Receives messages on one or more topic trees.
///
/// Iterating yields messages until the configured timeout passes without
/// one arriving.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use streamkit::{MessageStore, StoreConfig, Subscriber, SubscriberConfig};
///
/// let store = Arc::new(MessageStore::open_or_create(StoreConfig::new("/var/lib/streamkit"))?);
/// let subscriber = Subscriber::new(store, "audit", &["app"], SubscriberConfig::default())?;
/// for message in subscriber {
///     println!("{}: {}", message.topic, message.text);
/// }
/// # Ok::<(), streamkit::Error>(())
/// ```
pub struct Subscriber {
    name: String,
    receiver: Receiver<Message>,
    shutdown: Arc<AtomicBool>,
    manager: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
}

impl Subscriber {
    pub fn new(
        store: Arc<MessageStore>,
        name: &str,
        topics: &[&str],
        config: SubscriberConfig,
    ) -> Result<Self> {
        let access = Arc::new(AccessCursors::new(store.clone()));
        Self::with_access(store, access, name, topics, config)
    }

    pub fn with_access(
        store: Arc<MessageStore>,
        access: Arc<AccessCursors>,
        name: &str,
        topics: &[&str],
        config: SubscriberConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::Config("subscriber batch size must be positive".into()));
        }
        if topics.is_empty() {
            return Err(Error::validation("subscriber needs at least one topic"));
        }
        for topic in topics {
            validate_topic(topic)?;
        }
        // Fail fast on a bad name rather than inside every worker.
        access.cursors(name)?;

        let (sender, receiver) = mpsc::sync_channel(topics.len() * config.batch_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let manager = Manager {
            store,
            access,
            name: name.to_string(),
            roots: topics.iter().map(|t| t.to_string()).collect(),
            sender,
            shutdown: shutdown.clone(),
            batch_size: config.batch_size,
            poll: config.poll,
        };
        let handle = thread::Builder::new()
            .name(format!("streamkit-sub-{name}"))
            .spawn(move || manager.run())?;

        Ok(Self {
            name: name.to_string(),
            receiver,
            shutdown,
            manager: Some(handle),
            timeout: config.timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next message, waiting at most `timeout` (or the configured default).
    ///
    /// Returns `None` on timeout or once the subscriber has stopped.
    pub fn next_message(&self, timeout: Option<Duration>) -> Option<Message> {
        let result = match timeout.or(self.timeout) {
            Some(timeout) => self.receiver.recv_timeout(timeout),
            None => self
                .receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match result {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => {
                info!("timeout reached ({})", self.name);
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Signal every worker and wait for them to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        match self.manager.take() {
            Some(manager) => manager
                .join()
                .map_err(|_| Error::Corrupt("subscriber thread panicked")),
            None => Ok(()),
        }
    }
}

impl Iterator for Subscriber {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.next_message(None)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if self.manager.is_some() {
            if let Err(err) = self.shutdown() {
                error!("subscriber {} shutdown failed: {err}", self.name);
            }
        }
    }
}

struct Manager {
    store: Arc<MessageStore>,
    access: Arc<AccessCursors>,
    name: String,
    roots: Vec<String>,
    sender: SyncSender<Message>,
    shutdown: Arc<AtomicBool>,
    batch_size: usize,
    poll: Duration,
}

impl Manager {
    fn run(self) {
        debug!("starting manager thread ({})", self.name);
        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::new();
        loop {
            let started = Instant::now();
            match self.discover() {
                Ok(topics) => {
                    for topic in topics {
                        if workers.contains_key(&topic) {
                            continue;
                        }
                        match self.spawn_worker(&topic) {
                            Ok(handle) => {
                                workers.insert(topic, handle);
                            }
                            Err(err) => error!("cannot start worker {}:{topic}: {err}", self.name),
                        }
                    }
                }
                Err(err) => warn!("topic discovery failed ({}): {err}", self.name),
            }
            if sleep_until(started + self.poll, &self.shutdown) {
                break;
            }
        }

        for (topic, worker) in workers {
            if worker.join().is_err() {
                error!("worker {}:{topic} panicked", self.name);
            }
        }
        debug!("stopped manager thread ({})", self.name);
    }

    /// The roots themselves plus every known topic nested below them.
    fn discover(&self) -> Result<Vec<String>> {
        let known = self.store.topics()?;
        let mut topics: Vec<String> = self.roots.clone();
        for topic in known {
            if self.roots.iter().any(|root| topic_in_tree(root, &topic)) && !topics.contains(&topic)
            {
                topics.push(topic);
            }
        }
        Ok(topics)
    }

    fn spawn_worker(&self, topic: &str) -> Result<JoinHandle<()>> {
        let worker = Worker {
            store: self.store.clone(),
            access: self.access.clone(),
            name: self.name.clone(),
            topic: topic.to_string(),
            sender: self.sender.clone(),
            shutdown: self.shutdown.clone(),
            batch_size: self.batch_size,
            poll: self.poll,
        };
        Ok(thread::Builder::new()
            .name(format!("streamkit-sub-{}-{topic}", self.name))
            .spawn(move || worker.run())?)
    }
}

struct Worker {
    store: Arc<MessageStore>,
    access: Arc<AccessCursors>,
    name: String,
    topic: String,
    sender: SyncSender<Message>,
    shutdown: Arc<AtomicBool>,
    batch_size: usize,
    poll: Duration,
}

impl Worker {
    fn run(self) {
        let mut cursor = match self.access.latest(&self.name, &self.topic) {
            Ok(time) => time,
            Err(err) => {
                error!("cannot read cursor {}:{}: {err}", self.name, self.topic);
                return;
            }
        };
        debug!("starting topic thread ({}:{}, {cursor})", self.name, self.topic);

        loop {
            let started = Instant::now();
            match self.store.fetch(&self.topic, cursor, self.batch_size) {
                Ok(messages) => {
                    if !messages.is_empty() {
                        debug!(
                            "received {} messages ({}:{})",
                            messages.len(),
                            self.name,
                            self.topic
                        );
                    }
                    let mut last = cursor;
                    for message in messages {
                        let time = message.time;
                        if !self.forward(message) {
                            break;
                        }
                        last = time;
                    }
                    if last > cursor {
                        match self.access.update(&self.name, &self.topic, last) {
                            Ok(()) => cursor = last,
                            Err(err) => {
                                error!("cannot update cursor {}:{}: {err}", self.name, self.topic)
                            }
                        }
                    }
                }
                Err(err) => warn!("fetch failed ({}:{}): {err}", self.name, self.topic),
            }
            if sleep_until(started + self.poll, &self.shutdown) {
                break;
            }
        }
        debug!("stopped topic thread ({}:{})", self.name, self.topic);
    }

    /// Hand `message` to the consumer, giving up on shutdown.
    fn forward(&self, mut message: Message) -> bool {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
            match self.sender.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    message = returned;
                    thread::sleep(WAIT_SLICE);
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}
