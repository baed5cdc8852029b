//! Per-subscriber read positions.
//!
//! Each cursor is an 8-byte little-endian nanosecond timestamp at
//! `<schema>/access/<subscriber>/<topic>.meta`: the time of the newest message
//! the subscriber has handled on that topic.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use time::OffsetDateTime;

use crate::clock::{Clock, SystemClock};
use crate::message::validate_topic;
use crate::metadata::write_atomic;
use crate::store::MessageStore;
use crate::timestamp::{self, format_rfc3339};
use crate::{Error, Result};

const CURSOR_SUFFIX: &str = "meta";

pub struct AccessCursors {
    dir: PathBuf,
    store: Arc<MessageStore>,
    clock: Arc<dyn Clock>,
}

impl AccessCursors {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: store.access_dir(),
            store,
            clock,
        }
    }

    /// The stored cursor, if any.
    pub fn get(&self, subscriber: &str, topic: &str) -> Result<Option<OffsetDateTime>> {
        let path = self.cursor_path(subscriber, topic)?;
        match load_cursor(&path)? {
            Some(ns) => timestamp::from_ns(ns).map(Some),
            None => Ok(None),
        }
    }

    /// The stored cursor, initialising it on first access.
    ///
    /// A new cursor starts at the newest message already on the topic, or at
    /// the current time if the topic is empty, so a new subscriber only sees
    /// messages published after it first connects.
    pub fn latest(&self, subscriber: &str, topic: &str) -> Result<OffsetDateTime> {
        if let Some(time) = self.get(subscriber, topic)? {
            return Ok(time);
        }
        let time = match self.store.last_time(topic)? {
            Some(time) => time,
            None => timestamp::from_ns(self.clock.now_ns())?,
        };
        self.update(subscriber, topic, time)?;
        debug!("initialised cursor {subscriber}:{topic} at {time}");
        Ok(time)
    }

    /// Persist `time` as the cursor for `subscriber` on `topic`.
    pub fn update(&self, subscriber: &str, topic: &str, time: OffsetDateTime) -> Result<()> {
        let path = self.cursor_path(subscriber, topic)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ns = timestamp::to_ns(time)?;
        write_atomic(&path, &ns.to_le_bytes())?;
        debug!("cursor {subscriber}:{topic} -> {}", format_rfc3339(ns));
        Ok(())
    }

    /// Every subscriber with at least one cursor.
    pub fn subscribers(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// All cursors of `subscriber`, sorted by topic.
    pub fn cursors(&self, subscriber: &str) -> Result<Vec<(String, OffsetDateTime)>> {
        validate_subscriber(subscriber)?;
        let dir = self.dir.join(subscriber);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut cursors = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(topic) = name
                .to_str()
                .and_then(|name| name.strip_suffix(CURSOR_SUFFIX))
                .and_then(|stem| stem.strip_suffix('.'))
            else {
                continue;
            };
            if let Some(ns) = load_cursor(&entry.path())? {
                cursors.push((topic.to_string(), timestamp::from_ns(ns)?));
            }
        }
        cursors.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(cursors)
    }

    fn cursor_path(&self, subscriber: &str, topic: &str) -> Result<PathBuf> {
        validate_subscriber(subscriber)?;
        validate_topic(topic)?;
        Ok(self
            .dir
            .join(subscriber)
            .join(format!("{topic}.{CURSOR_SUFFIX}")))
    }
}

fn validate_subscriber(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::validation(format!("invalid subscriber name '{name}'")));
    }
    Ok(())
}

fn load_cursor(path: &Path) -> Result<Option<i64>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)
        .map_err(|_| Error::Corrupt("access cursor shorter than 8 bytes"))?;
    Ok(Some(i64::from_le_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::Message;
    use crate::store::StoreConfig;
    use tempfile::TempDir;
    use time::macros::datetime;

    fn cursors(dir: &TempDir, now: OffsetDateTime) -> (Arc<MessageStore>, AccessCursors) {
        let store = Arc::new(MessageStore::open_or_create(StoreConfig::new(dir.path())).unwrap());
        let clock = Arc::new(ManualClock::new(timestamp::to_ns(now).unwrap()));
        let cursors = AccessCursors::with_clock(store.clone(), clock);
        (store, cursors)
    }

    #[test]
    fn latest_on_empty_topic_uses_clock() {
        let dir = TempDir::new().unwrap();
        let now = datetime!(2024-06-01 00:00:00 UTC);
        let (_, cursors) = cursors(&dir, now);
        assert_eq!(cursors.latest("sub", "app").unwrap(), now);
        assert!(dir.path().join("public/access/sub/app.meta").exists());
        assert_eq!(cursors.get("sub", "app").unwrap(), Some(now));
    }

    #[test]
    fn latest_starts_at_newest_message() {
        let dir = TempDir::new().unwrap();
        let (store, cursors) = cursors(&dir, datetime!(2024-06-01 00:00:00 UTC));
        for t in [datetime!(2024-01-01 00:00 UTC), datetime!(2024-01-02 00:00 UTC)] {
            store.insert(&Message::new(t, "app", "INFO", "x")).unwrap();
        }
        assert_eq!(
            cursors.latest("sub", "app").unwrap(),
            datetime!(2024-01-02 00:00 UTC)
        );
    }

    #[test]
    fn update_overrides_and_lists() {
        let dir = TempDir::new().unwrap();
        let (_, cursors) = cursors(&dir, datetime!(2024-06-01 00:00:00 UTC));
        let t = datetime!(2024-03-03 03:03:03.5 UTC);
        cursors.update("sub", "app.db", t).unwrap();
        cursors.update("sub", "app", t).unwrap();
        cursors.update("other", "app", t).unwrap();

        assert_eq!(cursors.latest("sub", "app.db").unwrap(), t);
        assert_eq!(cursors.subscribers().unwrap(), ["other", "sub"]);
        let listed = cursors.cursors("sub").unwrap();
        assert_eq!(
            listed,
            vec![("app".to_string(), t), ("app.db".to_string(), t)]
        );
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (_, cursors) = cursors(&dir, datetime!(2024-06-01 00:00:00 UTC));
        assert!(cursors.latest("../x", "app").is_err());
        assert!(cursors.latest("sub", "a/b").is_err());
    }

    #[test]
    fn short_cursor_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let (_, cursors) = cursors(&dir, datetime!(2024-06-01 00:00:00 UTC));
        let path = dir.path().join("public/access/sub");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("app.meta"), [1u8, 2, 3]).unwrap();
        assert!(matches!(cursors.get("sub", "app"), Err(Error::Corrupt(_))));
    }
}
