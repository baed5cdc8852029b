//! The time-partitioned message table.
//!
//! Messages are routed by `time` into epoch-aligned chunk files under
//! `<root>/<schema>/message/chunks`. Chunks are created on first insert and
//! only ever removed whole.
//!
//! # Example
//!
//! ```no_run
//! use streamkit::{Message, MessageStore, StoreConfig, TimeRange};
//! use time::macros::datetime;
//!
//! let store = MessageStore::open_or_create(StoreConfig::new("/var/lib/streamkit"))?;
//! store.insert(&Message::new(datetime!(2024-01-01 12:00 UTC), "app", "INFO", "started"))?;
//!
//! let day = TimeRange::new(datetime!(2024-01-01 0:00 UTC), datetime!(2024-01-02 0:00 UTC))?;
//! for message in &store.query(day)? {
//!     println!("{}", message?);
//! }
//! # Ok::<(), streamkit::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, info};
use time::OffsetDateTime;

use crate::catalog::{Catalog, KeyKind};
use crate::chunk::{Appended, Chunk, ChunkId, ChunkInfo, EncodedRecord};
use crate::interval::Interval;
use crate::message::{Message, MessageFields};
use crate::metadata::{TableMetadata, TABLE_NAME};
use crate::query::{MessageQuery, QueryResult, TopicFilter};
use crate::timestamp::{self, TimeRange};
use crate::{Error, Result};

pub const DEFAULT_SCHEMA: &str = "public";
const CHUNKS_DIR: &str = "chunks";
const ACCESS_DIR: &str = "access";

/// Where and how a store keeps its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per schema.
    pub root: PathBuf,
    /// Namespace of the `message` table.
    /// Default: `public`
    pub schema: String,
    /// Chunk width for new tables. Existing tables keep their stored width;
    /// a different explicit value is rejected.
    /// Default: unset (one day for new tables)
    pub chunk_interval: Option<Interval>,
    /// fsync every append before returning.
    /// Default: false
    pub sync_writes: bool,
    /// Age after which whole chunks are dropped by `enforce_retention`.
    /// Default: unset (keep everything)
    pub retention: Option<Interval>,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            chunk_interval: None,
            sync_writes: false,
            retention: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_chunk_interval(mut self, interval: Interval) -> Self {
        self.chunk_interval = Some(interval);
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_retention(mut self, retention: Interval) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn schema_root(&self) -> PathBuf {
        self.root.join(&self.schema)
    }

    pub fn table_root(&self) -> PathBuf {
        self.schema_root().join(TABLE_NAME)
    }

    fn validate(&self) -> Result<()> {
        let schema = &self.schema;
        let valid = !schema.is_empty()
            && schema != "."
            && schema != ".."
            && !schema.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::Config(format!("invalid schema name '{schema}'")));
        }
        Ok(())
    }
}

pub struct MessageStore {
    config: StoreConfig,
    table_root: PathBuf,
    metadata: TableMetadata,
    catalog: Arc<Catalog>,
    chunks: RwLock<BTreeMap<ChunkId, Arc<Chunk>>>,
}

impl MessageStore {
    /// Create a new, empty table.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: the table already exists or directories cannot be created
    /// - `Error::Config`: invalid schema name
    pub fn create(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let table_root = config.table_root();
        if TableMetadata::exists(&table_root) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("table already exists at {}", table_root.display()),
            )));
        }

        fs::create_dir_all(table_root.join(CHUNKS_DIR))?;
        let metadata = TableMetadata::new(
            config.schema.clone(),
            config.chunk_interval.unwrap_or_default(),
        );
        metadata.save(&table_root)?;
        info!(
            "created table {}.{} ({})",
            metadata.schema,
            metadata.table,
            table_root.display()
        );
        Self::load(config, table_root, metadata)
    }

    /// Open an existing table, recovering every chunk file.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: metadata missing or unreadable
    /// - `Error::CorruptMetadata` / `Error::UnsupportedVersion`: bad metadata
    /// - `Error::Config`: explicit chunk interval differs from the stored one
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let table_root = config.table_root();
        let metadata = TableMetadata::load(&table_root)?;
        if let Some(interval) = config.chunk_interval {
            if interval != metadata.chunk_interval {
                return Err(Error::Config(format!(
                    "table {} uses chunk interval '{}', not '{}'",
                    table_root.display(),
                    metadata.chunk_interval,
                    interval
                )));
            }
        }
        Self::load(config, table_root, metadata)
    }

    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if Self::exists(&config) {
            Self::open(config)
        } else {
            Self::create(config)
        }
    }

    pub fn exists(config: &StoreConfig) -> bool {
        TableMetadata::exists(&config.table_root())
    }

    fn load(config: StoreConfig, table_root: PathBuf, metadata: TableMetadata) -> Result<Self> {
        let catalog = Arc::new(Catalog::open(&table_root)?);
        let chunk_dir = table_root.join(CHUNKS_DIR);
        fs::create_dir_all(&chunk_dir)?;

        let mut chunks = BTreeMap::new();
        for entry in fs::read_dir(&chunk_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(ChunkId::from_file_name) else {
                debug!("ignoring {} in chunk directory", entry.path().display());
                continue;
            };
            let chunk = Chunk::open(
                &chunk_dir,
                id,
                metadata.chunk_interval,
                config.sync_writes,
            )?;
            chunks.insert(id, Arc::new(chunk));
        }
        debug!(
            "opened {} with {} chunks",
            table_root.display(),
            chunks.len()
        );

        Ok(Self {
            config,
            table_root,
            metadata,
            catalog,
            chunks: RwLock::new(chunks),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn chunk_interval(&self) -> Interval {
        self.metadata.chunk_interval
    }

    pub fn table_root(&self) -> &Path {
        &self.table_root
    }

    /// Directory holding subscriber access cursors.
    pub fn access_dir(&self) -> PathBuf {
        self.config.schema_root().join(ACCESS_DIR)
    }

    /// Id of the chunk that holds `time`.
    pub fn chunk_for(&self, time: OffsetDateTime) -> Result<ChunkId> {
        Ok(ChunkId::for_time(timestamp::to_ns(time)?, self.chunk_interval()))
    }

    /// Insert one message, creating its chunk if needed.
    ///
    /// # Errors
    ///
    /// - `Error::Validation`: malformed time or missing/invalid fields
    /// - `Error::Io`: the append failed
    pub fn insert(&self, message: &Message) -> Result<ChunkId> {
        let time_ns = message.validate()?;
        let record = self.encode(message, time_ns)?;
        let id = ChunkId::for_time(time_ns, self.chunk_interval());
        self.append_group(id, &[record])?;
        Ok(id)
    }

    /// Insert an untyped message, failing if `time` or another required field
    /// is missing.
    pub fn insert_fields(&self, fields: MessageFields) -> Result<ChunkId> {
        self.insert(&Message::try_from(fields)?)
    }

    /// Insert many messages.
    ///
    /// Every message is validated before anything is written. Messages are
    /// then grouped per chunk and each group is appended under one lock.
    /// Returns the distinct chunks written, in ascending order.
    pub fn insert_batch(&self, messages: &[Message]) -> Result<Vec<ChunkId>> {
        let interval = self.chunk_interval();
        let mut times = Vec::with_capacity(messages.len());
        for (idx, message) in messages.iter().enumerate() {
            let time_ns = message.validate().map_err(|err| match err {
                Error::Validation(msg) => Error::Validation(format!("message {idx}: {msg}")),
                other => other,
            })?;
            times.push(time_ns);
        }

        let mut groups: BTreeMap<ChunkId, Vec<EncodedRecord>> = BTreeMap::new();
        for (message, time_ns) in messages.iter().zip(times) {
            let record = self.encode(message, time_ns)?;
            groups
                .entry(ChunkId::for_time(time_ns, interval))
                .or_default()
                .push(record);
        }

        let mut written = Vec::with_capacity(groups.len());
        for (id, records) in groups {
            self.append_group(id, &records)?;
            written.push(id);
        }
        Ok(written)
    }

    /// Messages with `start <= time < end`, ordered by time.
    pub fn query(&self, range: TimeRange) -> Result<QueryResult> {
        self.execute(MessageQuery::new(range))
    }

    /// Run a query, pinning the chunks that overlap its range right now.
    pub fn execute(&self, query: MessageQuery) -> Result<QueryResult> {
        let range = query.range();
        let snapshots = {
            let chunks = self
                .chunks
                .read()
                .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
            let mut snapshots = Vec::new();
            if !range.is_empty() {
                let interval = self.chunk_interval();
                let first = ChunkId::for_time(range.start_ns(), interval);
                let last = ChunkId::for_time(range.end_ns() - 1, interval);
                for chunk in chunks.range(first..=last).map(|(_, chunk)| chunk) {
                    snapshots.push(chunk.snapshot()?);
                }
            }
            snapshots
        };
        QueryResult::new(query, snapshots, self.catalog.clone())
    }

    /// Remove every chunk lying entirely inside `range`.
    ///
    /// Partially overlapping chunks are kept. Queries already running keep
    /// reading the dropped data.
    pub fn drop_range(&self, range: TimeRange) -> Result<Vec<ChunkInfo>> {
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
        let doomed: Vec<ChunkId> = chunks
            .values()
            .map(|chunk| chunk.info())
            .filter(|info| range.covers(info.start_ns, info.end_ns))
            .map(|info| info.id)
            .collect();

        let mut dropped = Vec::with_capacity(doomed.len());
        for id in doomed {
            let Some(chunk) = chunks.get(&id).cloned() else {
                continue;
            };
            let chunk_info = chunk.info();
            chunk.drop_file()?;
            chunks.remove(&id);
            info!("dropped {chunk_info}");
            dropped.push(chunk_info);
        }
        Ok(dropped)
    }

    /// Drop every chunk that ends at or before `cutoff`.
    pub fn drop_before(&self, cutoff: OffsetDateTime) -> Result<Vec<ChunkInfo>> {
        self.drop_range(TimeRange::before(cutoff)?)
    }

    /// Apply the configured retention window relative to `now`.
    pub fn enforce_retention(&self, now: OffsetDateTime) -> Result<Vec<ChunkInfo>> {
        match self.config.retention {
            Some(retention) => {
                let cutoff = now
                    .checked_sub(retention.as_time_duration())
                    .ok_or_else(|| {
                        Error::Config("retention reaches before the epoch range".into())
                    })?;
                self.drop_before(cutoff)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Every chunk, oldest first.
    pub fn chunks(&self) -> Result<Vec<ChunkInfo>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
        Ok(chunks.values().map(|chunk| chunk.info()).collect())
    }

    /// Up to `limit` messages on `topic` strictly newer than `after`, oldest
    /// first.
    pub fn fetch(&self, topic: &str, after: OffsetDateTime, limit: usize) -> Result<Vec<Message>> {
        let query = MessageQuery::new(TimeRange::after(after)?)
            .topic(TopicFilter::exact(topic))
            .limit(limit);
        self.execute(query)?.to_vec()
    }

    /// Time of the newest message on `topic`.
    pub fn last_time(&self, topic: &str) -> Result<Option<OffsetDateTime>> {
        let Some(topic_id) = self.catalog.lookup(KeyKind::Topic, topic)? else {
            return Ok(None);
        };
        let snapshots = {
            let chunks = self
                .chunks
                .read()
                .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
            chunks
                .values()
                .rev()
                .map(|chunk| chunk.snapshot())
                .collect::<Result<Vec<_>>>()?
        };
        for snapshot in snapshots {
            let records = snapshot.read(|_, id| id == topic_id)?;
            if let Some(newest) = records.last() {
                return timestamp::from_ns(newest.time_ns).map(Some);
            }
        }
        Ok(None)
    }

    /// Every topic ever written, in first-seen order.
    pub fn topics(&self) -> Result<Vec<String>> {
        self.names(KeyKind::Topic)
    }

    /// Interned names of `kind`; the name at index `i` has id `i + 1`.
    pub fn names(&self, kind: KeyKind) -> Result<Vec<String>> {
        self.catalog.names(kind)
    }

    /// fsync every chunk file.
    pub fn sync(&self) -> Result<()> {
        let chunks: Vec<Arc<Chunk>> = {
            let chunks = self
                .chunks
                .read()
                .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
            chunks.values().cloned().collect()
        };
        for chunk in chunks {
            chunk.sync()?;
        }
        Ok(())
    }

    fn encode(&self, message: &Message, time_ns: i64) -> Result<EncodedRecord> {
        EncodedRecord::new(
            time_ns,
            self.catalog.intern(KeyKind::Topic, &message.topic)?,
            self.catalog.intern(KeyKind::Level, &message.level)?,
            self.catalog.intern(KeyKind::Host, &message.host)?,
            &message.text,
        )
    }

    fn append_group(&self, id: ChunkId, records: &[EncodedRecord]) -> Result<()> {
        loop {
            let chunk = self.chunk_for_write(id)?;
            match chunk.append(records)? {
                Appended::Written { bytes } => {
                    debug!("appended {} records ({bytes} bytes) to chunk {id}", records.len());
                    return Ok(());
                }
                Appended::Dropped => {
                    debug!("chunk {id} dropped during insert, recreating");
                }
            }
        }
    }

    fn chunk_for_write(&self, id: ChunkId) -> Result<Arc<Chunk>> {
        {
            let chunks = self
                .chunks
                .read()
                .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
            if let Some(chunk) = chunks.get(&id) {
                return Ok(chunk.clone());
            }
        }

        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| Error::Corrupt("chunk map lock poisoned"))?;
        if let Some(chunk) = chunks.get(&id) {
            return Ok(chunk.clone());
        }
        let chunk = Arc::new(Chunk::open(
            &self.table_root.join(CHUNKS_DIR),
            id,
            self.chunk_interval(),
            self.config.sync_writes,
        )?);
        let (start_ns, end_ns) = id.bounds(self.chunk_interval());
        info!(
            "created chunk {id} [{}, {})",
            timestamp::format_rfc3339(start_ns),
            timestamp::format_rfc3339(end_ns)
        );
        chunks.insert(id, chunk.clone());
        Ok(chunk)
    }
}
