//! Chunk files: one append-only file per fixed-width slice of time.
//!
//! A chunk covers `[index * interval, (index + 1) * interval)`, aligned to the
//! Unix epoch. Records are framed by [`RecordHeader`] and carry interned
//! topic/level/host ids plus the message text.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, warn};

use crate::header::{RecordHeader, HEADER_SIZE, MAX_PAYLOAD_LEN};
use crate::interval::Interval;
use crate::mmap::MmapFile;
use crate::timestamp::{format_rfc3339, TimeRange};
use crate::{Error, Result};

pub const CHUNK_EXTENSION: &str = "chunk";

const PAYLOAD_IDS_LEN: usize = 12;

/// Epoch-aligned chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub i64);

impl ChunkId {
    /// The chunk that holds `time_ns`.
    pub fn for_time(time_ns: i64, interval: Interval) -> Self {
        Self(time_ns.div_euclid(interval.as_nanos()))
    }

    /// Bounds of this chunk, saturated to the storable range.
    pub fn bounds(&self, interval: Interval) -> (i64, i64) {
        let width = i128::from(interval.as_nanos());
        let start = i128::from(self.0) * width;
        let clamp = |v: i128| v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        (clamp(start), clamp(start + width))
    }

    pub fn file_name(&self) -> String {
        format!("{}.{CHUNK_EXTENSION}", self.0)
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(CHUNK_EXTENSION)
            .and_then(|stem| stem.strip_suffix('.'))
            .and_then(|index| index.parse().ok())
            .map(Self)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of an existing chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub start_ns: i64,
    pub end_ns: i64,
    pub messages: u64,
    pub bytes: u64,
    pub path: PathBuf,
}

impl ChunkInfo {
    pub fn range(&self) -> TimeRange {
        TimeRange::from_ns(self.start_ns, self.end_ns).unwrap_or_else(|_| TimeRange::all())
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} [{}, {}) messages={} bytes={}",
            self.id,
            format_rfc3339(self.start_ns),
            format_rfc3339(self.end_ns),
            self.messages,
            self.bytes
        )
    }
}

/// A record ready to append: routing time plus encoded payload.
#[derive(Debug, Clone)]
pub(crate) struct EncodedRecord {
    pub time_ns: i64,
    pub payload: Vec<u8>,
}

impl EncodedRecord {
    pub fn new(
        time_ns: i64,
        topic_id: u32,
        level_id: u32,
        host_id: u32,
        text: &str,
    ) -> Result<Self> {
        let len = PAYLOAD_IDS_LEN + text.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge);
        }
        let mut payload = Vec::with_capacity(len);
        payload.extend_from_slice(&topic_id.to_le_bytes());
        payload.extend_from_slice(&level_id.to_le_bytes());
        payload.extend_from_slice(&host_id.to_le_bytes());
        payload.extend_from_slice(text.as_bytes());
        Ok(Self { time_ns, payload })
    }
}

/// A record read back from a chunk, with names still interned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredRecord {
    pub time_ns: i64,
    pub seq: u64,
    pub topic_id: u32,
    pub level_id: u32,
    pub host_id: u32,
    pub text: String,
}

pub(crate) enum Appended {
    Written { bytes: u64 },
    /// The chunk was dropped while the caller waited for its lock.
    Dropped,
}

struct ChunkWriter {
    file: File,
    len: u64,
    next_seq: u64,
    dropped: bool,
}

pub(crate) struct Chunk {
    id: ChunkId,
    start_ns: i64,
    end_ns: i64,
    path: PathBuf,
    sync_writes: bool,
    writer: Mutex<ChunkWriter>,
    committed: AtomicU64,
    messages: AtomicU64,
}

impl Chunk {
    /// Open the chunk file under `dir`, creating it if absent.
    ///
    /// A torn trailing record left by a crash mid-append is truncated away.
    pub fn open(dir: &Path, id: ChunkId, interval: Interval, sync_writes: bool) -> Result<Self> {
        let path = dir.join(id.file_name());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        let scan = {
            let view = MmapFile::map(&file, file_len as usize)?;
            scan_records(view.as_slice())
        };
        if scan.valid_len < file_len {
            warn!(
                "chunk {}: truncating torn tail ({} of {} bytes valid)",
                path.display(),
                scan.valid_len,
                file_len
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        let (start_ns, end_ns) = id.bounds(interval);
        debug!(
            "opened chunk {} with {} messages ({} bytes)",
            id, scan.messages, scan.valid_len
        );
        Ok(Self {
            id,
            start_ns,
            end_ns,
            path,
            sync_writes,
            writer: Mutex::new(ChunkWriter {
                file,
                len: scan.valid_len,
                next_seq: scan.next_seq,
                dropped: false,
            }),
            committed: AtomicU64::new(scan.valid_len),
            messages: AtomicU64::new(scan.messages),
        })
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            id: self.id,
            start_ns: self.start_ns,
            end_ns: self.end_ns,
            messages: self.messages.load(Ordering::Acquire),
            bytes: self.committed.load(Ordering::Acquire),
            path: self.path.clone(),
        }
    }

    /// Append `records` as one write under the chunk lock.
    pub fn append(&self, records: &[EncodedRecord]) -> Result<Appended> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Corrupt("chunk lock poisoned"))?;
        if writer.dropped {
            return Ok(Appended::Dropped);
        }

        let total: usize = records.iter().map(|r| HEADER_SIZE + r.payload.len()).sum();
        let mut buf = Vec::with_capacity(total);
        let mut seq = writer.next_seq;
        for record in records {
            let header = RecordHeader::for_payload(&record.payload, record.time_ns, seq)?;
            buf.extend_from_slice(&header.to_bytes());
            buf.extend_from_slice(&record.payload);
            seq += 1;
        }

        if let Err(err) = writer.file.write_all(&buf) {
            // Roll back a partial write so later appends stay framed.
            let committed = writer.len;
            let _ = writer.file.set_len(committed);
            return Err(err.into());
        }
        if self.sync_writes {
            writer.file.sync_data()?;
        }

        writer.len += buf.len() as u64;
        writer.next_seq = seq;
        self.messages
            .fetch_add(records.len() as u64, Ordering::AcqRel);
        self.committed.store(writer.len, Ordering::Release);
        Ok(Appended::Written {
            bytes: buf.len() as u64,
        })
    }

    /// Unlink the chunk file. Later appends observe [`Appended::Dropped`].
    pub fn drop_file(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Corrupt("chunk lock poisoned"))?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        writer.dropped = true;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| Error::Corrupt("chunk lock poisoned"))?;
        if !writer.dropped {
            writer.file.sync_all()?;
        }
        Ok(())
    }

    /// Capture the committed prefix for reading.
    ///
    /// The handle keeps the data readable even if the chunk is dropped later.
    pub fn snapshot(&self) -> Result<ChunkSnapshot> {
        let file = File::open(&self.path)?;
        let len = self.committed.load(Ordering::Acquire);
        Ok(ChunkSnapshot {
            id: self.id,
            file,
            len,
        })
    }
}

pub(crate) struct ChunkSnapshot {
    id: ChunkId,
    file: File,
    len: u64,
}

impl ChunkSnapshot {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Decode every record accepted by `keep(time_ns, topic_id)`, ordered by
    /// time with insertion order breaking ties.
    pub fn read(&self, keep: impl Fn(i64, u32) -> bool) -> Result<Vec<StoredRecord>> {
        let view = MmapFile::map(&self.file, self.len as usize)?;
        let bytes = view.as_slice();
        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            let header_bytes: &[u8; HEADER_SIZE] = bytes
                .get(offset..offset + HEADER_SIZE)
                .and_then(|slice| slice.try_into().ok())
                .ok_or(Error::Corrupt("truncated record header"))?;
            let header = RecordHeader::from_bytes(header_bytes)?;
            let payload = bytes
                .get(offset + HEADER_SIZE..offset + header.record_len())
                .ok_or(Error::Corrupt("record length out of bounds"))?;
            header.validate_crc(payload)?;
            offset += header.record_len();

            let (topic_id, level_id, host_id, text) = decode_payload(payload)?;
            if !keep(header.timestamp_ns, topic_id) {
                continue;
            }
            let text = std::str::from_utf8(text)
                .map_err(|_| Error::Corrupt("message text is not utf-8"))?;
            records.push(StoredRecord {
                time_ns: header.timestamp_ns,
                seq: header.seq,
                topic_id,
                level_id,
                host_id,
                text: text.to_owned(),
            });
        }
        records.sort_by_key(|record| (record.time_ns, record.seq));
        Ok(records)
    }
}

fn decode_payload(payload: &[u8]) -> Result<(u32, u32, u32, &[u8])> {
    if payload.len() < PAYLOAD_IDS_LEN {
        return Err(Error::Corrupt("record payload too short"));
    }
    let id_at = |offset: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&payload[offset..offset + 4]);
        u32::from_le_bytes(raw)
    };
    Ok((id_at(0), id_at(4), id_at(8), &payload[PAYLOAD_IDS_LEN..]))
}

struct Scan {
    valid_len: u64,
    messages: u64,
    next_seq: u64,
}

/// Walk records from the start, stopping at the first one that is
/// incomplete or fails its checksum.
fn scan_records(bytes: &[u8]) -> Scan {
    let mut offset = 0usize;
    let mut messages = 0u64;
    let mut next_seq = 0u64;
    while let Some(header_bytes) = bytes
        .get(offset..offset + HEADER_SIZE)
        .and_then(|slice| <&[u8; HEADER_SIZE]>::try_from(slice).ok())
    {
        let Ok(header) = RecordHeader::from_bytes(header_bytes) else {
            break;
        };
        let Some(payload) = bytes.get(offset + HEADER_SIZE..offset + header.record_len()) else {
            break;
        };
        if header.validate_crc(payload).is_err() || payload.len() < PAYLOAD_IDS_LEN {
            break;
        }
        offset += header.record_len();
        messages += 1;
        next_seq = next_seq.max(header.seq + 1);
    }
    Scan {
        valid_len: offset as u64,
        messages,
        next_seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(time_ns: i64, topic_id: u32, text: &str) -> EncodedRecord {
        EncodedRecord::new(time_ns, topic_id, 1, 1, text).unwrap()
    }

    #[test]
    fn chunk_id_is_epoch_aligned() {
        let day = Interval::DAY.as_nanos();
        assert_eq!(ChunkId::for_time(0, Interval::DAY), ChunkId(0));
        assert_eq!(ChunkId::for_time(day - 1, Interval::DAY), ChunkId(0));
        assert_eq!(ChunkId::for_time(day, Interval::DAY), ChunkId(1));
        assert_eq!(ChunkId::for_time(-1, Interval::DAY), ChunkId(-1));
        assert_eq!(ChunkId(-1).bounds(Interval::DAY), (-day, 0));
    }

    #[test]
    fn extreme_chunks_saturate() {
        let last = ChunkId::for_time(i64::MAX, Interval::DAY);
        let (start, end) = last.bounds(Interval::DAY);
        assert!(start <= i64::MAX && end == i64::MAX);
        let first = ChunkId::for_time(i64::MIN, Interval::DAY);
        assert_eq!(first.bounds(Interval::DAY).0, i64::MIN);
    }

    #[test]
    fn file_names_round_trip() {
        assert_eq!(ChunkId(19723).file_name(), "19723.chunk");
        assert_eq!(ChunkId::from_file_name("-4.chunk"), Some(ChunkId(-4)));
        assert_eq!(ChunkId::from_file_name("4.chunk.tmp"), None);
        assert_eq!(ChunkId::from_file_name("notes.txt"), None);
    }

    #[test]
    fn append_then_read_sorted() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, false).unwrap();
        chunk
            .append(&[record(30, 1, "c"), record(10, 1, "a"), record(10, 2, "b")])
            .unwrap();

        let records = chunk.snapshot().unwrap().read(|_, _| true).unwrap();
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        assert_eq!(chunk.info().messages, 3);

        let only_topic_two = chunk.snapshot().unwrap().read(|_, topic| topic == 2).unwrap();
        assert_eq!(only_topic_two.len(), 1);
    }

    #[test]
    fn snapshot_ignores_later_appends() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, false).unwrap();
        chunk.append(&[record(1, 1, "first")]).unwrap();
        let snapshot = chunk.snapshot().unwrap();
        chunk.append(&[record(2, 1, "second")]).unwrap();
        assert_eq!(snapshot.read(|_, _| true).unwrap().len(), 1);
    }

    #[test]
    fn reopen_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ChunkId(0).file_name());
        {
            let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, true).unwrap();
            chunk.append(&[record(1, 1, "kept"), record(2, 1, "kept too")]).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; HEADER_SIZE + 3]).unwrap();
        drop(file);

        let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, false).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(chunk.info().messages, 2);

        chunk.append(&[record(3, 1, "after")]).unwrap();
        let records = chunk.snapshot().unwrap().read(|_, _| true).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].seq, 2);
    }

    #[test]
    fn dropped_chunk_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, false).unwrap();
        chunk.append(&[record(1, 1, "x")]).unwrap();
        let snapshot = chunk.snapshot().unwrap();
        chunk.drop_file().unwrap();

        assert!(!dir.path().join(ChunkId(0).file_name()).exists());
        assert!(matches!(
            chunk.append(&[record(2, 1, "y")]).unwrap(),
            Appended::Dropped
        ));
        assert_eq!(snapshot.read(|_, _| true).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_committed_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::open(dir.path(), ChunkId(0), Interval::DAY, false).unwrap();
        chunk.append(&[record(1, 1, "payload")]).unwrap();

        let path = dir.path().join(ChunkId(0).file_name());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = chunk.snapshot().unwrap().read(|_, _| true).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
