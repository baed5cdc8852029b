//! Table metadata management.
//!
//! Stored in `_table/metadata.json` next to the chunk directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::interval::Interval;
use crate::{Error, Result};

const METADATA_VERSION: u32 = 1;
const METADATA_FILENAME: &str = "metadata.json";

pub const TABLE_NAME: &str = "message";
pub const PARTITION_COLUMN: &str = "time";

/// Table metadata stored in _table/metadata.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Metadata format version.
    pub version: u32,
    /// Table creation timestamp (nanoseconds).
    pub created_at: i64,
    pub schema: String,
    pub table: String,
    /// Column the table is partitioned on.
    pub partition_column: String,
    /// Width of every chunk.
    pub chunk_interval: Interval,
}

impl TableMetadata {
    pub fn new(schema: impl Into<String>, chunk_interval: Interval) -> Self {
        Self {
            version: METADATA_VERSION,
            created_at: SystemClock.now_ns(),
            schema: schema.into(),
            table: TABLE_NAME.to_string(),
            partition_column: PARTITION_COLUMN.to_string(),
            chunk_interval,
        }
    }

    /// Statement that creates an equivalent hypertable in TimescaleDB.
    pub fn hypertable_ddl(&self) -> String {
        format!(
            "SELECT create_hypertable('{}.{}', '{}', chunk_time_interval => interval '{}');",
            self.schema, self.table, self.partition_column, self.chunk_interval
        )
    }

    /// Save metadata to disk, replacing any previous file atomically.
    pub fn save(&self, table_root: &Path) -> Result<()> {
        let metadata_dir = table_root.join("_table");
        fs::create_dir_all(&metadata_dir)?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::CorruptMetadata(e.to_string()))?;
        write_atomic(&metadata_path(table_root), &json)
    }

    /// Load metadata from disk.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: metadata file missing or unreadable
    /// - `Error::CorruptMetadata`: invalid JSON
    /// - `Error::UnsupportedVersion`: written by an incompatible release
    pub fn load(table_root: &Path) -> Result<Self> {
        let metadata_path = metadata_path(table_root);

        if !metadata_path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("table metadata not found: {}", metadata_path.display()),
            )));
        }

        let json = fs::read_to_string(&metadata_path)?;
        let metadata: TableMetadata = serde_json::from_str(&json)
            .map_err(|e| Error::CorruptMetadata(format!("{}: {e}", metadata_path.display())))?;

        if metadata.version != METADATA_VERSION {
            return Err(Error::UnsupportedVersion(metadata.version));
        }
        if metadata.partition_column != PARTITION_COLUMN {
            return Err(Error::CorruptMetadata(format!(
                "unexpected partition column '{}'",
                metadata.partition_column
            )));
        }

        Ok(metadata)
    }

    /// Check if table exists (has metadata file).
    pub fn exists(table_root: &Path) -> bool {
        metadata_path(table_root).exists()
    }
}

/// Get the metadata file path for a table.
pub fn metadata_path(table_root: &Path) -> PathBuf {
    table_root.join("_table").join(METADATA_FILENAME)
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_save_load() {
        let dir = TempDir::new().unwrap();
        let interval: Interval = "6h".parse().unwrap();
        let metadata = TableMetadata::new("public", interval);

        metadata.save(dir.path()).unwrap();
        let loaded = TableMetadata::load(dir.path()).unwrap();

        assert_eq!(loaded, metadata);
        assert_eq!(loaded.chunk_interval, interval);
        assert!(loaded.created_at > 0);
        assert!(!dir.path().join("_table/metadata.json.tmp").exists());
    }

    #[test]
    fn test_metadata_not_found() {
        let dir = TempDir::new().unwrap();
        let result = TableMetadata::load(dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_metadata_exists() {
        let dir = TempDir::new().unwrap();
        assert!(!TableMetadata::exists(dir.path()));
        TableMetadata::new("public", Interval::DAY)
            .save(dir.path())
            .unwrap();
        assert!(TableMetadata::exists(dir.path()));
    }

    #[test]
    fn test_metadata_rejects_future_version() {
        let dir = TempDir::new().unwrap();
        let mut metadata = TableMetadata::new("public", Interval::DAY);
        metadata.version = 99;
        metadata.save(dir.path()).unwrap();
        assert!(matches!(
            TableMetadata::load(dir.path()),
            Err(Error::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_metadata_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("_table")).unwrap();
        fs::write(metadata_path(dir.path()), "{not json").unwrap();
        assert!(matches!(
            TableMetadata::load(dir.path()),
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_hypertable_ddl() {
        let metadata = TableMetadata::new("public", Interval::DAY);
        assert_eq!(
            metadata.hypertable_ddl(),
            "SELECT create_hypertable('public.message', 'time', chunk_time_interval => interval '1 day');"
        );
    }
}
