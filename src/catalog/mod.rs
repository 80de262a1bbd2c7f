use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read-only catalog queries: lookups, statistics, search, duplicates.
pub mod read;
/// SQLite schema management for catalog databases.
pub mod schema;
/// Batched upserts with content-hash deduplication.
pub mod write;

/// Error translation and busy-retry helpers.
pub mod util;

pub use read::{CatalogStatistics, DuplicateGroup, SearchQuery, TreeNode};
pub use write::{BatchOutcome, CHUNK_SIZE};

/// Operation recorded on a file row: first sighting or in-place rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// First sighting of this path.
    Add,
    /// Path already catalogued; content or metadata changed.
    Mod,
}

impl Operation {
    /// Column representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Add => "ADD",
            Operation::Mod => "MOD",
        }
    }

    /// Parse a column value; anything unrecognized reads as ADD.
    pub fn parse(value: &str) -> Self {
        match value {
            "MOD" => Operation::Mod,
            _ => Operation::Add,
        }
    }
}

/// A unique content identity: byte size plus the md5/sha1/sha256 triple.
///
/// Detached value row; safe to move across worker boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRow {
    /// Stable row id.
    pub id: i64,
    /// Byte size of the content that produced the digests.
    pub size: u64,
    /// Lowercase hex MD5 (32 chars).
    pub md5: String,
    /// Lowercase hex SHA-1 (40 chars).
    pub sha1: String,
    /// Lowercase hex SHA-256 (64 chars).
    pub sha256: String,
}

/// One observation of a file at a path on a machine.
///
/// Detached value row; safe to move across worker boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable row id.
    pub id: i64,
    /// Referenced content identity.
    pub hash_id: i64,
    /// File basename.
    pub name: String,
    /// Absolute path, or `<archive>::<internal>` for archived entries.
    pub path: String,
    /// Label of the machine the file was observed on.
    pub machine: String,
    /// Creation timestamp, epoch nanoseconds.
    pub created_ns: i64,
    /// Modification timestamp, epoch nanoseconds.
    pub modified_ns: i64,
    /// Time of the scan that wrote this row, epoch nanoseconds.
    pub scanned_ns: i64,
    /// ADD on first sighting, MOD on rewrite.
    pub operation: Operation,
    /// True for entries observed inside an archive.
    pub is_archived: bool,
    /// Containing archive's absolute path when `is_archived`.
    pub archive_path: Option<String>,
}

/// A completed observation waiting to be flushed.
///
/// Handed from a worker to the batch writer; owned by the writer until the
/// surrounding transaction commits or the record is quarantined as failed.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub name: String,
    pub path: String,
    pub machine: String,
    pub created_ns: i64,
    pub modified_ns: i64,
    pub scanned_ns: i64,
    pub operation: Operation,
    pub is_archived: bool,
    pub archive_path: Option<String>,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// Errors returned when managing a catalog database.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// SQLite query failed.
    #[error("Database query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    /// Failed to create a parent directory for the database file.
    #[error("Could not write to {path}: {source}")]
    CreateDir {
        /// Path that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Database is locked by another writer.
    #[error("Database is busy, please retry")]
    Busy,
    /// Integrity check reported damage.
    #[error("Catalog failed its integrity check: {0}")]
    Corrupt(String),
    /// SQLite returned an unexpected result.
    #[error("SQLite returned an unexpected result")]
    Unexpected,
}

/// SQLite-backed catalog of hashes and file records.
///
/// Each handle owns one connection (a scoped session). WAL journaling allows
/// any number of read handles alongside the single writing handle; write
/// contention is absorbed by `busy_timeout` plus the retry in
/// [`util`].
pub struct Catalog {
    connection: Connection,
    path: PathBuf,
}

pub(crate) const FILE_COLUMNS: &str =
    "f.id, f.hash_id, f.name, f.path, f.machine, f.created, f.modified, f.scanned, \
     f.operation, f.is_archived, f.archive_path";
pub(crate) const HASH_COLUMNS: &str = "h.id, h.size, h.md5, h.sha1, h.sha256";

impl Catalog {
    /// Open (or create) the catalog at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        util::create_parent_if_needed(path)?;
        let connection = Connection::open(path)?;
        let catalog = Self {
            connection,
            path: path.to_path_buf(),
        };
        catalog.apply_pragmas()?;
        schema::apply_schema(&catalog.connection)?;
        Ok(catalog)
    }

    /// Open an existing catalog read-only, without applying migrations.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let catalog = Self {
            connection,
            path: path.to_path_buf(),
        };
        catalog.apply_read_only_pragmas()?;
        Ok(catalog)
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run SQLite's quick integrity check. Meant for startup; failure is
    /// fatal there.
    pub fn health_check(&self) -> Result<(), CatalogError> {
        let verdict: String = self
            .connection
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(util::map_sql_error)?;
        if verdict.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(CatalogError::Corrupt(verdict))
        }
    }

    fn apply_pragmas(&self) -> Result<(), CatalogError> {
        self.connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout=5000;
                 PRAGMA temp_store=MEMORY;
                 PRAGMA cache_size=-32000;",
            )
            .map_err(util::map_sql_error)?;
        Ok(())
    }

    fn apply_read_only_pragmas(&self) -> Result<(), CatalogError> {
        self.connection
            .execute_batch(
                "PRAGMA foreign_keys=ON;
                 PRAGMA busy_timeout=5000;
                 PRAGMA temp_store=MEMORY;",
            )
            .map_err(util::map_sql_error)?;
        Ok(())
    }
}

/// Map a joined `FILE_COLUMNS, HASH_COLUMNS` row into detached values.
pub(crate) fn file_and_hash_from_row(row: &Row<'_>) -> rusqlite::Result<(FileRecord, HashRow)> {
    let record = FileRecord {
        id: row.get(0)?,
        hash_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        machine: row.get(4)?,
        created_ns: row.get(5)?,
        modified_ns: row.get(6)?,
        scanned_ns: row.get(7)?,
        operation: Operation::parse(&row.get::<_, String>(8)?),
        is_archived: row.get::<_, i64>(9)? != 0,
        archive_path: row.get(10)?,
    };
    let hash = HashRow {
        id: row.get(11)?,
        size: row.get::<_, i64>(12)?.max(0) as u64,
        md5: row.get(13)?,
        sha1: row.get(14)?,
        sha256: row.get(15)?,
    };
    Ok((record, hash))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a pending record with fixed timestamps and fake digests derived
    /// from the path, so tests can focus on flush mechanics.
    pub fn pending(path: &str, operation: Operation) -> PendingRecord {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut seed = 0xcbf2_9ce4_8422_2325u64;
        for byte in path.bytes() {
            seed = (seed ^ u64::from(byte)).wrapping_mul(0x1_0000_01b3);
        }
        let tag = format!("{seed:016x}");
        PendingRecord {
            name,
            path: path.to_string(),
            machine: "test-machine".to_string(),
            created_ns: 1_000,
            modified_ns: 2_000,
            scanned_ns: 3_000,
            operation,
            is_archived: false,
            archive_path: None,
            size: path.len() as u64,
            md5: format!("{tag:0<32}"),
            sha1: format!("{tag:0<40}"),
            sha256: format!("{tag:0<64}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_schema_and_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("indexer.db");
        let catalog = Catalog::open(&path).unwrap();
        catalog.health_check().unwrap();

        let journal_mode: String = catalog
            .connection
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let tables: i64 = catalog
            .connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('hashes','files')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/indexer.db");
        Catalog::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn read_only_open_sees_writer_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("indexer.db");
        let writer = Catalog::open(&path).unwrap();
        writer
            .upsert_batch(&[test_support::pending("/data/a.bin", Operation::Add)])
            .unwrap();

        let reader = Catalog::open_read_only(&path).unwrap();
        let found = reader.lookup_by_path("/data/a.bin").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn operation_round_trips_through_text() {
        assert_eq!(Operation::parse(Operation::Add.as_str()), Operation::Add);
        assert_eq!(Operation::parse(Operation::Mod.as_str()), Operation::Mod);
        assert_eq!(Operation::parse("???"), Operation::Add);
    }
}
