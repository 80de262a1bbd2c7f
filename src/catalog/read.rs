use std::collections::{BTreeMap, HashMap};

use rusqlite::OptionalExtension;
use serde::Serialize;

use super::util::map_sql_error;
use super::{Catalog, CatalogError, FILE_COLUMNS, FileRecord, HASH_COLUMNS, HashRow,
            file_and_hash_from_row};

/// Upper bound on paths bound into one `lookup_by_paths` query.
const LOOKUP_CHUNK: usize = 400;

/// Aggregate numbers for the whole catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStatistics {
    /// Total file records.
    pub total_files: u64,
    /// Distinct content identities.
    pub total_hashes: u64,
    /// File records observed inside archives.
    pub archived_files: u64,
    /// Sum of sizes over all file records (duplicates counted per sighting).
    pub total_bytes: u64,
    /// Sum of sizes over distinct contents.
    pub unique_bytes: u64,
    /// File record count per machine label.
    pub files_per_machine: Vec<(String, u64)>,
}

/// Filters for a catalog search. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Substring match against the file basename.
    pub name_contains: Option<String>,
    /// Exact machine label.
    pub machine: Option<String>,
    /// Inclusive minimum content size.
    pub min_size: Option<u64>,
    /// Inclusive maximum content size.
    pub max_size: Option<u64>,
    /// Maximum rows returned (default 100).
    pub limit: Option<usize>,
    /// Rows skipped before the first returned.
    pub offset: Option<usize>,
}

/// One immediate child of a tree listing.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// Child name (single path component).
    pub name: String,
    /// Full path of the child.
    pub path: String,
    /// True when the child has further descendants.
    pub is_dir: bool,
    /// File records at or below the child.
    pub file_count: u64,
}

/// A set of file records sharing one content identity.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// The shared content identity.
    pub hash: HashRow,
    /// Paths referencing it.
    pub paths: Vec<String>,
}

impl Catalog {
    /// Fetch the record and its hash for an exact path, if catalogued.
    pub fn lookup_by_path(
        &self,
        path: &str,
    ) -> Result<Option<(FileRecord, HashRow)>, CatalogError> {
        let sql = format!(
            "SELECT {FILE_COLUMNS}, {HASH_COLUMNS}
             FROM files f JOIN hashes h ON h.id = f.hash_id
             WHERE f.path = ?1"
        );
        let mut stmt = self.connection.prepare_cached(&sql).map_err(map_sql_error)?;
        stmt.query_row([path], file_and_hash_from_row)
            .optional()
            .map_err(map_sql_error)
    }

    /// Fetch records for many paths at once, keyed by path.
    ///
    /// Used by the batch writer pre-check; paths missing from the catalog are
    /// simply absent from the result.
    pub fn lookup_by_paths(
        &self,
        paths: &[String],
    ) -> Result<HashMap<String, (FileRecord, HashRow)>, CatalogError> {
        let mut found = HashMap::with_capacity(paths.len());
        for chunk in paths.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {FILE_COLUMNS}, {HASH_COLUMNS}
                 FROM files f JOIN hashes h ON h.id = f.hash_id
                 WHERE f.path IN ({placeholders})"
            );
            let mut stmt = self.connection.prepare(&sql).map_err(map_sql_error)?;
            let bound: Vec<&dyn rusqlite::ToSql> = chunk
                .iter()
                .map(|path| path as &dyn rusqlite::ToSql)
                .collect();
            let rows = stmt
                .query_map(bound.as_slice(), file_and_hash_from_row)
                .map_err(map_sql_error)?;
            for row in rows {
                let (record, hash) = row.map_err(map_sql_error)?;
                found.insert(record.path.clone(), (record, hash));
            }
        }
        Ok(found)
    }

    /// Aggregate counts for the whole catalog. Serializable snapshot read.
    pub fn statistics(&self) -> Result<CatalogStatistics, CatalogError> {
        let (total_files, archived_files, total_bytes): (i64, i64, i64) = self
            .connection
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_archived != 0), 0),
                        COALESCE(SUM(h.size), 0)
                 FROM files f JOIN hashes h ON h.id = f.hash_id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(map_sql_error)?;
        let (total_hashes, unique_bytes): (i64, i64) = self
            .connection
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM hashes",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(map_sql_error)?;

        let mut stmt = self
            .connection
            .prepare("SELECT machine, COUNT(*) FROM files GROUP BY machine ORDER BY machine")
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(map_sql_error)?;
        let mut files_per_machine = Vec::new();
        for row in rows {
            let (machine, count) = row.map_err(map_sql_error)?;
            files_per_machine.push((machine, count.max(0) as u64));
        }

        Ok(CatalogStatistics {
            total_files: total_files.max(0) as u64,
            total_hashes: total_hashes.max(0) as u64,
            archived_files: archived_files.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
            unique_bytes: unique_bytes.max(0) as u64,
            files_per_machine,
        })
    }

    /// Filtered listing ordered by path. Serializable snapshot read.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<(FileRecord, HashRow)>, CatalogError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(fragment) = &query.name_contains {
            clauses.push(format!("f.name LIKE ?{} ESCAPE '\\'", bound.len() + 1));
            bound.push(Box::new(format!("%{}%", escape_like(fragment))));
        }
        if let Some(machine) = &query.machine {
            clauses.push(format!("f.machine = ?{}", bound.len() + 1));
            bound.push(Box::new(machine.clone()));
        }
        if let Some(min) = query.min_size {
            clauses.push(format!("h.size >= ?{}", bound.len() + 1));
            bound.push(Box::new(min as i64));
        }
        if let Some(max) = query.max_size {
            clauses.push(format!("h.size <= ?{}", bound.len() + 1));
            bound.push(Box::new(max as i64));
        }
        let filter = if clauses.is_empty() {
            "1=1".to_string()
        } else {
            clauses.join(" AND ")
        };
        let limit = query.limit.unwrap_or(100);
        let offset = query.offset.unwrap_or(0);
        let sql = format!(
            "SELECT {FILE_COLUMNS}, {HASH_COLUMNS}
             FROM files f JOIN hashes h ON h.id = f.hash_id
             WHERE {filter}
             ORDER BY f.path ASC
             LIMIT ?{} OFFSET ?{}",
            bound.len() + 1,
            bound.len() + 2,
        );
        bound.push(Box::new(limit as i64));
        bound.push(Box::new(offset as i64));

        let mut stmt = self.connection.prepare(&sql).map_err(map_sql_error)?;
        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|value| value.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), file_and_hash_from_row)
            .map_err(map_sql_error)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(map_sql_error)?);
        }
        Ok(results)
    }

    /// Immediate children under a path prefix, with per-child file counts.
    /// Serializable snapshot read.
    ///
    /// Virtual archive paths participate like any other path; the `::`
    /// separator is not treated specially here.
    pub fn tree(&self, prefix: &str) -> Result<Vec<TreeNode>, CatalogError> {
        let normalized = prefix.trim_end_matches('/');
        let like = format!("{}/%", escape_like(normalized));
        let mut stmt = self
            .connection
            .prepare_cached("SELECT path FROM files WHERE path LIKE ?1 ESCAPE '\\'")
            .map_err(map_sql_error)?;
        let rows = stmt
            .query_map([&like], |row| row.get::<_, String>(0))
            .map_err(map_sql_error)?;

        let mut children: BTreeMap<String, (bool, u64)> = BTreeMap::new();
        for row in rows {
            let path = row.map_err(map_sql_error)?;
            let remainder = &path[normalized.len() + 1..];
            match remainder.split_once('/') {
                Some((child, _)) => {
                    let entry = children.entry(child.to_string()).or_insert((true, 0));
                    entry.0 = true;
                    entry.1 += 1;
                }
                None => {
                    let entry = children.entry(remainder.to_string()).or_insert((false, 0));
                    entry.1 += 1;
                }
            }
        }
        Ok(children
            .into_iter()
            .map(|(name, (is_dir, file_count))| TreeNode {
                path: format!("{normalized}/{name}"),
                name,
                is_dir,
                file_count,
            })
            .collect())
    }

    /// Content identities referenced by at least `min_group` records.
    /// Serializable snapshot read.
    pub fn duplicates(
        &self,
        min_group: usize,
        limit: usize,
    ) -> Result<Vec<DuplicateGroup>, CatalogError> {
        let min_group = min_group.max(2) as i64;
        let sql = format!(
            "SELECT {HASH_COLUMNS}, COUNT(f.id) AS n
             FROM hashes h JOIN files f ON f.hash_id = h.id
             GROUP BY h.id
             HAVING n >= ?1
             ORDER BY n DESC, h.size DESC
             LIMIT ?2"
        );
        let mut stmt = self.connection.prepare(&sql).map_err(map_sql_error)?;
        let rows = stmt
            .query_map([min_group, limit as i64], |row| {
                Ok(HashRow {
                    id: row.get(0)?,
                    size: row.get::<_, i64>(1)?.max(0) as u64,
                    md5: row.get(2)?,
                    sha1: row.get(3)?,
                    sha256: row.get(4)?,
                })
            })
            .map_err(map_sql_error)?;
        let mut hashes = Vec::new();
        for row in rows {
            hashes.push(row.map_err(map_sql_error)?);
        }

        let mut groups = Vec::with_capacity(hashes.len());
        let mut paths_stmt = self
            .connection
            .prepare_cached("SELECT path FROM files WHERE hash_id = ?1 ORDER BY path")
            .map_err(map_sql_error)?;
        for hash in hashes {
            let rows = paths_stmt
                .query_map([hash.id], |row| row.get::<_, String>(0))
                .map_err(map_sql_error)?;
            let mut paths = Vec::new();
            for row in rows {
                paths.push(row.map_err(map_sql_error)?);
            }
            groups.push(DuplicateGroup { hash, paths });
        }
        Ok(groups)
    }
}

fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
