use std::collections::{HashMap, HashSet};

use rusqlite::{Transaction, params};
use tracing::{error, warn};

use super::util::{map_sql_error, with_write_retry};
use super::{Catalog, CatalogError, Operation, PendingRecord};

/// Records committed per transaction during a batch flush.
pub const CHUNK_SIZE: usize = 200;

/// Result of one `upsert_batch` call.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    /// File rows newly inserted.
    pub inserted: usize,
    /// File rows rewritten in place.
    pub updated: usize,
    /// Paths whose records failed even in isolation; not retried.
    pub failed_paths: Vec<String>,
}

impl Catalog {
    /// Persist a batch of pending records.
    ///
    /// Records are processed in receive order, in chunks of [`CHUNK_SIZE`]
    /// per transaction. Each chunk resolves content triples to hash ids
    /// (inserting novel triples), then inserts ADD rows and updates MOD rows
    /// keyed by path. A failing chunk is rolled back and its records are
    /// re-attempted one per transaction; records that still fail land in
    /// `failed_paths`.
    pub fn upsert_batch(&self, records: &[PendingRecord]) -> Result<BatchOutcome, CatalogError> {
        let mut outcome = BatchOutcome::default();
        for chunk in records.chunks(CHUNK_SIZE) {
            match with_write_retry("batch flush", || self.flush_chunk(chunk)) {
                Ok((inserted, updated)) => {
                    outcome.inserted += inserted;
                    outcome.updated += updated;
                }
                Err(err) => {
                    warn!(
                        "Flushing a chunk of {} records failed ({err}); \
                         retrying records individually",
                        chunk.len()
                    );
                    for record in chunk {
                        match with_write_retry("record flush", || {
                            self.flush_chunk(std::slice::from_ref(record))
                        }) {
                            Ok((inserted, updated)) => {
                                outcome.inserted += inserted;
                                outcome.updated += updated;
                            }
                            Err(err) => {
                                error!("Dropping record for {}: {err}", record.path);
                                outcome.failed_paths.push(record.path.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// One transactional chunk. Rolls back via drop on any error.
    fn flush_chunk(&self, chunk: &[PendingRecord]) -> Result<(usize, usize), CatalogError> {
        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(map_sql_error)?;
        let hash_ids = resolve_hash_ids(&tx, chunk)?;
        // Paths already catalogued turn ADD into an in-place rewrite; this
        // keeps partial prior scans correct when the decider saw stale state.
        let existing = existing_paths(&tx, chunk)?;

        let mut inserted = 0usize;
        let mut updated = 0usize;
        {
            let mut insert = tx
                .prepare_cached(
                    "INSERT INTO files (hash_id, name, path, machine, created, modified, \
                                        scanned, operation, is_archived, archive_path)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .map_err(map_sql_error)?;
            let mut update = tx
                .prepare_cached(
                    "UPDATE files SET hash_id = ?1, name = ?2, machine = ?3, created = ?4, \
                                      modified = ?5, scanned = ?6, operation = ?7, \
                                      is_archived = ?8, archive_path = ?9
                     WHERE path = ?10",
                )
                .map_err(map_sql_error)?;

            for record in chunk {
                let hash_id = hash_ids
                    .get(&triple_key(record))
                    .copied()
                    .ok_or(CatalogError::Unexpected)?;
                let rewrite =
                    record.operation == Operation::Mod || existing.contains(&record.path);
                if rewrite {
                    let affected = update
                        .execute(params![
                            hash_id,
                            record.name,
                            record.machine,
                            record.created_ns,
                            record.modified_ns,
                            record.scanned_ns,
                            Operation::Mod.as_str(),
                            record.is_archived as i64,
                            record.archive_path,
                            record.path,
                        ])
                        .map_err(map_sql_error)?;
                    if affected == 0 {
                        insert
                            .execute(params![
                                hash_id,
                                record.name,
                                record.path,
                                record.machine,
                                record.created_ns,
                                record.modified_ns,
                                record.scanned_ns,
                                record.operation.as_str(),
                                record.is_archived as i64,
                                record.archive_path,
                            ])
                            .map_err(map_sql_error)?;
                        inserted += 1;
                    } else {
                        updated += 1;
                    }
                } else {
                    insert
                        .execute(params![
                            hash_id,
                            record.name,
                            record.path,
                            record.machine,
                            record.created_ns,
                            record.modified_ns,
                            record.scanned_ns,
                            Operation::Add.as_str(),
                            record.is_archived as i64,
                            record.archive_path,
                        ])
                        .map_err(map_sql_error)?;
                    inserted += 1;
                }
            }
        }
        tx.commit().map_err(map_sql_error)?;
        Ok((inserted, updated))
    }
}

fn triple_key(record: &PendingRecord) -> String {
    format!("{}\n{}\n{}", record.md5, record.sha1, record.sha256)
}

/// Resolve the chunk's distinct content triples to hash ids, inserting
/// triples the catalog has never seen.
fn resolve_hash_ids(
    tx: &Transaction<'_>,
    chunk: &[PendingRecord],
) -> Result<HashMap<String, i64>, CatalogError> {
    let mut distinct: Vec<&PendingRecord> = Vec::new();
    let mut seen = HashSet::new();
    for record in chunk {
        if seen.insert(triple_key(record)) {
            distinct.push(record);
        }
    }

    let mut ids = HashMap::new();
    select_triple_ids(tx, &distinct, &mut ids)?;

    let novel: Vec<&PendingRecord> = distinct
        .iter()
        .copied()
        .filter(|record| !ids.contains_key(&triple_key(record)))
        .collect();
    if !novel.is_empty() {
        let mut insert = tx
            .prepare_cached(
                "INSERT INTO hashes (size, md5, sha1, sha256) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(md5, sha1, sha256) DO NOTHING",
            )
            .map_err(map_sql_error)?;
        for record in &novel {
            insert
                .execute(params![
                    record.size as i64,
                    record.md5,
                    record.sha1,
                    record.sha256
                ])
                .map_err(map_sql_error)?;
        }
        select_triple_ids(tx, &novel, &mut ids)?;
    }
    Ok(ids)
}

fn select_triple_ids(
    tx: &Transaction<'_>,
    records: &[&PendingRecord],
    ids: &mut HashMap<String, i64>,
) -> Result<(), CatalogError> {
    if records.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["(?, ?, ?)"; records.len()].join(", ");
    let sql = format!(
        "SELECT id, md5, sha1, sha256 FROM hashes \
         WHERE (md5, sha1, sha256) IN (VALUES {placeholders})"
    );
    let mut stmt = tx.prepare(&sql).map_err(map_sql_error)?;
    let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(records.len() * 3);
    for record in records {
        bound.push(&record.md5);
        bound.push(&record.sha1);
        bound.push(&record.sha256);
    }
    let rows = stmt
        .query_map(bound.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(map_sql_error)?;
    for row in rows {
        let (id, md5, sha1, sha256) = row.map_err(map_sql_error)?;
        ids.insert(format!("{md5}\n{sha1}\n{sha256}"), id);
    }
    Ok(())
}

fn existing_paths(
    tx: &Transaction<'_>,
    chunk: &[PendingRecord],
) -> Result<HashSet<String>, CatalogError> {
    if chunk.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; chunk.len()].join(", ");
    let sql = format!("SELECT path FROM files WHERE path IN ({placeholders})");
    let mut stmt = tx.prepare(&sql).map_err(map_sql_error)?;
    let bound: Vec<&dyn rusqlite::ToSql> = chunk
        .iter()
        .map(|record| &record.path as &dyn rusqlite::ToSql)
        .collect();
    let rows = stmt
        .query_map(bound.as_slice(), |row| row.get::<_, String>(0))
        .map_err(map_sql_error)?;
    let mut existing = HashSet::new();
    for row in rows {
        existing.insert(row.map_err(map_sql_error)?);
    }
    Ok(existing)
}
