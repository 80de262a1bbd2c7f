use rusqlite::Connection;

use super::CatalogError;
use super::util::map_sql_error;

pub(super) fn apply_schema(connection: &Connection) -> Result<(), CatalogError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS hashes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                size INTEGER NOT NULL,
                md5 TEXT NOT NULL,
                sha1 TEXT NOT NULL,
                sha256 TEXT NOT NULL
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_hashes_triple
                ON hashes (md5, sha1, sha256);
             CREATE INDEX IF NOT EXISTS idx_hashes_size ON hashes (size);
             CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash_id INTEGER NOT NULL REFERENCES hashes(id),
                name TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                machine TEXT NOT NULL,
                created INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                scanned INTEGER NOT NULL,
                operation TEXT NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0,
                archive_path TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_files_hash_id ON files (hash_id);
             CREATE INDEX IF NOT EXISTS idx_files_name ON files (name);
             CREATE INDEX IF NOT EXISTS idx_files_machine ON files (machine);",
        )
        .map_err(map_sql_error)?;
    ensure_optional_columns(connection)?;
    // Indexes over late-added columns go after the column pass.
    connection
        .execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_files_is_archived
                ON files (is_archived) WHERE is_archived != 0;",
        )
        .map_err(map_sql_error)?;
    Ok(())
}

/// Add columns introduced after the first release to databases created
/// before them.
fn ensure_optional_columns(connection: &Connection) -> Result<(), CatalogError> {
    let mut stmt = connection
        .prepare("PRAGMA table_info(files)")
        .map_err(map_sql_error)?;
    let columns: std::collections::HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(map_sql_error)?
        .filter_map(Result::ok)
        .collect();
    if !columns.contains("is_archived") {
        connection
            .execute(
                "ALTER TABLE files ADD COLUMN is_archived INTEGER NOT NULL DEFAULT 0",
                [],
            )
            .map_err(map_sql_error)?;
    }
    if !columns.contains("archive_path") {
        connection
            .execute("ALTER TABLE files ADD COLUMN archive_path TEXT", [])
            .map_err(map_sql_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::OptionalExtension;
    use tempfile::tempdir;

    #[test]
    fn schema_is_idempotent() {
        let connection = Connection::open_in_memory().unwrap();
        apply_schema(&connection).unwrap();
        apply_schema(&connection).unwrap();
    }

    #[test]
    fn triple_index_is_unique() {
        let connection = Connection::open_in_memory().unwrap();
        apply_schema(&connection).unwrap();
        connection
            .execute(
                "INSERT INTO hashes (size, md5, sha1, sha256) VALUES (1, 'a', 'b', 'c')",
                [],
            )
            .unwrap();
        let err = connection.execute(
            "INSERT INTO hashes (size, md5, sha1, sha256) VALUES (2, 'a', 'b', 'c')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn archive_columns_are_added_to_old_databases() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("old.db");
        {
            let connection = Connection::open(&db_path).unwrap();
            connection
                .execute_batch(
                    "CREATE TABLE hashes (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        size INTEGER NOT NULL,
                        md5 TEXT NOT NULL,
                        sha1 TEXT NOT NULL,
                        sha256 TEXT NOT NULL
                     );
                     CREATE TABLE files (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        hash_id INTEGER NOT NULL,
                        name TEXT NOT NULL,
                        path TEXT NOT NULL UNIQUE,
                        machine TEXT NOT NULL,
                        created INTEGER NOT NULL,
                        modified INTEGER NOT NULL,
                        scanned INTEGER NOT NULL,
                        operation TEXT NOT NULL
                     );",
                )
                .unwrap();
        }
        let connection = Connection::open(&db_path).unwrap();
        apply_schema(&connection).unwrap();
        let archived: Option<i64> = connection
            .query_row("SELECT is_archived FROM files LIMIT 1", [], |row| row.get(0))
            .optional()
            .unwrap();
        assert!(archived.is_none());
    }
}
