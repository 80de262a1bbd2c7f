use std::path::Path;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::CatalogError;

/// Attempts made against a busy database before giving up.
pub(super) const BUSY_RETRY_ATTEMPTS: u32 = 5;
/// Initial backoff; doubles per attempt, plus jitter.
pub(super) const BUSY_RETRY_BASE: Duration = Duration::from_millis(500);

/// Translate rusqlite errors into CatalogError variants; SQLITE_BUSY becomes
/// the retryable `Busy`.
pub(super) fn map_sql_error(err: rusqlite::Error) -> CatalogError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, _)
            if sql_err.extended_code == rusqlite::ffi::SQLITE_BUSY
                || sql_err.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT =>
        {
            CatalogError::Busy
        }
        rusqlite::Error::InvalidQuery
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::MultipleStatement => CatalogError::Unexpected,
        other => CatalogError::Sql(other),
    }
}

/// Run a write operation, retrying on `Busy` with doubling, jittered backoff.
///
/// Attempt counts surface in logs only.
pub(super) fn with_write_retry<T>(
    label: &str,
    mut op: impl FnMut() -> Result<T, CatalogError>,
) -> Result<T, CatalogError> {
    let mut delay = BUSY_RETRY_BASE;
    for attempt in 1..=BUSY_RETRY_ATTEMPTS {
        match op() {
            Err(CatalogError::Busy) if attempt < BUSY_RETRY_ATTEMPTS => {
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    "Catalog busy during {label} (attempt {attempt}/{BUSY_RETRY_ATTEMPTS}); \
                     retrying in {:?}",
                    delay + jitter
                );
                std::thread::sleep(delay + jitter);
                delay *= 2;
            }
            other => return other,
        }
    }
    Err(CatalogError::Busy)
}

pub(super) fn create_parent_if_needed(path: &Path) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|source| CatalogError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn non_busy_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = with_write_retry("test", || {
            calls.set(calls.get() + 1);
            Err(CatalogError::Unexpected)
        });
        assert!(matches!(result, Err(CatalogError::Unexpected)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn success_passes_through() {
        let result = with_write_retry("test", || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn busy_is_mapped_from_sqlite_failure() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: rusqlite::ffi::SQLITE_BUSY,
            },
            None,
        );
        assert!(matches!(map_sql_error(err), CatalogError::Busy));
    }
}
