use std::fs::File;
use std::path::Path;

use tracing::warn;
use zip::ZipArchive;

use super::{
    ArchiveEntry, ArchiveError, ENTRY_FAIL_THRESHOLD, EntryFlow, EntryVisitor, VisitOutcome,
    normalize_internal,
};

pub(super) fn visit(
    path: &Path,
    visit: &mut EntryVisitor<'_>,
) -> Result<VisitOutcome, ArchiveError> {
    let file = File::open(path).map_err(|err| ArchiveError::Open {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| ArchiveError::Open {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut outcome = VisitOutcome::default();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            // Encrypted or corrupt entries land here; the rest of the
            // archive is still attempted.
            Err(err) => {
                warn!(
                    archive = %path.display(),
                    index,
                    error = %err,
                    "Failed to read ZIP entry"
                );
                if note_failure(&mut outcome, path) {
                    break;
                }
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = normalize_internal(entry.name());
        if name.is_empty() {
            continue;
        }
        let meta = ArchiveEntry {
            internal_path: name,
            size: entry.size(),
            modified_ns: modified_ns(entry.last_modified()),
        };
        match visit(&meta, &mut entry) {
            EntryFlow::Continue => {}
            EntryFlow::Failed => {
                if note_failure(&mut outcome, path) {
                    break;
                }
            }
            EntryFlow::Stop => break,
        }
    }
    Ok(outcome)
}

fn note_failure(outcome: &mut VisitOutcome, path: &Path) -> bool {
    outcome.failed_entries += 1;
    if outcome.failed_entries >= ENTRY_FAIL_THRESHOLD {
        warn!(
            archive = %path.display(),
            failures = outcome.failed_entries,
            "Too many entry failures; abandoning archive"
        );
        outcome.abandoned = true;
        return true;
    }
    false
}

/// Convert the entry's DOS timestamp to epoch nanoseconds; 0 when absent or
/// out of range.
fn modified_ns(stamp: Option<zip::DateTime>) -> i64 {
    let Some(stamp) = stamp else {
        return 0;
    };
    let Ok(month) = time::Month::try_from(stamp.month()) else {
        return 0;
    };
    let Ok(date) = time::Date::from_calendar_date(i32::from(stamp.year()), month, stamp.day())
    else {
        return 0;
    };
    let Ok(tod) = time::Time::from_hms(stamp.hour(), stamp.minute(), stamp.second()) else {
        return 0;
    };
    let moment = time::PrimitiveDateTime::new(date, tod).assume_utc();
    moment.unix_timestamp_nanos().clamp(0, i64::MAX as i128) as i64
}
