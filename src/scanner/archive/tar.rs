use std::fs::File;
use std::io::Read;
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::warn;
use xz2::read::XzDecoder;

use super::{
    ArchiveEntry, ArchiveError, ENTRY_FAIL_THRESHOLD, EntryFlow, EntryVisitor, VisitOutcome,
    normalize_internal,
};

enum Compression {
    Plain,
    Gzip,
    Bzip2,
    Xz,
}

fn compression_for(path: &Path) -> Compression {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Compression::Gzip
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        Compression::Bzip2
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Compression::Xz
    } else {
        Compression::Plain
    }
}

pub(super) fn visit(
    path: &Path,
    visit: &mut EntryVisitor<'_>,
) -> Result<VisitOutcome, ArchiveError> {
    let file = File::open(path).map_err(|err| ArchiveError::Open {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let reader: Box<dyn Read> = match compression_for(path) {
        Compression::Plain => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(BzDecoder::new(file)),
        Compression::Xz => Box::new(XzDecoder::new(file)),
    };
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(|err| ArchiveError::Open {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut outcome = VisitOutcome::default();
    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    archive = %path.display(),
                    error = %err,
                    "Failed to read TAR entry"
                );
                outcome.failed_entries += 1;
                // The tar stream is sequential; a broken header ends it.
                outcome.abandoned = true;
                break;
            }
        };
        // Directories, links, and pax/gnu metadata entries are skipped.
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let internal_path = match entry.path() {
            Ok(entry_path) => normalize_internal(&entry_path.to_string_lossy()),
            Err(err) => {
                warn!(
                    archive = %path.display(),
                    error = %err,
                    "Unreadable TAR entry path"
                );
                if note_failure(&mut outcome, path) {
                    break;
                }
                continue;
            }
        };
        if internal_path.is_empty() {
            continue;
        }
        let meta = ArchiveEntry {
            internal_path,
            size: entry.size(),
            modified_ns: entry
                .header()
                .mtime()
                .ok()
                .and_then(|secs| (secs as i64).checked_mul(1_000_000_000))
                .unwrap_or(0),
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
