//! Archive readers: ZIP, TAR (plus compressed variants), and RAR behind one
//! streaming contract.
//!
//! Entries are visited in the container's natural order. Directories and
//! non-file metadata entries are skipped. Entry failures are isolated; an
//! archive is abandoned once [`ENTRY_FAIL_THRESHOLD`] entries have failed.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::metrics::ArchiveLabel;

use super::VIRTUAL_PATH_SEPARATOR;

mod rar;
mod tar;
mod zip;

/// Entry failures tolerated before the rest of an archive is abandoned.
pub(crate) const ENTRY_FAIL_THRESHOLD: usize = 50;

/// File-name suffixes recognized as archives, lowercased.
const ZIP_SUFFIXES: &[&str] = &[".zip"];
const TAR_SUFFIXES: &[&str] = &[
    ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz",
];
const RAR_SUFFIXES: &[&str] = &[".rar"];

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    Rar,
}

impl ArchiveKind {
    /// Map a file name to its archive format; unknown extensions are
    /// regular files.
    pub fn detect(path: &Path) -> Option<ArchiveKind> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if ZIP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return Some(ArchiveKind::Zip);
        }
        if TAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return Some(ArchiveKind::Tar);
        }
        if RAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return Some(ArchiveKind::Rar);
        }
        None
    }

    /// Metrics label for this format.
    pub fn label(self) -> ArchiveLabel {
        match self {
            ArchiveKind::Zip => ArchiveLabel::Zip,
            ArchiveKind::Tar => ArchiveLabel::Tar,
            ArchiveKind::Rar => ArchiveLabel::Rar,
        }
    }
}

/// Metadata of one entry inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Internal path, `/`-separated regardless of host OS.
    pub internal_path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Modification timestamp, epoch nanoseconds; 0 when the container
    /// carries none.
    pub modified_ns: i64,
}

/// Visitor verdict for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlow {
    /// Proceed to the next entry.
    Continue,
    /// The entry's stream failed; counts toward the abandon threshold.
    Failed,
    /// Stop visiting (cancellation); not an error.
    Stop,
}

/// Summary of one archive visit.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisitOutcome {
    /// Entries that failed to enumerate or stream.
    pub failed_entries: usize,
    /// True when the failure threshold abandoned the archive early.
    pub abandoned: bool,
}

/// Errors raised by archive readers.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The format cannot be handled on this host (e.g. no RAR tool).
    #[error("Unsupported archive {path}: {reason}")]
    Unsupported {
        /// Archive that could not be opened.
        path: PathBuf,
        /// Why the format is unavailable.
        reason: String,
    },
    /// The container could not be opened or its index could not be read.
    #[error("Failed to open archive {path}: {message}")]
    Open {
        /// Archive that failed to open.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
}

/// Callback invoked per entry with its metadata and a one-shot byte stream.
pub(crate) type EntryVisitor<'a> = dyn FnMut(&ArchiveEntry, &mut dyn Read) -> EntryFlow + 'a;

/// Open an archive and stream its entries through the visitor.
pub(crate) fn visit_archive(
    path: &Path,
    kind: ArchiveKind,
    visit: &mut EntryVisitor<'_>,
) -> Result<VisitOutcome, ArchiveError> {
    match kind {
        ArchiveKind::Zip => zip::visit(path, visit),
        ArchiveKind::Tar => tar::visit(path, visit),
        ArchiveKind::Rar => rar::visit(path, visit),
    }
}

/// Build the catalog path for an archived entry:
/// `<archive-absolute-path>::<internal-path>`.
pub fn virtual_path(archive_path: &Path, internal_path: &str) -> String {
    format!(
        "{}{VIRTUAL_PATH_SEPARATOR}{internal_path}",
        archive_path.display()
    )
}

/// Normalize an internal path to `/` separators.
pub(crate) fn normalize_internal(name: &str) -> String {
    name.replace('\\', "/")
}
