use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Transparent descent into ZIP/TAR/RAR containers.
pub mod archive;
/// Batch writer draining completed records into the catalog.
pub mod batch;
/// Scan lifecycle: walker, worker pool, writer, shutdown.
pub mod coordinator;
/// ADD/MOD/SKIP classification.
pub mod decide;
/// Streaming multi-digest hashing.
pub mod hash;
/// Path exclusion rules.
pub mod ignore;
/// Single-line progress display.
pub mod progress;
/// Deterministic directory traversal.
pub mod walk;

pub use coordinator::{ScanOptions, ScanOutcome, ScanStats, run_scan};
pub use decide::{Decision, decide};
pub use hash::{ContentDigests, HashError, digest_file, digest_stream};
pub use ignore::IgnoreRules;

/// Separator between an archive's path and an entry's internal path.
pub const VIRTUAL_PATH_SEPARATOR: &str = "::";

/// Errors that can abort a scan run.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan root is not a directory.
    #[error("Scan root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    /// Scan was canceled by an interrupt.
    #[error("Scan canceled")]
    Canceled,
    /// Failed to read a file or directory.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Catalog operation failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    /// A pipeline thread panicked or disappeared.
    #[error("Scan pipeline failed: {0}")]
    Pipeline(String),
}
