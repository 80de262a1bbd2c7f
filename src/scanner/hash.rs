use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fixed read buffer for streaming digests.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Content identity produced by one end-to-end pass over a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigests {
    /// Bytes observed.
    pub size: u64,
    /// Lowercase hex MD5.
    pub md5: String,
    /// Lowercase hex SHA-1.
    pub sha1: String,
    /// Lowercase hex SHA-256.
    pub sha256: String,
}

/// Errors produced while hashing a stream.
#[derive(Debug, Error)]
pub enum HashError {
    /// I/O failure mid-stream.
    #[error("Read failed while hashing: {source}")]
    Read {
        /// Underlying IO error.
        #[from]
        source: std::io::Error,
    },
    /// The caller supplied an expected size and the stream disagreed.
    #[error("Stream size mismatch: expected {expected} bytes, observed {actual}")]
    SizeMismatch {
        /// Size the caller expected.
        expected: u64,
        /// Size actually observed.
        actual: u64,
    },
}

/// Hash a byte stream end-to-end, feeding all three digests in one pass.
///
/// When `expected_size` is given, a differing observed size fails with
/// [`HashError::SizeMismatch`]. No retries.
pub fn digest_stream(
    mut reader: impl Read,
    expected_size: Option<u64>,
) -> Result<ContentDigests, HashError> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut size: u64 = 0;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        md5.update(&buffer[..read]);
        sha1.update(&buffer[..read]);
        sha256.update(&buffer[..read]);
        size += read as u64;
    }
    if let Some(expected) = expected_size
        && expected != size
    {
        return Err(HashError::SizeMismatch {
            expected,
            actual: size,
        });
    }
    Ok(ContentDigests {
        size,
        md5: format!("{:x}", md5.finalize()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
    })
}

/// Open a file and hash its contents.
pub fn digest_file(path: &Path) -> Result<ContentDigests, HashError> {
    let file = std::fs::File::open(path)?;
    digest_stream(file, None)
}
