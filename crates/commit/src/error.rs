//! Commit Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A commit error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for commit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a commit failure.
///
/// ### Per-file Errors
/// - [`ErrorKind::Fingerprint`]
/// - [`ErrorKind::Upload`]
/// - [`ErrorKind::ChecksumMismatch`]
///
/// ### Whole-commit Errors
/// - [`ErrorKind::Snapshot`]
/// - [`ErrorKind::Cancelled`]
/// - [`ErrorKind::Worker`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file could not be read and hashed.
    #[display("failed to fingerprint {}", _0.display())]
    Fingerprint(#[error(not(source))] PathBuf),
    /// The object store rejected or failed the upload.
    #[display("failed to upload {} as {key}", path.display())]
    Upload { key: String, path: PathBuf },
    /// The store reports a different checksum than was computed locally.
    /// Permanent: the stored object does not hold the content that was read.
    #[display("checksum mismatch for {key}: local {local}, remote {remote}")]
    ChecksumMismatch { key: String, local: String, remote: String },
    /// Walking the work directory failed.
    Snapshot,
    /// The caller cancelled the commit before it completed.
    Cancelled,
    /// An upload task panicked or was aborted.
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upload { .. } | Self::Fingerprint(_))
    }
}
