//! Hashing Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A hashing error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for hashing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Hashing itself never fails; every error here comes from the byte source
/// or from malformed checksum input.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading from the byte source failed.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A checksum string could not be decoded into its 16 digest bytes.
    #[display("invalid checksum: {_0:?}")]
    InvalidChecksum(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidChecksum("abc".to_string()).to_string(), "invalid checksum: \"abc\"");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io(IoError::other("disk on fire")).is_retryable());
        assert!(!ErrorKind::InvalidChecksum(String::new()).is_retryable());
    }
}
