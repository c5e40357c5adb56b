//! Config Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source could not be parsed or merged
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// A loaded value is unusable
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// There is no user configuration directory to keep repository
    /// configurations in
    #[display("no configuration directory found; pass one explicitly")]
    NoConfigDir,
    /// Refusing to overwrite an existing repository configuration
    #[display("configuration already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// Writing the configuration failed
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The configuration could not be serialized
    Serialize,
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
