//! CLI Error Types
//!
//! Wraps the library crates' errors so `main` has a single tree to report.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Loading, validating or saving the configuration failed
    #[display("configuration error")]
    Config,
    /// The object store could not be opened
    #[display("failed to open object store")]
    Store,
    /// A local store directory inside the work directory would be backed
    /// up into itself
    #[display("object store {} is inside the work directory", _0.display())]
    StoreInsideWorkDir(#[error(not(source))] PathBuf),
    #[display("commit failed")]
    Commit,
    /// The configured store was not compiled into this binary
    #[display("store {_0:?} is not supported by this build")]
    Unsupported(#[error(not(source))] &'static str),
    #[display("I/O error: {_0}")]
    Io(IoError),
}
