//! Object store boundary for hoard.
//!
//! [`ObjectStore`] is implemented for a plain directory
//! ([`LocalBackend`](backend::LocalBackend)), for S3-compatible services
//! (`S3Backend`, feature `s3`) and for tests (`MockBackend`, feature `mock`).

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::{ObjectStore, quote_checksum, unquote_checksum};
pub use crate::path::validate as validate_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn ObjectStore + Send + Sync>;
