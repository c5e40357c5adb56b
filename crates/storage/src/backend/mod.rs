//! Object store trait and implementations.
//!
//! This module defines the [`ObjectStore`] trait, the narrow surface hoard
//! needs from an S3-compatible service: upload an object in one request,
//! upload it in parts, and read back the checksum the store computed.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::{CORRUPT_CHECKSUM, MockBackend, StoredObject};
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Streaming source for multipart uploads.
pub type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// Unified interface for object stores.
///
/// # Checksums
/// Stores report checksums the way S3 reports an `ETag`: wrapped in double
/// quotes. Implementations return them verbatim; use [`quote_checksum()`] to
/// bring a locally computed checksum into the same form before comparing.
///
/// # Examples
///
/// ```
/// use hoard_storage::backend::{ObjectStore, quote_checksum};
/// use hoard_storage::error::Result;
///
/// async fn upload_verified(store: &dyn ObjectStore, key: &str, data: Vec<u8>, local: &str) -> Result<bool> {
///     let remote = store.put_object(key, data).await?;
///     Ok(remote == quote_checksum(local))
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Store `data` under `key` in a single request.
    ///
    /// Returns the checksum reported by the store, still quoted.
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<String>;

    /// Store the whole of `reader` under `key`, split into parts of
    /// `part_size` bytes (the last part may be shorter).
    ///
    /// Nothing is returned; fetch the resulting checksum with
    /// [`head_object()`](Self::head_object).
    async fn multipart_upload(&self, key: &str, reader: BoxAsyncRead, part_size: u64) -> Result<()>;

    /// Checksum of the object stored under `key`, still quoted.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if there is no
    /// such object.
    async fn head_object(&self, key: &str) -> Result<String>;
}

/// Wrap a checksum in the double quotes object stores report it with.
pub fn quote_checksum(checksum: &str) -> String {
    format!("\"{checksum}\"")
}

/// Strip surrounding double quotes, if present.
pub fn unquote_checksum(checksum: &str) -> &str {
    checksum
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_checksum("abc-2"), "\"abc-2\"");
        assert_eq!(unquote_checksum("\"abc-2\""), "abc-2");
        assert_eq!(unquote_checksum("abc"), "abc");
        assert_eq!(unquote_checksum("\"abc"), "\"abc");
        assert_eq!(unquote_checksum(&quote_checksum("d41d8cd98f00b204e9800998ecf8427e")), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
