//! In-memory object store for testing.

use crate::backend::{BoxAsyncRead, ObjectStore, quote_checksum};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_key;
use async_trait::async_trait;
use hoard_hash::MultipartChecksum;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, RwLock};

type Predicate = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Checksum reported for objects selected by [`MockBackend::corrupt_when`].
pub const CORRUPT_CHECKSUM: &str = "00000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    /// Quoted, as it would be reported by the store
    pub checksum: String,
    pub multipart: bool,
}

/// In-memory object store for testing.
///
/// Objects are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Checksums are
/// computed the way S3 computes them, and can be deliberately corrupted or
/// uploads made to fail for selected content.
///
/// # Examples
///
/// ```
/// use hoard_storage::backend::{MockBackend, ObjectStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::default().corrupt_when(|data| data.starts_with(b"bad"));
/// let good = backend.put_object("one", b"abcd".to_vec()).await?;
/// assert_eq!(good, "\"e2fc714c4727ee9395f324cd2e7f331f\"");
/// let bad = backend.put_object("two", b"bad data".to_vec()).await?;
/// assert_eq!(bad, "\"00000000000000000000000000000000\"");
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<String, StoredObject>>,
    corrupt: Option<Predicate>,
    fail: Option<Predicate>,
    pause: Option<(Predicate, Arc<Notify>)>,
    requests: AtomicUsize,
}

impl MockBackend {
    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Report [`CORRUPT_CHECKSUM`] instead of the real checksum for any
    /// object whose content matches `predicate`.
    pub fn corrupt_when(mut self, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.corrupt = Some(Box::new(predicate));
        self
    }

    /// Fail the upload of any object whose content matches `predicate`.
    pub fn fail_when(mut self, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.fail = Some(Box::new(predicate));
        self
    }

    /// Hold any upload whose content matches `predicate` until `release`
    /// is notified; each notification lets one held upload through.
    pub fn pause_when(mut self, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static, release: Arc<Notify>) -> Self {
        self.pause = Some((Box::new(predicate), release));
        self
    }

    /// Snapshot of a stored object.
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.storage.read().await.get(key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    /// Number of upload requests received, including failed ones.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    async fn store(&self, key: &str, data: Vec<u8>, part_size: u64, multipart: bool) -> Result<String> {
        validate_key(key)?;
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail.as_ref().is_some_and(|fail| fail(&data)) {
            exn::bail!(ErrorKind::Network(format!("injected failure uploading {key}")));
        }
        if let Some((pause, release)) = &self.pause
            && pause(&data)
        {
            release.notified().await;
        }
        let checksum = match self.corrupt.as_ref().is_some_and(|corrupt| corrupt(&data)) {
            true => CORRUPT_CHECKSUM.to_string(),
            false => {
                let mut checksum = MultipartChecksum::new(part_size);
                checksum.update(&data);
                checksum.sum()
            },
        };
        let checksum = quote_checksum(&checksum);
        let object = StoredObject {
            data,
            checksum: checksum.clone(),
            multipart,
        };
        self.storage.write().await.insert(key.to_string(), object);
        Ok(checksum)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(HashMap::new()),
            corrupt: None,
            fail: None,
            pause: None,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<String> {
        let part_size = (data.len() as u64).max(1);
        self.store(key, data, part_size, false).await
    }

    async fn multipart_upload(&self, key: &str, mut reader: BoxAsyncRead, part_size: u64) -> Result<()> {
        if part_size == 0 {
            exn::bail!(ErrorKind::BackendError("multipart part size must be non-zero".to_string()));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.map_err(ErrorKind::Io)?;
        self.store(key, data, part_size, true).await?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<String> {
        let storage = self.storage.read().await;
        let object = storage.get(key).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))?;
        Ok(object.checksum.clone())
    }
}
