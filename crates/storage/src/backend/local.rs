//! Local filesystem object store.
//!
//! Objects are plain files under `<root>/objects/`. The checksum an S3
//! service would have reported is computed while the object is written and
//! kept in a sidecar file under `<root>/checksums/`, so
//! [`head_object()`](ObjectStore::head_object) never has to re-read the data.
//!
//! Both are written to `<root>/staging/` first and renamed into place, so an
//! upload that fails or is dropped part-way never touches a stored object.

use crate::backend::{BoxAsyncRead, ObjectStore, quote_checksum};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_key;
use async_trait::async_trait;
use hoard_hash::MultipartChecksum;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const OBJECTS_DIR: &str = "objects";
const CHECKSUMS_DIR: &str = "checksums";
const STAGING_DIR: &str = "staging";
const READ_BUFFER: usize = 64 * 1024;

/// Local filesystem object store.
///
/// Useful for backing up to a mounted disk, and as a stand-in for a real
/// bucket when trying hoard out.
///
/// # Examples
///
/// ```no_run
/// use hoard_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("usb-disk", "/mnt/backup/hoard")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local object store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let invalid = || ErrorKind::BackendError(format!("object store root must be an absolute directory: {}", root.display()));
        if !root.is_absolute() {
            exn::bail!(invalid());
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(invalid());
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root.to_string_lossy()))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(OBJECTS_DIR).join(validate_key(key)?))
    }

    fn checksum_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(CHECKSUMS_DIR).join(validate_key(key)?))
    }

    async fn create_parent(path: &Path, key: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, key))?;
        }
        Ok(())
    }

    /// A new file under the staging directory, deleted when dropped unless
    /// [`persist()`](Self::persist)ed.
    async fn stage(&self, key: &str) -> Result<(NamedTempFile, fs::File)> {
        let dir = self.root.join(STAGING_DIR);
        fs::create_dir_all(&dir).await.map_err(|e| ErrorKind::from_io(e, key))?;
        let staged = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&dir)
            .map_err(|e| ErrorKind::from_io(e, key))?;
        let file = staged.reopen().map_err(|e| ErrorKind::from_io(e, key))?;
        Ok((staged, fs::File::from_std(file)))
    }

    /// Atomically move a staged file to `path`.
    async fn persist(staged: NamedTempFile, path: &Path, key: &str) -> Result<()> {
        Self::create_parent(path, key).await?;
        staged.persist(path).map_err(|e| ErrorKind::from_io(e.error, key))?;
        Ok(())
    }

    /// Move the staged object into place, then its checksum sidecar.
    async fn install(&self, key: &str, staged: NamedTempFile, checksum: &str) -> Result<()> {
        let (sidecar, mut file) = self.stage(key).await?;
        file.write_all(quote_checksum(checksum).as_bytes()).await.map_err(|e| ErrorKind::from_io(e, key))?;
        file.flush().await.map_err(|e| ErrorKind::from_io(e, key))?;
        drop(file);
        Self::persist(staged, &self.object_path(key)?, key).await?;
        Self::persist(sidecar, &self.checksum_path(key)?, key).await
    }
}

#[async_trait]
impl ObjectStore for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<String> {
        validate_key(key)?;
        // A part at least as large as the object: always the single-part form.
        let mut checksum = MultipartChecksum::new((data.len() as u64).max(1));
        checksum.update(&data);
        let checksum = checksum.sum();

        let (staged, mut file) = self.stage(key).await?;
        file.write_all(&data).await.map_err(|e| ErrorKind::from_io(e, key))?;
        file.flush().await.map_err(|e| ErrorKind::from_io(e, key))?;
        drop(file);
        self.install(key, staged, &checksum).await?;
        tracing::debug!(backend = %self.name, key, bytes = data.len(), "stored object");
        Ok(quote_checksum(&checksum))
    }

    async fn multipart_upload(&self, key: &str, mut reader: BoxAsyncRead, part_size: u64) -> Result<()> {
        if part_size == 0 {
            exn::bail!(ErrorKind::BackendError("multipart part size must be non-zero".to_string()));
        }
        validate_key(key)?;
        let (staged, mut file) = self.stage(key).await?;
        let mut checksum = MultipartChecksum::new(part_size);
        let mut buffer = vec![0u8; READ_BUFFER];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buffer).await.map_err(ErrorKind::Io)?;
            if n == 0 {
                break;
            }
            checksum.update(&buffer[..n]);
            file.write_all(&buffer[..n]).await.map_err(|e| ErrorKind::from_io(e, key))?;
            written += n as u64;
        }
        file.flush().await.map_err(|e| ErrorKind::from_io(e, key))?;
        drop(file);
        self.install(key, staged, &checksum.sum()).await?;
        tracing::debug!(backend = %self.name, key, bytes = written, part_size, "stored multipart object");
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<String> {
        let path = self.checksum_path(key)?;
        Ok(fs::read_to_string(&path).await.map_err(|e| ErrorKind::from_io(e, key))?)
    }
}
