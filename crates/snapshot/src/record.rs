//! Tracked file records.
//!
//! A [`FileRecord`] is either [`Unhashed`] (metadata only, straight out of a
//! walk or a diff) or [`Fingerprinted`] (content digests and storage key
//! attached). The typestate keeps the hash fields all-or-nothing: there is no
//! way to hold a record with a checksum but no storage key.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use hoard_hash::{Digests, STRONG_LEN};
use std::fmt::Debug;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Bit mask for the file type portion of a Unix mode.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFSOCK: u32 = 0o140_000;
pub const S_IFLNK: u32 = 0o120_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFBLK: u32 = 0o060_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFCHR: u32 = 0o020_000;
pub const S_IFIFO: u32 = 0o010_000;

/// Filesystem metadata of a tracked entry.
///
/// Equality and hashing cover every field; this is exactly the comparison
/// used to decide whether a file changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileMeta {
    /// Path relative to the snapshot root
    pub path: PathBuf,
    /// Unix mode: type bits plus permissions
    pub mode: u32,
    /// Size in bytes
    pub size: u64,
    /// Last modification, Unix seconds
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
    /// Target of a symbolic link; `None` for everything else
    pub link_target: Option<PathBuf>,
}
impl FileMeta {
    #[inline]
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    #[inline]
    pub fn permissions(&self) -> u32 {
        self.mode & !S_IFMT
    }

    #[inline]
    pub fn is_regular(&self) -> bool {
        self.file_type() == S_IFREG
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Modification time, or `None` if it is out of range.
    pub fn modified(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.mtime).ok()
    }
}

/// Content fingerprint of a regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-512 of the namespaced content
    pub strong: [u8; STRONG_LEN],
    /// XXH64 of the namespaced content
    pub fast: u64,
    /// Checksum the object store is expected to report
    pub checksum: String,
    /// Key the content is stored under
    pub storage_key: String,
}
impl TryFrom<Digests> for Fingerprint {
    type Error = crate::error::Error;

    fn try_from(digests: Digests) -> Result<Self> {
        let storage_key = digests.storage_key().or_raise(|| ErrorKind::Fingerprint)?;
        let Digests { strong, fast, checksum } = digests;
        Ok(Self {
            strong,
            fast,
            checksum,
            storage_key,
        })
    }
}

mod sealed {
    pub trait Sealed {}
}
pub trait HashState: sealed::Sealed {
    type Hash: Debug + Clone + PartialEq + Eq;
}

/// Metadata only; no content has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unhashed;
impl sealed::Sealed for Unhashed {}
impl HashState for Unhashed {
    type Hash = ();
}

/// Content digests and storage key are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprinted;
impl sealed::Sealed for Fingerprinted {}
impl HashState for Fingerprinted {
    type Hash = Fingerprint;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord<S: HashState = Unhashed> {
    meta: FileMeta,
    pub fingerprint: S::Hash,
}
impl<S: HashState> FileRecord<S> {
    // Explicit version of self.deref()
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn into_meta(self) -> FileMeta {
        self.meta
    }

    /// Drop any fingerprint, keeping the metadata.
    pub fn strip_fingerprint(self) -> FileRecord<Unhashed> {
        self.meta.into()
    }

    /// Resolve the record's path against the snapshot root.
    pub fn absolute_path(&self, root: &Path) -> PathBuf {
        root.join(&self.meta.path)
    }
}
impl<S: HashState> Deref for FileRecord<S> {
    type Target = FileMeta;
    fn deref(&self) -> &FileMeta {
        &self.meta
    }
}

impl FileRecord {
    pub fn new(meta: FileMeta) -> Self {
        meta.into()
    }

    pub fn with_fingerprint(self, fingerprint: Fingerprint) -> FileRecord<Fingerprinted> {
        FileRecord {
            meta: self.meta,
            fingerprint,
        }
    }
}
impl From<FileMeta> for FileRecord<Unhashed> {
    fn from(meta: FileMeta) -> Self {
        Self { meta, fingerprint: () }
    }
}

impl FileRecord<Fingerprinted> {
    pub fn storage_key(&self) -> &str {
        &self.fingerprint.storage_key
    }

    pub fn checksum(&self) -> &str {
        &self.fingerprint.checksum
    }
}
