//! Point-in-time snapshots of a directory tree.
//!
//! [`SnapshotWalker`] produces a [`Snapshot`] of metadata-only
//! [`FileRecord`]s, and [`difference()`] narrows a fresh snapshot down to the
//! records that are new or changed since a previous one. Nothing here reads
//! file content; fingerprints are attached later by turning an [`Unhashed`]
//! record into a [`Fingerprinted`] one.

mod diff;
pub mod error;
mod record;
mod snapshot;
mod walk;

pub use crate::diff::difference;
pub use crate::record::{
    FileMeta, FileRecord, Fingerprint, Fingerprinted, HashState, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT,
    S_IFREG, S_IFSOCK, Unhashed,
};
pub use crate::snapshot::Snapshot;
pub use crate::walk::{FileRecordStream, SnapshotWalker};
