//! Directory traversal.
//!
//! The walker reads metadata only; file content is never opened. Symbolic
//! links are recorded, not followed.

use crate::error::{ErrorKind, Result};
use crate::record::{FileMeta, FileRecord};
use crate::snapshot::Snapshot;
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, DirEntry};
use tracing::instrument;

pub type FileRecordStream<'a> = Pin<Box<dyn Stream<Item = Result<FileRecord>> + Send + 'a>>;

enum WalkEntry {
    Record(FileRecord),
    Descend(PathBuf),
}

/// Enumerates every non-directory entry beneath a root directory.
#[derive(Debug, Clone)]
pub struct SnapshotWalker {
    root: PathBuf,
    capacity: usize,
}

impl SnapshotWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity: 0,
        }
    }

    /// Pre-allocate room for this many records in [`walk()`](Self::walk).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and collect the records, in traversal order.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn walk(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::with_capacity(self.capacity);
        let mut records = self.walk_stream();
        while let Some(record) = records.try_next().await? {
            snapshot.push(record);
        }
        tracing::info!(count = snapshot.len(), bytes = snapshot.total_size(), "walked snapshot root");
        Ok(snapshot)
    }

    /// Stream one record per non-directory entry.
    ///
    /// Directories produce no record but their contents are visited. Record
    /// paths are relative to the root. The first error ends the stream.
    pub fn walk_stream(&self) -> FileRecordStream<'_> {
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                        return;
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                            return;
                        }
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::Record(record)) => yield Ok(record),
                        Ok(WalkEntry::Descend(dir)) => stack.push(dir),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        // DirEntry::metadata does not traverse symlinks.
        let metadata = entry.metadata().await.map_err(|e| ErrorKind::from_io(e, &path))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        let relative = path
            .strip_prefix(&self.root)
            .or_raise(|| ErrorKind::OutsideRoot(path.clone()))?
            .to_path_buf();
        let link_target = match metadata.file_type().is_symlink() {
            true => Some(fs::read_link(&path).await.or_raise(|| ErrorKind::LinkTarget(path.clone()))?),
            false => None,
        };
        tracing::trace!(path = %relative.display(), size = metadata.len(), "walked entry");
        Ok(WalkEntry::Record(file_meta(relative, &metadata, link_target).into()))
    }
}

#[cfg(unix)]
fn file_meta(path: PathBuf, metadata: &Metadata, link_target: Option<PathBuf>) -> FileMeta {
    use std::os::unix::fs::MetadataExt;
    FileMeta {
        path,
        mode: metadata.mode(),
        size: metadata.size(),
        mtime: metadata.mtime(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        link_target,
    }
}

// Synthesised mode bits; ownership is not available.
#[cfg(not(unix))]
fn file_meta(path: PathBuf, metadata: &Metadata, link_target: Option<PathBuf>) -> FileMeta {
    use crate::record::{S_IFLNK, S_IFREG};
    let file_type = metadata.file_type();
    let mode = match (file_type.is_symlink(), metadata.permissions().readonly()) {
        (true, _) => S_IFLNK | 0o777,
        (false, true) => S_IFREG | 0o444,
        (false, false) => S_IFREG | 0o644,
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_secs() as i64);
    FileMeta {
        path,
        mode,
        size: metadata.len(),
        mtime,
        uid: 0,
        gid: 0,
        link_target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_walk_nested_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "top.txt", b"top");
        write(temp_dir.path(), "a/one.txt", b"one");
        write(temp_dir.path(), "a/b/c/deep.bin", &[0u8; 1024]);
        std::fs::create_dir_all(temp_dir.path().join("empty/dir")).unwrap();

        let mut snapshot = SnapshotWalker::new(temp_dir.path()).with_capacity(8).walk().await.unwrap();
        snapshot.sort_by_path();
        let paths: Vec<&Path> = snapshot.iter().map(|r| r.path.as_path()).collect();
        assert_eq!(paths, [Path::new("a/b/c/deep.bin"), Path::new("a/one.txt"), Path::new("top.txt")]);
        assert_eq!(snapshot.total_size(), 1030);
        assert!(snapshot.iter().all(|r| r.is_regular() && r.link_target.is_none()));
    }

    #[tokio::test]
    async fn test_walk_empty_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotWalker::new(temp_dir.path()).walk().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_walk_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = SnapshotWalker::new(&missing).walk().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(p) if p == &missing));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_records_metadata() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "file", b"hello");
        let path = temp_dir.path().join("file");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();
        let expected = std::fs::metadata(&path).unwrap();

        let snapshot = SnapshotWalker::new(temp_dir.path()).walk().await.unwrap();
        let record = &snapshot[0];
        assert_eq!(record.path, Path::new("file"));
        assert_eq!(record.size, 5);
        assert_eq!(record.permissions(), 0o640);
        assert!(record.is_regular());
        assert_eq!(record.mtime, expected.mtime());
        assert_eq!(record.uid, expected.uid());
        assert_eq!(record.gid, expected.gid());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_records_symlinks_without_following() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "dir/target.txt", b"content");
        std::os::unix::fs::symlink("dir/target.txt", temp_dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink("dir", temp_dir.path().join("dirlink")).unwrap();
        std::os::unix::fs::symlink("missing", temp_dir.path().join("dangling")).unwrap();

        let snapshot = SnapshotWalker::new(temp_dir.path()).walk().await.unwrap();
        let links: HashSet<(PathBuf, PathBuf)> = snapshot
            .iter()
            .filter(|r| r.is_symlink())
            .map(|r| (r.path.clone(), r.link_target.clone().unwrap()))
            .collect();
        assert_eq!(
            links,
            HashSet::from([
                (PathBuf::from("link"), PathBuf::from("dir/target.txt")),
                (PathBuf::from("dirlink"), PathBuf::from("dir")),
                (PathBuf::from("dangling"), PathBuf::from("missing")),
            ])
        );
        // The linked directory is not descended into a second time.
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_walk_stream_yields_incrementally() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a", b"1");
        write(temp_dir.path(), "b", b"2");
        let walker = SnapshotWalker::new(temp_dir.path());
        let records: Vec<FileRecord> = walker.walk_stream().try_collect().await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
