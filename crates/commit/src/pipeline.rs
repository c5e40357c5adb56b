//! Bounded-concurrency fingerprint-and-upload pipeline.
//!
//! Every regular file handed to [`UploadPipeline::run()`] goes through the
//! same three steps, strictly in order:
//!
//! 1. hash the content (one read pass, on the blocking pool) and derive the
//!    storage key,
//! 2. upload it: a single `PutObject` when it fits in one part, a multipart
//!    upload followed by a `HeadObject` otherwise,
//! 3. compare the checksum the store reports with the one computed locally.
//!
//! Files are independent of each other and complete in any order. The first
//! file to fail cancels the rest of the run, and that failure is what the
//! caller gets back. Cancellation stops new files from being admitted; files
//! already in flight finish, and their results are discarded.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use hoard_hash::{DEFAULT_PART_SIZE, Digests, HashBundle, namespace_prefix};
use hoard_snapshot::{FileRecord, Fingerprint, Fingerprinted};
use hoard_storage::{BackendHandle, quote_checksum, unquote_checksum};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Number of workers used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Write-once slot: the first error stored wins, later ones are logged and
/// dropped.
#[derive(Default)]
struct FirstError(Mutex<Option<Error>>);

impl FirstError {
    fn set(&self, err: Error) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            None => *slot = Some(err),
            Some(_) => {
                let kind: &ErrorKind = &err;
                tracing::debug!(error = %kind, "discarding error raised after the first failure");
            },
        }
    }

    fn take(&self) -> Option<Error> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Everything one work unit needs; cloned into each task.
#[derive(Clone)]
struct Worker {
    store: BackendHandle,
    root: Arc<Path>,
    namespace: Arc<str>,
    part_size: u64,
    verbose: bool,
}

impl Worker {
    #[instrument(level = "debug", skip_all, fields(path = %record.path.display(), size = record.size))]
    async fn process(self, record: FileRecord) -> Result<FileRecord<Fingerprinted>> {
        let absolute = record.absolute_path(&self.root);
        let fingerprint = self.fingerprint(&record, absolute.clone()).await?;
        let key = fingerprint.storage_key.as_str();

        let remote = self.upload(&record, &absolute, key).await?;
        if remote != quote_checksum(&fingerprint.checksum) {
            exn::bail!(ErrorKind::ChecksumMismatch {
                key: key.to_string(),
                local: fingerprint.checksum.clone(),
                remote: unquote_checksum(&remote).to_string(),
            });
        }

        let store = self.store.name();
        match self.verbose {
            true => tracing::info!(path = %record.path.display(), store, key, "uploaded"),
            false => tracing::debug!(path = %record.path.display(), store, key, "uploaded"),
        }
        Ok(record.with_fingerprint(fingerprint))
    }

    async fn fingerprint(&self, record: &FileRecord, absolute: PathBuf) -> Result<Fingerprint> {
        let failed = || ErrorKind::Fingerprint(record.path.clone());
        let prefix = namespace_prefix(&self.namespace, record.size);
        let part_size = self.part_size;
        let digests = tokio::task::spawn_blocking(move || -> hoard_hash::error::Result<Digests> {
            let file = std::fs::File::open(&absolute).map_err(hoard_hash::error::ErrorKind::Io)?;
            HashBundle::new(part_size).hash(&prefix, file)
        })
        .await
        .or_raise(|| ErrorKind::Worker)?
        .or_raise(failed)?;
        Fingerprint::try_from(digests).or_raise(failed)
    }

    /// Upload the file and return the checksum the store reports, quoted.
    async fn upload(&self, record: &FileRecord, absolute: &Path, key: &str) -> Result<String> {
        let failed = || ErrorKind::Upload {
            key: key.to_string(),
            path: record.path.clone(),
        };
        if record.size > self.part_size {
            let file = fs::File::open(absolute).await.or_raise(failed)?;
            self.store.multipart_upload(key, Box::new(file), self.part_size).await.or_raise(failed)?;
            self.store.head_object(key).await.or_raise(failed)
        } else {
            let data = fs::read(absolute).await.or_raise(failed)?;
            self.store.put_object(key, data).await.or_raise(failed)
        }
    }
}

/// Fingerprints and uploads files with at most `max_workers` in flight.
///
/// # Examples
///
/// ```no_run
/// use hoard_commit::UploadPipeline;
/// use hoard_snapshot::SnapshotWalker;
/// use hoard_storage::{BackendHandle, backend::LocalBackend};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store: BackendHandle = Arc::new(LocalBackend::new("disk", "/mnt/backup")?);
/// let pipeline = UploadPipeline::new(store, "/home/me/photos", "photos").with_max_workers(4);
/// let snapshot = SnapshotWalker::new("/home/me/photos").walk().await?;
/// let uploaded = pipeline.run(&CancellationToken::new(), snapshot).await?;
/// println!("uploaded {} files", uploaded.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UploadPipeline {
    worker: Worker,
    max_workers: usize,
}

impl UploadPipeline {
    /// A pipeline uploading files below `root` into `store`, namespaced by
    /// the repository name `namespace`.
    ///
    /// Defaults to [`DEFAULT_PART_SIZE`] and one worker per available CPU.
    pub fn new(store: BackendHandle, root: impl AsRef<Path>, namespace: impl AsRef<str>) -> Self {
        Self {
            worker: Worker {
                store,
                root: Arc::from(root.as_ref()),
                namespace: Arc::from(namespace.as_ref()),
                part_size: DEFAULT_PART_SIZE,
                verbose: false,
            },
            max_workers: default_workers(),
        }
    }

    /// Part size for both the local checksum and multipart uploads. Files
    /// larger than this are uploaded in parts. Zero keeps the default.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.worker.part_size = match part_size {
            0 => DEFAULT_PART_SIZE,
            size => size,
        };
        self
    }

    /// Maximum number of files processed at once. Zero means one per
    /// available CPU.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = match max_workers {
            0 => default_workers(),
            workers => workers,
        };
        self
    }

    /// Log every upload at INFO instead of DEBUG.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.worker.verbose = verbose;
        self
    }

    pub fn root(&self) -> &Path {
        &self.worker.root
    }

    pub fn part_size(&self) -> u64 {
        self.worker.part_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Fingerprint and upload every regular file in `files`.
    ///
    /// Records that are not regular files are skipped. On success, returns
    /// the uploaded records with their fingerprints attached, in completion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns the first per-file error ([`Fingerprint`](ErrorKind::Fingerprint),
    /// [`Upload`](ErrorKind::Upload) or
    /// [`ChecksumMismatch`](ErrorKind::ChecksumMismatch)), once every task
    /// already started has finished. Returns
    /// [`Cancelled`](ErrorKind::Cancelled) only if `cancel` fired and no file
    /// failed.
    #[instrument(skip_all, fields(store = %self.worker.store.name(), workers = self.max_workers, candidates = tracing::field::Empty))]
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        files: impl IntoIterator<Item = FileRecord>,
    ) -> Result<Vec<FileRecord<Fingerprinted>>> {
        let token = cancel.child_token();
        let gate = Arc::new(Semaphore::new(self.max_workers));
        let first_error = Arc::new(FirstError::default());
        let mut tasks = JoinSet::new();
        let mut candidates = 0usize;

        for record in files {
            if !record.is_regular() {
                tracing::trace!(path = %record.path.display(), "skipping non-regular file");
                continue;
            }
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            candidates += 1;
            let worker = self.worker.clone();
            let token = token.clone();
            let first_error = first_error.clone();
            // Once admitted, a unit always runs to completion: dropping it
            // part-way could leave a half-written object behind.
            tasks.spawn(async move {
                let _permit = permit;
                match worker.process(record).await {
                    Ok(_) if token.is_cancelled() => None,
                    Ok(uploaded) => Some(uploaded),
                    Err(err) => {
                        first_error.set(err);
                        token.cancel();
                        None
                    },
                }
            });
        }
        tracing::Span::current().record("candidates", candidates);

        let mut uploaded = Vec::with_capacity(candidates);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(record)) => uploaded.push(record),
                Ok(None) => {},
                Err(join_err) => {
                    first_error.set(exn::Exn::from(join_err).raise(ErrorKind::Worker));
                    token.cancel();
                },
            }
        }

        if let Some(err) = first_error.take() {
            return Err(err);
        }
        if token.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        tracing::debug!(uploaded = uploaded.len(), "upload pipeline finished");
        Ok(uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_snapshot::{Snapshot, SnapshotWalker};
    use hoard_storage::backend::{CORRUPT_CHECKSUM, MockBackend};
    use hoard_storage::ObjectStore;
    use std::collections::HashSet;
    use tokio::sync::Notify;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn snapshot(root: &Path) -> Snapshot {
        let mut snapshot = SnapshotWalker::new(root).walk().await.unwrap();
        snapshot.sort_by_path();
        snapshot
    }

    fn pipeline(store: &Arc<MockBackend>, root: &Path) -> UploadPipeline {
        UploadPipeline::new(store.clone(), root, "repo").with_part_size(1024).with_max_workers(2)
    }

    #[tokio::test]
    async fn test_uploads_every_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "one", b"first file");
        write(temp_dir.path(), "sub/two", b"second file");
        write(temp_dir.path(), "sub/deeper/three", b"third file");
        let store = Arc::new(MockBackend::default());

        let uploaded = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        assert_eq!(uploaded.len(), 3);
        assert_eq!(store.len().await, 3);
        for record in &uploaded {
            let object = store.object(record.storage_key()).await.unwrap();
            assert_eq!(object.data, std::fs::read(temp_dir.path().join(&record.path)).unwrap());
            assert_eq!(object.checksum, quote_checksum(record.checksum()));
            assert!(!object.multipart);
        }
    }

    #[tokio::test]
    async fn test_fingerprint_matches_hash_bundle() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "file", b"hello world");
        let store = Arc::new(MockBackend::default());
        let uploaded = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();

        let expected = HashBundle::new(1024).hash(&namespace_prefix("repo", 11), &b"hello world"[..]).unwrap();
        assert_eq!(uploaded[0].fingerprint.strong, expected.strong);
        assert_eq!(uploaded[0].fingerprint.fast, expected.fast);
        assert_eq!(uploaded[0].storage_key(), expected.storage_key().unwrap());
        assert_eq!(uploaded[0].checksum(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[rstest::rstest]
    #[case::below(1023, false)]
    #[case::exactly(1024, false)]
    #[case::above(1025, true)]
    #[case::several_parts(5000, true)]
    #[tokio::test]
    async fn test_multipart_threshold(#[case] size: usize, #[case] multipart: bool) {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "file", &vec![0x5a; size]);
        let store = Arc::new(MockBackend::default());
        let uploaded = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        let object = store.object(uploaded[0].storage_key()).await.unwrap();
        assert_eq!(object.multipart, multipart);
        assert_eq!(uploaded[0].checksum().contains('-'), multipart);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_returned_not_cancellation() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a", b"first");
        write(temp_dir.path(), "b", b"second");
        write(temp_dir.path(), "c", b"third");
        let store = Arc::new(MockBackend::default().corrupt_when(|data| data == b"second"));
        let pipeline = pipeline(&store, temp_dir.path()).with_max_workers(1);

        let err = pipeline.run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap_err();
        match &*err {
            ErrorKind::ChecksumMismatch { key, local, remote } => {
                let expected = HashBundle::new(1024).hash(&namespace_prefix("repo", 6), &b"second"[..]).unwrap();
                assert_eq!(key, &expected.storage_key().unwrap());
                assert_eq!(local, &expected.checksum);
                assert_eq!(remote, CORRUPT_CHECKSUM);
            },
            other => panic!("expected a checksum mismatch, got {other}"),
        }
        assert!(store.requests() >= 2);
    }

    #[tokio::test]
    async fn test_multipart_mismatch_detected_by_head() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "big", &vec![1u8; 4096]);
        let store = Arc::new(MockBackend::default().corrupt_when(|data| data.len() == 4096));
        let err = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_upload_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "fine", b"fine");
        write(temp_dir.path(), "doomed", b"doomed");
        let store = Arc::new(MockBackend::default().fail_when(|data| data == b"doomed"));
        let err = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Upload { path, .. } if path == Path::new("doomed")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_file_fails_fingerprint() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "gone", b"soon");
        let snapshot = snapshot(temp_dir.path()).await;
        std::fs::remove_file(temp_dir.path().join("gone")).unwrap();
        let store = Arc::new(MockBackend::default());
        let err = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fingerprint(path) if path == Path::new("gone")));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a", b"a");
        let store = Arc::new(MockBackend::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline(&store, temp_dir.path()).run(&cancel, snapshot(temp_dir.path()).await).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(store.requests(), 0);
    }

    /// Wait until `count` uploads have reached the store, then give any
    /// finished tasks a chance to be joined.
    async fn wait_for_requests(store: &MockBackend, count: usize) {
        while store.requests() < count {
            tokio::task::yield_now().await;
        }
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_failure_lets_in_flight_upload_finish() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "doomed", b"doomed");
        write(temp_dir.path(), "slow", b"slow");
        write(temp_dir.path(), "waiting", b"waiting");
        let release = Arc::new(Notify::new());
        let store = Arc::new(
            MockBackend::default()
                .fail_when(|data| data == b"doomed")
                .pause_when(|data| data == b"slow", release.clone()),
        );
        let pipeline = pipeline(&store, temp_dir.path());
        let files = snapshot(temp_dir.path()).await;
        let run = tokio::spawn(async move { pipeline.run(&CancellationToken::new(), files).await });

        // "doomed" failed and "slow" is held by the store; "waiting" was
        // never admitted.
        wait_for_requests(&store, 2).await;
        assert!(!run.is_finished());
        assert!(store.is_empty().await);

        release.notify_one();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Upload { path, .. } if path == Path::new("doomed")));
        let slow = store.object(&HashBundle::new(1024).hash(&namespace_prefix("repo", 4), &b"slow"[..]).unwrap().storage_key().unwrap()).await;
        assert_eq!(slow.unwrap().data, b"slow");
        assert_eq!(store.len().await, 1);
        assert_eq!(store.requests(), 2);
    }

    #[tokio::test]
    async fn test_caller_cancel_discards_in_flight_result() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "slow", b"slow");
        let release = Arc::new(Notify::new());
        let store = Arc::new(MockBackend::default().pause_when(|_| true, release.clone()));
        let pipeline = pipeline(&store, temp_dir.path());
        let files = snapshot(temp_dir.path()).await;
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { pipeline.run(&cancel, files).await }
        });

        wait_for_requests(&store, 1).await;
        cancel.cancel();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(!run.is_finished());

        release.notify_one();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_caller_token() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "a", b"a");
        let store = Arc::new(MockBackend::default().fail_when(|_| true));
        let cancel = CancellationToken::new();
        assert!(pipeline(&store, temp_dir.path()).run(&cancel, snapshot(temp_dir.path()).await).await.is_err());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_identical_content_shares_a_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "copy1", b"same bytes");
        write(temp_dir.path(), "copy2", b"same bytes");
        let store = Arc::new(MockBackend::default());
        let uploaded = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        let keys: HashSet<&str> = uploaded.iter().map(|r| r.storage_key()).collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(store.len().await, 1);

        let other = UploadPipeline::new(store.clone(), temp_dir.path(), "other-repo").with_part_size(1024);
        let elsewhere = other.run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        assert!(!keys.contains(elsewhere[0].storage_key()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_regular_files_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "real", b"content");
        std::os::unix::fs::symlink("real", temp_dir.path().join("link")).unwrap();
        let store = Arc::new(MockBackend::default());
        let uploaded = pipeline(&store, temp_dir.path()).run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].path, Path::new("real"));
        assert_eq!(store.requests(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_files_many_workers() {
        let temp_dir = tempfile::tempdir().unwrap();
        for i in 0..40 {
            write(temp_dir.path(), &format!("dir{}/file{i}", i % 4), format!("content {i}").repeat(i + 1).as_bytes());
        }
        let store = Arc::new(MockBackend::default());
        let pipeline = pipeline(&store, temp_dir.path()).with_max_workers(8);
        let uploaded = pipeline.run(&CancellationToken::new(), snapshot(temp_dir.path()).await).await.unwrap();
        assert_eq!(uploaded.len(), 40);
        assert_eq!(store.len().await, 40);
        assert_eq!(store.name(), "mock");
    }

    #[test]
    fn test_defaults() {
        let store: BackendHandle = Arc::new(MockBackend::default());
        let pipeline = UploadPipeline::new(store, "/", "repo").with_max_workers(0).with_part_size(0);
        assert_eq!(pipeline.max_workers(), default_workers());
        assert_eq!(pipeline.part_size(), DEFAULT_PART_SIZE);
        assert!(pipeline.max_workers() >= 1);
    }
}
