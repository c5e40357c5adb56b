use crate::error::{ErrorKind, Result};
use crate::pipeline::UploadPipeline;
use exn::ResultExt;
use hoard_snapshot::{FileRecord, Fingerprinted, HashState, Snapshot, SnapshotWalker, difference};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Outcome of one [`Repository::commit()`].
#[derive(Debug, Clone)]
pub struct CommitSummary {
    /// Everything found in the work directory, sorted by path
    pub snapshot: Snapshot,
    /// Files that were new or changed, with their fingerprints
    pub uploads: Vec<FileRecord<Fingerprinted>>,
    /// New or changed entries that are not regular files (never uploaded)
    pub skipped: usize,
    /// Entries identical to the previous snapshot
    pub unchanged: usize,
    /// Sum of the sizes of every entry in the snapshot
    pub total_bytes: u64,
}

impl CommitSummary {
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploads.iter().map(|record| record.size).sum()
    }
}

/// A work directory being backed up through an [`UploadPipeline`].
#[derive(Clone)]
pub struct Repository {
    pipeline: UploadPipeline,
    capacity: usize,
}

impl Repository {
    /// The work directory is the pipeline's root.
    pub fn new(pipeline: UploadPipeline) -> Self {
        Self { pipeline, capacity: 0 }
    }

    /// Expected number of files, used to pre-allocate the snapshot.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    /// Snapshot the work directory and upload whatever changed since
    /// `previous`. Pass an empty slice for the first commit.
    #[instrument(skip_all, fields(root = %self.pipeline.root().display()))]
    pub async fn commit<S: HashState>(&self, cancel: &CancellationToken, previous: &[FileRecord<S>]) -> Result<CommitSummary> {
        let mut snapshot = SnapshotWalker::new(self.pipeline.root())
            .with_capacity(self.capacity)
            .walk()
            .await
            .or_raise(|| ErrorKind::Snapshot)?;
        snapshot.sort_by_path();
        let total_bytes = snapshot.total_size();
        tracing::info!(count = snapshot.len(), bytes = total_bytes, "snapshot taken");

        let changed = difference(previous, snapshot.iter().cloned());
        let unchanged = snapshot.len() - changed.len();
        let skipped = changed.iter().filter(|record| !record.is_regular()).count();
        tracing::debug!(changed = changed.len(), unchanged, skipped, "compared with previous snapshot");

        let uploads = self.pipeline.run(cancel, changed).await?;
        let summary = CommitSummary {
            snapshot,
            uploads,
            skipped,
            unchanged,
            total_bytes,
        };
        tracing::info!(
            uploaded = summary.uploads.len(),
            bytes = summary.uploaded_bytes(),
            unchanged,
            skipped,
            "commit complete"
        );
        Ok(summary)
    }
}
