//! Fingerprint, upload and verify.
//!
//! [`UploadPipeline`] does the per-file work with bounded concurrency;
//! [`Repository::commit()`] drives a whole commit: walk the work directory,
//! diff against the previous snapshot, and hand the changes to the pipeline.

mod commit;
pub mod error;
mod pipeline;

pub use crate::commit::{CommitSummary, Repository};
pub use crate::pipeline::{UploadPipeline, default_workers};
