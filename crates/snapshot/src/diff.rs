use crate::record::{FileMeta, FileRecord, HashState};
use std::collections::HashSet;

/// Records of `new` that are added or changed relative to `old`.
///
/// Comparison is over [`FileMeta`] only; fingerprints on either side are
/// ignored, so a record whose metadata is unchanged is never re-uploaded even
/// if its content hash differs. Files that disappeared since `old` are not
/// reported. An empty `old` returns every record of `new`.
///
/// The order of the result is unspecified.
pub fn difference<A, B>(old: &[FileRecord<A>], new: impl IntoIterator<Item = FileRecord<B>>) -> Vec<FileRecord>
where
    A: HashState,
    B: HashState,
{
    let new = new.into_iter().map(FileRecord::into_meta);
    if old.is_empty() {
        return new.map(FileRecord::from).collect();
    }
    let mut changed: HashSet<FileMeta> = new.collect();
    for record in old {
        changed.remove(record.meta());
    }
    changed.into_iter().map(FileRecord::from).collect()
}
