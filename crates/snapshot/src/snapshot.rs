use crate::record::{FileRecord, HashState, Unhashed};
use std::ops::Deref;

/// The records of one tree at one point in time.
///
/// Emission order is whatever the walk produced; call
/// [`sort_by_path()`](Self::sort_by_path) before the snapshot is persisted or
/// compared as a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<S: HashState = Unhashed> {
    records: Vec<FileRecord<S>>,
}

impl<S: HashState> Snapshot<S> {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: FileRecord<S>) {
        self.records.push(record);
    }

    pub fn sort_by_path(&mut self) {
        self.records.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Sum of the sizes of every record, regardless of type.
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|record| record.size).sum()
    }

    pub fn into_records(self) -> Vec<FileRecord<S>> {
        self.records
    }
}

impl<S: HashState> Default for Snapshot<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: HashState> Deref for Snapshot<S> {
    type Target = [FileRecord<S>];
    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

impl<S: HashState> From<Vec<FileRecord<S>>> for Snapshot<S> {
    fn from(records: Vec<FileRecord<S>>) -> Self {
        Self { records }
    }
}

impl<S: HashState> FromIterator<FileRecord<S>> for Snapshot<S> {
    fn from_iter<I: IntoIterator<Item = FileRecord<S>>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<S: HashState> IntoIterator for Snapshot<S> {
    type Item = FileRecord<S>;
    type IntoIter = std::vec::IntoIter<FileRecord<S>>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, S: HashState> IntoIterator for &'a Snapshot<S> {
    type Item = &'a FileRecord<S>;
    type IntoIter = std::slice::Iter<'a, FileRecord<S>>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FileMeta;
    use crate::record::tests::meta;
    use std::path::Path;

    #[test]
    fn test_sort_by_path() {
        let mut snapshot: Snapshot = ["b/c", "a", "b", "B"].into_iter().map(meta).map(FileRecord::new).collect();
        snapshot.sort_by_path();
        let paths: Vec<&Path> = snapshot.iter().map(|r| r.path.as_path()).collect();
        assert_eq!(paths, [Path::new("B"), Path::new("a"), Path::new("b"), Path::new("b/c")]);
    }

    #[test]
    fn test_total_size() {
        let mut snapshot = Snapshot::with_capacity(2);
        assert_eq!(snapshot.total_size(), 0);
        snapshot.push(FileRecord::new(FileMeta { size: 10, ..meta("a") }));
        snapshot.push(FileRecord::new(FileMeta { size: 32, ..meta("b") }));
        assert_eq!(snapshot.total_size(), 42);
        assert_eq!(snapshot.len(), 2);
    }
}
