use crate::StoreError;
use std::path::Path;

/// How a delta stream lands on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// The target dataset is created from the stream, replacing whatever was there.
    Fresh,
    /// The stream extends an existing dataset with newer snapshots.
    Append,
}

/// Primitive operations over the copy-on-write dataset namespace.
///
/// All names are relative to the backend's root dataset. Snapshot names use
/// the `dataset@label` form; `exists` and `destroy` accept both forms.
pub trait DatasetBackend: Send + Sync {
    fn name(&self) -> &str;

    fn exists(&self, name: &str) -> bool;

    fn create(&self, dataset: &str) -> Result<(), StoreError>;

    /// Snapshot `dataset@label`; `recursive` also snapshots every descendant.
    fn snapshot(&self, snapshot: &str, recursive: bool) -> Result<(), StoreError>;

    fn destroy(&self, name: &str, recursive: bool) -> Result<(), StoreError>;

    /// Snapshot names under `root` (or the whole namespace), including descendants.
    fn list_snapshots(&self, root: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Roll back to `snapshot`; `force` discards snapshots newer than it.
    fn rollback(&self, snapshot: &str, force: bool) -> Result<(), StoreError>;

    /// Write the incremental stream `from -> to` into `dest`.
    fn send(&self, from: &str, to: &str, dest: &Path) -> Result<(), StoreError>;

    fn receive(&self, dataset: &str, source: &Path, mode: ReceiveMode) -> Result<(), StoreError>;

    /// Materialize a writable dataset from a read-only snapshot.
    fn clone_snapshot(&self, snapshot: &str, dataset: &str) -> Result<(), StoreError>;

    fn set_read_only(&self, dataset: &str) -> Result<(), StoreError>;

    fn is_read_only(&self, dataset: &str) -> Result<bool, StoreError>;
}

pub fn select_datasets(
    backend: &str,
    root_dataset: &str,
) -> Result<Box<dyn DatasetBackend>, StoreError> {
    match backend {
        "zfs" => Ok(Box::new(crate::zfs::ZfsDatasets::new(root_dataset))),
        "memory" => Ok(Box::new(crate::mock::MemoryDatasets::new())),
        other => Err(StoreError::BackendUnavailable(other.to_owned())),
    }
}
