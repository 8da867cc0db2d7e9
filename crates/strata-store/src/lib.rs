//! Dataset, snapshot, archive and digest primitives for Strata.
//!
//! This crate provides the storage layer: a pluggable `DatasetBackend` over the
//! copy-on-write filesystem (`ZfsDatasets` in production, `MemoryDatasets` for
//! tests and dry runs), `SnapshotStore` for partition-aware snapshot lifecycle,
//! `StoreLayout` for the agent's on-disk directories, gzip tar packing of
//! template and bundle directories, and md5/sha256 archive verification.

pub mod archive;
pub mod datasets;
pub mod digest;
pub mod layout;
pub mod mock;
pub mod snapshots;
pub mod zfs;

pub use archive::{pack_archive, unpack_archive};
pub use datasets::{select_datasets, DatasetBackend, ReceiveMode};
pub use digest::{file_digest, verify_file};
pub use layout::StoreLayout;
pub use mock::MemoryDatasets;
pub use snapshots::{SnapshotScope, SnapshotStore, NOW_LABEL};
pub use zfs::ZfsDatasets;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] strata_schema::SchemaError),
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("snapshot {0} does not exist")]
    SnapshotNotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("dataset backend '{0}' is not available")]
    BackendUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_snapshot_not_found() {
        let e = StoreError::SnapshotNotFound("web1/rootfs@x".to_owned());
        assert_eq!(e.to_string(), "snapshot web1/rootfs@x does not exist");
    }

    #[test]
    fn store_error_display_already_exists() {
        let e = StoreError::AlreadyExists("snapshot web1@x".to_owned());
        assert!(e.to_string().contains("web1@x"));
    }

    #[test]
    fn store_error_display_command() {
        let e = StoreError::Command {
            command: "zfs rollback web1/var@x".to_owned(),
            message: "more recent snapshots exist".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("zfs rollback"));
        assert!(msg.contains("more recent"));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            path: "/cache/abc".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }

    #[test]
    fn schema_error_is_transparent() {
        let e: StoreError = strata_schema::SchemaError::InvalidPartition("boot".to_owned()).into();
        assert_eq!(e.to_string(), "invalid partition 'boot'");
    }
}
