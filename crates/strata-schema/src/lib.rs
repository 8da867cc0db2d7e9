//! Data model for template and snapshot distribution.
//!
//! This crate defines the schema layer: template references and their installed
//! keys (`TemplateReference`, `TemplateKey`), resolved template metadata with its
//! declared digest (`TemplateMetadata`), the fixed partition set and snapshot
//! identities (`Partition`, `SnapshotId`), the `key = value` runtime config file
//! editor (`ContainerConfig`), and input validation for names, versions and size tiers.

pub mod config;
pub mod metadata;
pub mod partition;
pub mod reference;
pub mod types;
pub mod validate;

pub use config::{keys, mount_edits, ConfigEdit, ContainerConfig};
pub use metadata::{Digest, DigestMethod, TemplateMetadata};
pub use partition::{dataset_path, Partition, SnapshotId, DATASETS};
pub use reference::{TemplateKey, TemplateReference, LATEST_VERSION};
pub use types::TemplateId;
pub use validate::{validate_container_name, validate_label, validate_version, SizeTier};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid template reference '{0}'")]
    InvalidReference(String),
    #[error("invalid partition '{0}'")]
    InvalidPartition(String),
    #[error("invalid snapshot label '{0}'")]
    InvalidLabel(String),
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("version must be in form X.Y.Z, got '{0}'")]
    InvalidVersion(String),
    #[error("unsupported digest method '{0}'")]
    UnsupportedDigest(String),
    #[error("malformed template metadata: {0}")]
    MalformedMetadata(String),
    #[error("config key '{key}' missing from {path}")]
    MissingConfigKey { key: String, path: String },
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}
