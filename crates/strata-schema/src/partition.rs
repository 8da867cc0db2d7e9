use crate::validate::validate_label;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A partition token accepted by snapshot operations.
///
/// `Config` addresses the container's parent dataset (the one holding the
/// config file) and `All` expands to every dataset partition at operation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Rootfs,
    Home,
    Var,
    Opt,
    Config,
    All,
}

/// The fixed dataset partitions, in install order.
pub const DATASETS: [Partition; 4] = [
    Partition::Rootfs,
    Partition::Home,
    Partition::Var,
    Partition::Opt,
];

impl Partition {
    /// Parse after trimming and lowercasing.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        match input.trim().to_ascii_lowercase().as_str() {
            "rootfs" => Ok(Self::Rootfs),
            "home" => Ok(Self::Home),
            "var" => Ok(Self::Var),
            "opt" => Ok(Self::Opt),
            "config" => Ok(Self::Config),
            "all" => Ok(Self::All),
            _ => Err(SchemaError::InvalidPartition(input.to_owned())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rootfs => "rootfs",
            Self::Home => "home",
            Self::Var => "var",
            Self::Opt => "opt",
            Self::Config => "config",
            Self::All => "all",
        }
    }

    /// True for the four real dataset partitions.
    pub fn is_dataset(self) -> bool {
        !matches!(self, Self::Config | Self::All)
    }

    /// File name of this partition's delta inside an archive.
    pub fn delta_file(self) -> String {
        format!("{}.delta", self.as_str())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot identity `(owner, partition, label)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    pub owner: String,
    pub partition: Partition,
    pub label: String,
}

impl SnapshotId {
    /// Build an identity from operator input; the label is trimmed and lowercased.
    pub fn new(owner: &str, partition: Partition, label: &str) -> Result<Self, SchemaError> {
        let label = label.trim().to_ascii_lowercase();
        validate_label(&label)?;
        Ok(Self {
            owner: owner.trim().to_owned(),
            partition,
            label,
        })
    }

    /// The same label on another partition of the same owner.
    #[must_use]
    pub fn with_partition(&self, partition: Partition) -> Self {
        Self {
            owner: self.owner.clone(),
            partition,
            label: self.label.clone(),
        }
    }

    /// Dataset the snapshot lives on: `owner` for config/all, else `owner/partition`.
    pub fn dataset(&self) -> String {
        dataset_path(&self.owner, self.partition)
    }

    /// Snapshots of `all` cover every child dataset.
    pub fn is_recursive(&self) -> bool {
        self.partition == Partition::All
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset(), self.label)
    }
}

/// Dataset path of a partition of `owner`.
pub fn dataset_path(owner: &str, partition: Partition) -> String {
    if partition.is_dataset() {
        format!("{owner}/{partition}")
    } else {
        owner.to_owned()
    }
}
