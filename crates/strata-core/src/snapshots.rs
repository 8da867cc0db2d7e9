use crate::engine::{Engine, StoppedGuard};
use crate::CoreError;
use strata_schema::{Partition, SnapshotId, DATASETS};
use strata_store::{SnapshotScope, StoreError};

impl Engine {
    /// Snapshot one partition (or `all`, recursively) of a container.
    ///
    /// With `stop`, a running container is stopped for the duration of the
    /// snapshot and started again whether or not the snapshot succeeded.
    pub fn create_snapshot(
        &self,
        container: &str,
        partition: &str,
        label: &str,
        stop: bool,
    ) -> Result<SnapshotId, CoreError> {
        let id = self.snapshot_arg(container, partition, label)?;
        if self.store.exists(&id) {
            return Err(CoreError::AlreadyExists(format!("snapshot {id}")));
        }

        let _guard = if stop {
            StoppedGuard::stop(&*self.runtime, &id.owner)?
        } else {
            StoppedGuard::noop(&*self.runtime, &id.owner)
        };
        self.store.create(&id)?;
        Ok(id)
    }

    /// Remove a snapshot; one that does not exist is not an error.
    pub fn remove_snapshot(
        &self,
        container: &str,
        partition: &str,
        label: &str,
    ) -> Result<SnapshotId, CoreError> {
        let id = self.snapshot_arg(container, partition, label)?;
        self.store.remove(&id)?;
        Ok(id)
    }

    /// Snapshots of every container, of one container, or of one of its
    /// partitions. A partition needs a container.
    pub fn list_snapshots(
        &self,
        container: Option<&str>,
        partition: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        let container = container.map(str::trim).filter(|c| !c.is_empty());
        let partition = partition.map(str::trim).filter(|p| !p.is_empty());

        let scope = match (container, partition) {
            (None, None) => SnapshotScope::All,
            (None, Some(_)) => {
                return Err(CoreError::InvalidArgument(
                    "listing a partition needs a container name".to_owned(),
                ))
            }
            (Some(c), p) => {
                self.require_container(c)?;
                match p {
                    Some(p) => SnapshotScope::Partition(c.to_owned(), Partition::parse(p)?),
                    None => SnapshotScope::Owner(c.to_owned()),
                }
            }
        };
        Ok(self.store.list(&scope)?)
    }

    /// Roll a partition (or all four) back to `label`.
    ///
    /// Every targeted snapshot is checked before the container is stopped or
    /// any dataset is touched.
    pub fn rollback_snapshot(
        &self,
        container: &str,
        partition: &str,
        label: &str,
        force: bool,
        stop: bool,
    ) -> Result<SnapshotId, CoreError> {
        let id = self.snapshot_arg(container, partition, label)?;
        let targets: Vec<SnapshotId> = if id.is_recursive() {
            DATASETS.iter().map(|p| id.with_partition(*p)).collect()
        } else {
            vec![id.clone()]
        };
        if let Some(missing) = targets.iter().find(|t| !self.store.exists(t)) {
            return Err(StoreError::SnapshotNotFound(missing.to_string()).into());
        }

        let _guard = if stop {
            StoppedGuard::stop(&*self.runtime, &id.owner)?
        } else {
            StoppedGuard::noop(&*self.runtime, &id.owner)
        };
        self.store.rollback(&id, force)?;
        Ok(id)
    }

    fn snapshot_arg(
        &self,
        container: &str,
        partition: &str,
        label: &str,
    ) -> Result<SnapshotId, CoreError> {
        let container = Self::container_arg(container)?;
        let partition = Partition::parse(partition)?;
        let id = SnapshotId::new(container, partition, label)?;
        self.require_container(container)?;
        Ok(id)
    }
}
