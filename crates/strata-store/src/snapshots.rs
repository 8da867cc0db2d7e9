use crate::datasets::{DatasetBackend, ReceiveMode};
use crate::layout::StoreLayout;
use crate::StoreError;
use std::path::Path;
use std::sync::Arc;
use strata_schema::{dataset_path, Partition, SnapshotId, DATASETS};
use tracing::{debug, info, warn};

/// Label of the snapshot every template partition carries and children clone from.
pub const NOW_LABEL: &str = "now";

/// Which snapshots `SnapshotStore::list` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotScope {
    /// Every snapshot except those belonging to installed templates.
    All,
    /// Every snapshot of one container, all partitions included.
    Owner(String),
    /// Snapshots of a single partition of one container.
    Partition(String, Partition),
}

/// Partition-aware snapshot lifecycle on top of a `DatasetBackend`.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn DatasetBackend>,
    layout: StoreLayout,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn DatasetBackend>, layout: StoreLayout) -> Self {
        Self { backend, layout }
    }

    pub fn backend(&self) -> &Arc<dyn DatasetBackend> {
        &self.backend
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn exists(&self, id: &SnapshotId) -> bool {
        self.backend.exists(&id.to_string())
    }

    pub fn create(&self, id: &SnapshotId) -> Result<(), StoreError> {
        let name = id.to_string();
        if self.backend.exists(&name) {
            return Err(StoreError::AlreadyExists(format!("snapshot {name}")));
        }
        self.backend.snapshot(&name, id.is_recursive())?;
        info!("created snapshot {name}");
        Ok(())
    }

    /// Remove a snapshot. A snapshot that does not exist is left alone.
    pub fn remove(&self, id: &SnapshotId) -> Result<(), StoreError> {
        let name = id.to_string();
        if !self.backend.exists(&name) {
            debug!("snapshot {name} does not exist, nothing to remove");
            return Ok(());
        }
        self.backend.destroy(&name, id.is_recursive())?;
        info!("removed snapshot {name}");
        Ok(())
    }

    pub fn list(&self, scope: &SnapshotScope) -> Result<Vec<String>, StoreError> {
        match scope {
            SnapshotScope::All => {
                let templates = self.templates()?;
                let mut snaps = self.backend.list_snapshots(None)?;
                snaps.retain(|s| {
                    let owner = s.split(['/', '@']).next().unwrap_or("");
                    !templates.iter().any(|t| t == owner)
                });
                Ok(snaps)
            }
            SnapshotScope::Owner(owner) => self.backend.list_snapshots(Some(owner)),
            SnapshotScope::Partition(owner, partition) => {
                let dataset = dataset_path(owner, *partition);
                let mut snaps = self.backend.list_snapshots(Some(&dataset))?;
                if *partition == Partition::Config {
                    // The parent dataset only, not its children.
                    let prefix = format!("{dataset}@");
                    snaps.retain(|s| s.starts_with(&prefix));
                }
                Ok(snaps)
            }
        }
    }

    /// Roll back to a snapshot, discarding newer ones when `force` is set.
    ///
    /// For `all` the label must exist on every dataset partition before any of
    /// them is touched, and exactly those four are rolled back.
    pub fn rollback(&self, id: &SnapshotId, force: bool) -> Result<(), StoreError> {
        if !id.is_recursive() {
            let name = id.to_string();
            if !self.backend.exists(&name) {
                return Err(StoreError::SnapshotNotFound(name));
            }
            self.backend.rollback(&name, force)?;
            info!("rolled back to {name}");
            return Ok(());
        }

        let targets: Vec<String> = DATASETS
            .iter()
            .map(|p| id.with_partition(*p).to_string())
            .collect();
        if let Some(missing) = targets.iter().find(|t| !self.backend.exists(t)) {
            return Err(StoreError::SnapshotNotFound(missing.clone()));
        }

        let suffix = format!("@{}", id.label);
        let extras: Vec<String> = self
            .backend
            .list_snapshots(Some(&id.owner))?
            .into_iter()
            .filter(|s| s.ends_with(&suffix) && !targets.contains(s))
            .collect();
        if !extras.is_empty() {
            warn!(
                "snapshots outside the container partitions also carry label '{}' and are not rolled back: {}",
                id.label,
                extras.join(", ")
            );
        }

        for target in &targets {
            self.backend.rollback(target, force)?;
        }
        info!("rolled back {} to {}", id.owner, id.label);
        Ok(())
    }

    pub fn send_delta(&self, from: &str, to: &str, dest: &Path) -> Result<(), StoreError> {
        self.backend.send(from, to, dest)
    }

    pub fn receive_delta(
        &self,
        dataset: &str,
        source: &Path,
        mode: ReceiveMode,
    ) -> Result<(), StoreError> {
        self.backend.receive(dataset, source, mode)
    }

    /// Create `child` and clone every `template/<p>@now` into `child/<p>`.
    pub fn clone_partitions(&self, template: &str, child: &str) -> Result<(), StoreError> {
        self.backend.create(child)?;
        for p in DATASETS {
            let source = format!("{}@{NOW_LABEL}", dataset_path(template, p));
            self.backend.clone_snapshot(&source, &dataset_path(child, p))?;
        }
        debug!("cloned {template} into {child}");
        Ok(())
    }

    pub fn mark_read_only(&self, name: &str) -> Result<(), StoreError> {
        for p in DATASETS {
            self.backend.set_read_only(&dataset_path(name, p))?;
        }
        Ok(())
    }

    /// True when `name/rootfs` exists and is read-only.
    pub fn is_template(&self, name: &str) -> bool {
        let rootfs = dataset_path(name, Partition::Rootfs);
        self.backend.exists(&rootfs) && matches!(self.backend.is_read_only(&rootfs), Ok(true))
    }

    /// True when `name/rootfs` exists and is writable.
    pub fn is_container(&self, name: &str) -> bool {
        let rootfs = dataset_path(name, Partition::Rootfs);
        self.backend.exists(&rootfs) && matches!(self.backend.is_read_only(&rootfs), Ok(false))
    }

    /// Names defined under the runtime prefix whose datasets are templates.
    pub fn templates(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .layout
            .defined_names()?
            .into_iter()
            .filter(|n| self.is_template(n))
            .collect())
    }

    /// Remove every snapshot under `name`, its partitions, then `name` itself.
    /// Pieces that are already gone are skipped.
    pub fn destroy_tree(&self, name: &str) -> Result<(), StoreError> {
        if !self.backend.exists(name) {
            debug!("dataset {name} does not exist, nothing to destroy");
            return Ok(());
        }
        let mut snaps = self.backend.list_snapshots(Some(name))?;
        // Children first so their snapshots go before the parent's.
        snaps.sort_by_key(|s| std::cmp::Reverse(s.matches('/').count()));
        for snap in snaps {
            if self.backend.exists(&snap) {
                self.backend.destroy(&snap, false)?;
            }
        }
        for p in DATASETS {
            let child = dataset_path(name, p);
            if self.backend.exists(&child) {
                self.backend.destroy(&child, false)?;
            }
        }
        self.backend.destroy(name, true)?;
        info!("destroyed dataset tree {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryDatasets;

    fn setup() -> (tempfile::TempDir, Arc<MemoryDatasets>, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let backend = Arc::new(MemoryDatasets::new());
        let store = SnapshotStore::new(backend.clone(), layout);
        (dir, backend, store)
    }

    fn container(backend: &MemoryDatasets, name: &str) {
        backend.create(name).unwrap();
        for p in DATASETS {
            backend.create(&dataset_path(name, p)).unwrap();
        }
    }

    fn template(store: &SnapshotStore, backend: &MemoryDatasets, name: &str) {
        container(backend, name);
        for p in DATASETS {
            backend
                .snapshot(&format!("{}@{NOW_LABEL}", dataset_path(name, p)), false)
                .unwrap();
        }
        store.mark_read_only(name).unwrap();
        let config = store.layout().config_path(name);
        std::fs::create_dir_all(config.parent().unwrap()).unwrap();
        std::fs::write(config, "").unwrap();
    }

    fn snap(owner: &str, p: Partition, label: &str) -> SnapshotId {
        SnapshotId::new(owner, p, label).unwrap()
    }

    #[test]
    fn create_twice_is_already_exists() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        let id = snap("web1", Partition::Var, "pre");
        store.create(&id).unwrap();
        assert!(store.exists(&id));
        assert!(matches!(
            store.create(&id),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn create_all_is_recursive() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        store.create(&snap("web1", Partition::All, "pre")).unwrap();
        for p in DATASETS {
            assert!(backend.exists(&format!("web1/{p}@pre")));
        }
    }

    #[test]
    fn remove_missing_is_noop() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        let before = backend.mutation_count();
        store.remove(&snap("web1", Partition::Home, "nope")).unwrap();
        assert_eq!(backend.mutation_count(), before);
    }

    #[test]
    fn list_all_hides_templates() {
        let (_dir, backend, store) = setup();
        template(&store, &backend, "base:pub:1.0.0");
        container(&backend, "web1");
        store.create(&snap("web1", Partition::Rootfs, "x")).unwrap();

        assert_eq!(store.list(&SnapshotScope::All).unwrap(), vec!["web1/rootfs@x"]);
        assert_eq!(
            store
                .list(&SnapshotScope::Owner("base:pub:1.0.0".to_owned()))
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn list_partition_scopes() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        store.create(&snap("web1", Partition::All, "a")).unwrap();
        store.create(&snap("web1", Partition::Var, "b")).unwrap();

        let var = store
            .list(&SnapshotScope::Partition("web1".to_owned(), Partition::Var))
            .unwrap();
        assert_eq!(var, vec!["web1/var@a", "web1/var@b"]);
        let config = store
            .list(&SnapshotScope::Partition("web1".to_owned(), Partition::Config))
            .unwrap();
        assert_eq!(config, vec!["web1@a"]);
    }

    #[test]
    fn rollback_missing_snapshot_fails() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        assert!(matches!(
            store.rollback(&snap("web1", Partition::Opt, "x"), false),
            Err(StoreError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn rollback_all_checks_every_partition_first() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        for p in [Partition::Rootfs, Partition::Home, Partition::Var] {
            store.create(&snap("web1", p, "x")).unwrap();
        }
        let before = backend.mutation_count();
        match store.rollback(&snap("web1", Partition::All, "x"), false) {
            Err(StoreError::SnapshotNotFound(name)) => assert_eq!(name, "web1/opt@x"),
            other => panic!("expected missing opt snapshot, got {other:?}"),
        }
        assert_eq!(backend.mutation_count(), before);
    }

    #[test]
    fn rollback_all_touches_exactly_the_partitions() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        store.create(&snap("web1", Partition::All, "x")).unwrap();
        store.create(&snap("web1", Partition::Var, "y")).unwrap();

        store
            .rollback(&snap("web1", Partition::All, "x"), true)
            .unwrap();
        let rollbacks: Vec<String> = backend
            .operations()
            .into_iter()
            .filter(|op| op.starts_with("rollback"))
            .collect();
        assert_eq!(rollbacks.len(), 4);
        assert!(rollbacks.iter().all(|op| !op.ends_with("web1@x")));
        assert!(!backend.exists("web1/var@y"));
    }

    #[test]
    fn clone_and_classify() {
        let (_dir, backend, store) = setup();
        template(&store, &backend, "base:pub:1.0.0");
        store.clone_partitions("base:pub:1.0.0", "web1").unwrap();

        assert!(store.is_template("base:pub:1.0.0"));
        assert!(!store.is_container("base:pub:1.0.0"));
        assert!(store.is_container("web1"));
        assert!(!store.is_template("web1"));
        assert!(!store.is_template("ghost"));
        assert_eq!(
            backend.origin("web1/home").as_deref(),
            Some("base:pub:1.0.0/home@now")
        );
        assert_eq!(store.templates().unwrap(), vec!["base:pub:1.0.0"]);
    }

    #[test]
    fn destroy_tree_removes_everything() {
        let (_dir, backend, store) = setup();
        container(&backend, "web1");
        store.create(&snap("web1", Partition::All, "x")).unwrap();
        store.destroy_tree("web1").unwrap();
        assert!(backend.datasets().is_empty());
        store.destroy_tree("web1").unwrap();
    }
}
