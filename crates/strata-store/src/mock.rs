use crate::datasets::{DatasetBackend, ReceiveMode};
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// In-memory dataset namespace.
///
/// Mirrors the observable behavior of the ZFS backend closely enough for the
/// engine's tests: parents must exist, snapshots are ordered by creation,
/// rollback refuses to discard newer snapshots unless forced. Delta "streams"
/// are small JSON files naming the source and target snapshots.
pub struct MemoryDatasets {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    datasets: BTreeMap<String, Entry>,
    snapshots: BTreeMap<String, u64>,
    next_seq: u64,
    operations: Vec<String>,
    fail_on: Vec<String>,
}

#[derive(Default)]
struct Entry {
    read_only: bool,
    origin: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct MemoryStream {
    from: String,
    to: String,
}

impl Default for MemoryDatasets {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl MemoryDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later operation whose log line starts with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_on.push(prefix.to_owned());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_on.clear();
        }
    }

    /// Log of every mutating operation that succeeded, oldest first.
    pub fn operations(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.operations.clone())
            .unwrap_or_default()
    }

    pub fn mutation_count(&self) -> usize {
        self.operations().len()
    }

    /// Every dataset name currently present.
    pub fn datasets(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.datasets.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn origin(&self, dataset: &str) -> Option<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.datasets.get(dataset).and_then(|e| e.origin.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|e| StoreError::Command {
            command: "memory".to_owned(),
            message: format!("mutex poisoned: {e}"),
        })
    }

    /// Run a mutating operation: check injected failures, apply, then log.
    fn mutate<T>(
        &self,
        op: String,
        apply: impl FnOnce(&mut Inner) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.lock()?;
        if inner.fail_on.iter().any(|p| op.starts_with(p.as_str())) {
            return Err(StoreError::Command {
                command: op,
                message: "injected failure".to_owned(),
            });
        }
        let value = apply(&mut inner)?;
        inner.operations.push(op);
        Ok(value)
    }
}

impl Inner {
    fn require_dataset(&self, dataset: &str) -> Result<(), StoreError> {
        if self.datasets.contains_key(dataset) {
            Ok(())
        } else {
            Err(StoreError::DatasetNotFound(dataset.to_owned()))
        }
    }

    fn require_snapshot(&self, snapshot: &str) -> Result<(), StoreError> {
        if self.snapshots.contains_key(snapshot) {
            Ok(())
        } else {
            Err(StoreError::SnapshotNotFound(snapshot.to_owned()))
        }
    }

    fn add_dataset(&mut self, dataset: &str, origin: Option<String>) -> Result<(), StoreError> {
        if self.datasets.contains_key(dataset) {
            return Err(StoreError::AlreadyExists(format!("dataset {dataset}")));
        }
        if let Some((parent, _)) = dataset.rsplit_once('/') {
            self.require_dataset(parent)?;
        }
        self.datasets.insert(
            dataset.to_owned(),
            Entry {
                read_only: false,
                origin,
            },
        );
        Ok(())
    }

    fn add_snapshot(&mut self, snapshot: &str) {
        self.next_seq += 1;
        self.snapshots.insert(snapshot.to_owned(), self.next_seq);
    }

    fn descendants(&self, dataset: &str) -> Vec<String> {
        let prefix = format!("{dataset}/");
        self.datasets
            .keys()
            .filter(|d| d.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn remove_tree(&mut self, dataset: &str) {
        let prefix = format!("{dataset}/");
        self.datasets
            .retain(|d, _| d != dataset && !d.starts_with(&prefix));
        self.snapshots.retain(|s, _| {
            let ds = s.split('@').next().unwrap_or("");
            ds != dataset && !ds.starts_with(&prefix)
        });
    }
}

fn split_snapshot(snapshot: &str) -> Result<(&str, &str), StoreError> {
    snapshot
        .split_once('@')
        .filter(|(d, l)| !d.is_empty() && !l.is_empty())
        .ok_or_else(|| StoreError::SnapshotNotFound(snapshot.to_owned()))
}

fn under(snapshot: &str, root: &str) -> bool {
    let ds = snapshot.split('@').next().unwrap_or("");
    ds == root || ds.starts_with(&format!("{root}/"))
}

impl DatasetBackend for MemoryDatasets {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, name: &str) -> bool {
        self.inner.lock().is_ok_and(|i| {
            if name.contains('@') {
                i.snapshots.contains_key(name)
            } else {
                i.datasets.contains_key(name)
            }
        })
    }

    fn create(&self, dataset: &str) -> Result<(), StoreError> {
        self.mutate(format!("create {dataset}"), |i| i.add_dataset(dataset, None))
    }

    fn snapshot(&self, snapshot: &str, recursive: bool) -> Result<(), StoreError> {
        let op = if recursive {
            format!("snapshot -r {snapshot}")
        } else {
            format!("snapshot {snapshot}")
        };
        self.mutate(op, |i| {
            let (dataset, label) = split_snapshot(snapshot)?;
            i.require_dataset(dataset)?;
            let mut targets = vec![snapshot.to_owned()];
            if recursive {
                targets.extend(
                    i.descendants(dataset)
                        .into_iter()
                        .map(|d| format!("{d}@{label}")),
                );
            }
            if let Some(existing) = targets.iter().find(|t| i.snapshots.contains_key(*t)) {
                return Err(StoreError::AlreadyExists(format!("snapshot {existing}")));
            }
            for target in &targets {
                i.add_snapshot(target);
            }
            Ok(())
        })
    }

    fn destroy(&self, name: &str, recursive: bool) -> Result<(), StoreError> {
        let op = if recursive {
            format!("destroy -r {name}")
        } else {
            format!("destroy {name}")
        };
        self.mutate(op, |i| {
            if let Some((dataset, label)) = name.split_once('@') {
                i.require_snapshot(name)?;
                i.snapshots.remove(name);
                if recursive {
                    let suffix = format!("@{label}");
                    let prefix = format!("{dataset}/");
                    i.snapshots
                        .retain(|s, _| !(s.starts_with(&prefix) && s.ends_with(&suffix)));
                }
                return Ok(());
            }
            i.require_dataset(name)?;
            let has_children = !i.descendants(name).is_empty()
                || i.snapshots.keys().any(|s| under(s, name));
            if has_children && !recursive {
                return Err(StoreError::Command {
                    command: format!("destroy {name}"),
                    message: "dataset has children".to_owned(),
                });
            }
            i.remove_tree(name);
            Ok(())
        })
    }

    fn list_snapshots(&self, root: Option<&str>) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        if let Some(root) = root {
            inner.require_dataset(root)?;
        }
        Ok(inner
            .snapshots
            .keys()
            .filter(|s| root.map_or(true, |r| under(s, r)))
            .cloned()
            .collect())
    }

    fn rollback(&self, snapshot: &str, force: bool) -> Result<(), StoreError> {
        let op = if force {
            format!("rollback -r {snapshot}")
        } else {
            format!("rollback {snapshot}")
        };
        self.mutate(op, |i| {
            let (dataset, _) = split_snapshot(snapshot)?;
            i.require_snapshot(snapshot)?;
            let seq = i.snapshots[snapshot];
            let prefix = format!("{dataset}@");
            let newer: Vec<String> = i
                .snapshots
                .iter()
                .filter(|(s, n)| s.starts_with(&prefix) && **n > seq)
                .map(|(s, _)| s.clone())
                .collect();
            if !newer.is_empty() && !force {
                return Err(StoreError::Command {
                    command: format!("rollback {snapshot}"),
                    message: format!(
                        "more recent snapshots exist ({}); use --force to force deletion",
                        newer.join(", ")
                    ),
                });
            }
            for s in newer {
                i.snapshots.remove(&s);
            }
            Ok(())
        })
    }

    fn send(&self, from: &str, to: &str, dest: &Path) -> Result<(), StoreError> {
        self.mutate(format!("send {from} {to}"), |i| {
            i.require_snapshot(from)?;
            i.require_snapshot(to)?;
            let stream = MemoryStream {
                from: from.to_owned(),
                to: to.to_owned(),
            };
            std::fs::write(dest, serde_json::to_vec(&stream)?)?;
            Ok(())
        })
    }

    fn receive(&self, dataset: &str, source: &Path, mode: ReceiveMode) -> Result<(), StoreError> {
        let op = match mode {
            ReceiveMode::Fresh => format!("receive {dataset}"),
            ReceiveMode::Append => format!("receive -a {dataset}"),
        };
        self.mutate(op, |i| {
            let content = std::fs::read(source)?;
            let stream: MemoryStream = serde_json::from_slice(&content)
                .map_err(|e| StoreError::InvalidArchive(format!("bad delta stream: {e}")))?;
            let (_, label) = split_snapshot(&stream.to)?;
            let target = format!("{dataset}@{label}");
            match mode {
                ReceiveMode::Fresh => {
                    if i.datasets.contains_key(dataset) {
                        i.remove_tree(dataset);
                    }
                    i.add_dataset(dataset, None)?;
                }
                ReceiveMode::Append => {
                    i.require_dataset(dataset)?;
                    if i.snapshots.contains_key(&target) {
                        return Err(StoreError::AlreadyExists(format!("snapshot {target}")));
                    }
                }
            }
            i.add_snapshot(&target);
            Ok(())
        })
    }

    fn clone_snapshot(&self, snapshot: &str, dataset: &str) -> Result<(), StoreError> {
        self.mutate(format!("clone {snapshot} {dataset}"), |i| {
            i.require_snapshot(snapshot)?;
            i.add_dataset(dataset, Some(snapshot.to_owned()))
        })
    }

    fn set_read_only(&self, dataset: &str) -> Result<(), StoreError> {
        self.mutate(format!("set readonly=on {dataset}"), |i| {
            match i.datasets.get_mut(dataset) {
                Some(entry) => {
                    entry.read_only = true;
                    Ok(())
                }
                None => Err(StoreError::DatasetNotFound(dataset.to_owned())),
            }
        })
    }

    fn is_read_only(&self, dataset: &str) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        inner
            .datasets
            .get(dataset)
            .map(|e| e.read_only)
            .ok_or_else(|| StoreError::DatasetNotFound(dataset.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(ds: &MemoryDatasets, name: &str) {
        ds.create(name).unwrap();
        for p in ["rootfs", "home", "var", "opt"] {
            ds.create(&format!("{name}/{p}")).unwrap();
        }
    }

    #[test]
    fn child_requires_parent() {
        let ds = MemoryDatasets::new();
        assert!(matches!(
            ds.create("web1/rootfs"),
            Err(StoreError::DatasetNotFound(_))
        ));
        ds.create("web1").unwrap();
        ds.create("web1/rootfs").unwrap();
        assert!(ds.exists("web1/rootfs"));
    }

    #[test]
    fn recursive_snapshot_covers_children() {
        let ds = MemoryDatasets::new();
        container(&ds, "web1");
        ds.snapshot("web1@x", true).unwrap();
        let snaps = ds.list_snapshots(Some("web1")).unwrap();
        assert_eq!(snaps.len(), 5);
        assert!(ds.exists("web1/opt@x"));
        assert!(matches!(
            ds.snapshot("web1/opt@x", false),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn rollback_refuses_newer_without_force() {
        let ds = MemoryDatasets::new();
        container(&ds, "web1");
        ds.snapshot("web1/var@a", false).unwrap();
        ds.snapshot("web1/var@b", false).unwrap();
        assert!(ds.rollback("web1/var@a", false).is_err());
        ds.rollback("web1/var@a", true).unwrap();
        assert!(!ds.exists("web1/var@b"));
        assert!(ds.exists("web1/var@a"));
    }

    #[test]
    fn send_and_receive_move_the_target_label() {
        let dir = tempfile::tempdir().unwrap();
        let ds = MemoryDatasets::new();
        container(&ds, "base");
        ds.snapshot("base/rootfs@now", false).unwrap();
        container(&ds, "web1");
        ds.snapshot("web1/rootfs@now", false).unwrap();

        let delta = dir.path().join("rootfs.delta");
        ds.send("base/rootfs@now", "web1/rootfs@now", &delta).unwrap();

        ds.create("copy").unwrap();
        ds.receive("copy/rootfs", &delta, ReceiveMode::Fresh).unwrap();
        assert!(ds.exists("copy/rootfs@now"));
        assert!(matches!(
            ds.receive("copy/rootfs", &delta, ReceiveMode::Append),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn injected_failure_does_not_mutate() {
        let ds = MemoryDatasets::new();
        ds.fail_on("create web1");
        assert!(ds.create("web1").is_err());
        assert!(!ds.exists("web1"));
        assert_eq!(ds.mutation_count(), 0);
        ds.clear_failures();
        ds.create("web1").unwrap();
        assert_eq!(ds.operations(), vec!["create web1".to_owned()]);
    }

    #[test]
    fn destroy_dataset_with_children_needs_recursion() {
        let ds = MemoryDatasets::new();
        container(&ds, "web1");
        assert!(ds.destroy("web1", false).is_err());
        ds.destroy("web1", true).unwrap();
        assert!(ds.datasets().is_empty());
    }

    #[test]
    fn clone_records_origin() {
        let ds = MemoryDatasets::new();
        container(&ds, "base");
        ds.snapshot("base/rootfs@now", false).unwrap();
        ds.create("web1").unwrap();
        ds.clone_snapshot("base/rootfs@now", "web1/rootfs").unwrap();
        assert_eq!(ds.origin("web1/rootfs").as_deref(), Some("base/rootfs@now"));
        assert!(!ds.is_read_only("web1/rootfs").unwrap());
    }
}
