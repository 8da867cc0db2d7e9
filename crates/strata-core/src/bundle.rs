use crate::engine::Engine;
use crate::CoreError;
use std::fs;
use std::path::{Path, PathBuf};
use strata_schema::{dataset_path, ContainerConfig, Partition, SnapshotId, DATASETS};
use strata_store::{pack_archive, unpack_archive, ReceiveMode, StoreError, NOW_LABEL};
use tracing::{debug, info, warn};

/// File name with up to three extensions stripped: `web1_a.tar.gz` -> `web1_a`.
fn bundle_stem(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for _ in 0..3 {
        match name.rfind('.') {
            Some(pos) if pos > 0 => name.truncate(pos),
            _ => break,
        }
    }
    name
}

impl Engine {
    /// Dump the deltas of a container's snapshots into
    /// `<dest_dir>/<container>_<l1>[_<l2>].tar.gz`.
    ///
    /// One label sends each partition from the parent template's `now`
    /// snapshot to the labelled one; two labels send the span between them.
    pub fn send_snapshots(
        &self,
        container: &str,
        dest_dir: &Path,
        labels: &[&str],
    ) -> Result<PathBuf, CoreError> {
        let container = Self::container_arg(container)?;
        self.require_container(container)?;
        if !dest_dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "destination directory {}",
                dest_dir.display()
            )));
        }
        if labels.is_empty() || labels.len() > 2 {
            return Err(CoreError::InvalidArgument(format!(
                "expected one or two snapshot labels, got {}",
                labels.len()
            )));
        }

        let mut snaps: Vec<Vec<SnapshotId>> = Vec::with_capacity(labels.len());
        for label in labels {
            let per_partition = DATASETS
                .iter()
                .map(|p| SnapshotId::new(container, *p, label))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(missing) = per_partition.iter().find(|s| !self.store.exists(s)) {
                return Err(StoreError::SnapshotNotFound(missing.to_string()).into());
            }
            snaps.push(per_partition);
        }

        let config_path = self.layout.config_path(container);
        let config = ContainerConfig::load(&config_path)?;
        let parent = if snaps.len() == 1 {
            Some(
                config
                    .parent_key()
                    .ok_or_else(|| CoreError::NotFound(format!("parent template of {container}")))?,
            )
        } else {
            None
        };

        let mut parts = vec![container.to_owned()];
        parts.extend(snaps.iter().map(|s| s[0].label.clone()));
        let target = dest_dir.join(parts.join("_"));
        let archive = dest_dir.join(format!("{}.tar.gz", parts.join("_")));

        let result = (|| -> Result<(), CoreError> {
            fs::create_dir_all(&target)?;
            for (i, p) in DATASETS.iter().enumerate() {
                let (from, to) = match &parent {
                    Some(parent) => (
                        format!("{}@{NOW_LABEL}", dataset_path(&parent.dataset(), *p)),
                        snaps[0][i].to_string(),
                    ),
                    None => (snaps[0][i].to_string(), snaps[1][i].to_string()),
                };
                debug!("sending {from} -> {to}");
                self.store
                    .send_delta(&from, &to, &target.join(p.delta_file()))?;
            }
            fs::copy(&config_path, target.join("config"))?;
            pack_archive(&target, &archive)?;
            Ok(())
        })();

        if let Err(e) = fs::remove_dir_all(&target) {
            warn!("removing {}: {e}", target.display());
        }
        result?;
        info!("{container} snapshots dumped to {}", archive.display());
        Ok(archive)
    }

    /// Load a bundle written by `send_snapshots` into `container`.
    ///
    /// `source` is a path, or a file name inside the cache directory. Every
    /// delta and the config must be present in the bundle before any dataset
    /// is created or received into.
    pub fn receive_snapshots(&self, container: &str, source: &str) -> Result<(), CoreError> {
        let container = Self::container_arg(container)?;
        let source = source.trim();
        if source.is_empty() {
            return Err(CoreError::InvalidArgument(
                "snapshot bundle path is empty".to_owned(),
            ));
        }
        let mut path = PathBuf::from(source);
        if !path.is_file() {
            path = self.layout.cache_dir().join(source);
            if !path.is_file() {
                return Err(CoreError::NotFound(format!("snapshot bundle {source}")));
            }
        }

        fs::create_dir_all(self.layout.cache_dir())?;
        let extracted = tempfile::Builder::new()
            .prefix(&format!("{}.", bundle_stem(&path)))
            .tempdir_in(self.layout.cache_dir())?;
        unpack_archive(&path, extracted.path())?;
        let dir = extracted.path();

        for p in DATASETS {
            if !dir.join(p.delta_file()).is_file() {
                return Err(StoreError::InvalidArchive(format!(
                    "snapshot file for partition {p} not found in {}",
                    path.display()
                ))
                .into());
            }
        }
        if !dir.join("config").is_file() {
            return Err(StoreError::InvalidArchive(format!(
                "config file not found in {}",
                path.display()
            ))
            .into());
        }

        let backend = self.store.backend();
        let root = dataset_path(container, Partition::Config);
        if !backend.exists(&root) {
            backend.create(&root)?;
        }
        for p in DATASETS {
            self.store.receive_delta(
                &dataset_path(container, p),
                &dir.join(p.delta_file()),
                ReceiveMode::Append,
            )?;
        }

        let config = self.layout.config_path(container);
        if let Some(parent) = config.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(dir.join("config"), &config)?;
        info!("received snapshots of {container} from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_up_to_three_extensions() {
        assert_eq!(bundle_stem(Path::new("/x/web1_a.tar.gz")), "web1_a");
        assert_eq!(bundle_stem(Path::new("web1_a_b.tar.gz")), "web1_a_b");
        assert_eq!(bundle_stem(Path::new("a.b.c.d.e")), "a.b");
        assert_eq!(bundle_stem(Path::new("plain")), "plain");
    }
}
