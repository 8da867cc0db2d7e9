use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk directories used by the agent.
///
/// `lxc_prefix` holds one directory per template or container (its `config`
/// file and the partition mountpoints); `cache_dir` holds downloaded archives
/// and extraction scratch space; `lock_dir` holds cross-process lock files;
/// `state_dir` holds the desired-state records.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    lxc_prefix: PathBuf,
    cache_dir: PathBuf,
    lock_dir: PathBuf,
    state_dir: PathBuf,
}

impl StoreLayout {
    /// All directories under a single root. Used for tests and sandboxes.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            lxc_prefix: root.join("lxc"),
            cache_dir: root.join("cache"),
            lock_dir: root.join("locks"),
            state_dir: root.join("state"),
        }
    }

    pub fn from_paths(
        lxc_prefix: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        lock_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lxc_prefix: lxc_prefix.into(),
            cache_dir: cache_dir.into(),
            lock_dir: lock_dir.into(),
            state_dir: state_dir.into(),
        }
    }

    #[inline]
    pub fn lxc_prefix(&self) -> &Path {
        &self.lxc_prefix
    }

    #[inline]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[inline]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    #[inline]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[inline]
    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.lxc_prefix.join(name)
    }

    #[inline]
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join("config")
    }

    /// Mountpoint of one partition of a template or container.
    #[inline]
    pub fn partition_dir(&self, name: &str, partition: &str) -> PathBuf {
        self.instance_dir(name).join(partition)
    }

    /// Cached archive of a template, keyed by its content id.
    #[inline]
    pub fn cache_entry(&self, id: &str) -> PathBuf {
        self.cache_dir.join(id)
    }

    pub fn lock_file(&self, key: &str, operation: &str) -> PathBuf {
        self.lock_dir.join(format!("{key}.{operation}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.lxc_prefix)?;
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.lock_dir)?;
        fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }

    /// Names of every template or container that has a runtime config.
    pub fn defined_names(&self) -> Result<Vec<String>, StoreError> {
        if !self.lxc_prefix.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.lxc_prefix)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && entry.path().join("config").is_file() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.config_path(name).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/strata-test");
        assert_eq!(layout.lxc_prefix(), Path::new("/tmp/strata-test/lxc"));
        assert_eq!(
            layout.config_path("web1"),
            PathBuf::from("/tmp/strata-test/lxc/web1/config")
        );
        assert_eq!(
            layout.partition_dir("base:pub:1.0.0", "rootfs"),
            PathBuf::from("/tmp/strata-test/lxc/base:pub:1.0.0/rootfs")
        );
        assert_eq!(
            layout.cache_entry("QmX"),
            PathBuf::from("/tmp/strata-test/cache/QmX")
        );
        assert_eq!(
            layout.lock_file("base:pub:1.0.0", "import"),
            PathBuf::from("/tmp/strata-test/locks/base:pub:1.0.0.import.lock")
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.cache_dir().is_dir());
        assert!(layout.lock_dir().is_dir());
        assert!(layout.state_dir().is_dir());
    }

    #[test]
    fn defined_names_requires_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::create_dir_all(layout.instance_dir("web1")).unwrap();
        fs::write(layout.config_path("web1"), "").unwrap();
        fs::create_dir_all(layout.instance_dir("half-made")).unwrap();
        fs::create_dir_all(layout.instance_dir("base:pub:1.0.0")).unwrap();
        fs::write(layout.config_path("base:pub:1.0.0"), "").unwrap();

        assert_eq!(
            layout.defined_names().unwrap(),
            vec!["base:pub:1.0.0".to_owned(), "web1".to_owned()]
        );
        assert!(layout.is_defined("web1"));
        assert!(!layout.is_defined("half-made"));
    }

    #[test]
    fn defined_names_without_prefix_is_empty() {
        let layout = StoreLayout::new("/nonexistent/strata");
        assert!(layout.defined_names().unwrap().is_empty());
    }
}
