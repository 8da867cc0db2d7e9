use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::warn;

/// Run state a container should be in after a host restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub state: DesiredState,
    #[serde(default)]
    pub ip: Option<String>,
    pub updated_at: String,
}

impl ContainerRecord {
    pub fn new(name: &str, state: DesiredState) -> Self {
        Self {
            name: name.to_owned(),
            state,
            ip: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: DesiredState) -> Self {
        self.state = state;
        self.updated_at = chrono::Utc::now().to_rfc3339();
        self
    }
}

/// Persistence for desired-state records.
pub trait StateStore: Send + Sync {
    fn find_by_state(&self, state: DesiredState) -> Result<Vec<ContainerRecord>, RuntimeError>;

    fn find(&self, name: &str) -> Result<Option<ContainerRecord>, RuntimeError>;

    fn save(&self, record: &ContainerRecord) -> Result<(), RuntimeError>;

    fn remove(&self, name: &str) -> Result<(), RuntimeError>;
}

/// One JSON file per container under a state directory.
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn read(path: &Path) -> Result<ContainerRecord, RuntimeError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl StateStore for JsonStateStore {
    fn find_by_state(&self, state: DesiredState) -> Result<Vec<ContainerRecord>, RuntimeError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(record) if record.state == state => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable state record {}: {e}", path.display()),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn find(&self, name: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn save(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_path(&record.name))
            .map_err(|e| RuntimeError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let path = self.record_path(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-memory records with switchable lookup failures.
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, ContainerRecord>>,
    fail_find: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_find(&self, fail: bool) {
        self.fail_find.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, ContainerRecord>>, RuntimeError> {
        self.records
            .lock()
            .map_err(|e| RuntimeError::StateStore(format!("mutex poisoned: {e}")))
    }
}

impl StateStore for MemoryStateStore {
    fn find_by_state(&self, state: DesiredState) -> Result<Vec<ContainerRecord>, RuntimeError> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(RuntimeError::StateStore("lookup unavailable".to_owned()));
        }
        Ok(self
            .lock()?
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect())
    }

    fn find(&self, name: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn save(&self, record: &ContainerRecord) -> Result<(), RuntimeError> {
        self.lock()?.insert(record.name.clone(), record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.lock()?.remove(name);
        Ok(())
    }
}
