use crate::source::ArchiveSource;
use crate::{MetadataService, ProgressSink, RemoteError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use strata_schema::{TemplateKey, TemplateMetadata, TemplateReference, LATEST_VERSION};

/// Shared view of how many times a source fetched.
#[derive(Clone, Default)]
pub struct FetchCounter(Arc<AtomicU32>);

impl FetchCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Archives served from a local mirror directory, one file per template id.
///
/// Used for offline hosts and tests; can be told to fail or corrupt the next
/// few fetches.
pub struct DirectorySource {
    root: PathBuf,
    fetches: FetchCounter,
    fail_remaining: AtomicU32,
    corrupt_remaining: AtomicU32,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fetches: FetchCounter::default(),
            fail_remaining: AtomicU32::new(0),
            corrupt_remaining: AtomicU32::new(0),
        }
    }

    /// The next `n` fetches fail as transport errors.
    #[must_use]
    pub fn fail_next(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` fetches deliver a damaged copy.
    #[must_use]
    pub fn corrupt_next(self, n: u32) -> Self {
        self.corrupt_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn fetch_counter(&self) -> FetchCounter {
        self.fetches.clone()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ArchiveSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn locate(&self, meta: &TemplateMetadata) -> Result<String, RemoteError> {
        let path = self.root.join(meta.id.as_str());
        if path.is_file() {
            Ok(path.to_string_lossy().into_owned())
        } else {
            Err(RemoteError::NotFound(format!(
                "template {} ({}) in {}",
                meta.name,
                meta.id,
                self.root.display()
            )))
        }
    }

    fn fetch(
        &self,
        meta: &TemplateMetadata,
        location: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), RemoteError> {
        self.fetches.0.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_remaining) {
            return Err(RemoteError::Http(format!("mirror unavailable for {}", meta.id)));
        }
        progress.start(&meta.name, Some(meta.size));
        let copied = fs::copy(location, dest)?;
        progress.advance(copied);
        progress.finish();
        if take_one(&self.corrupt_remaining) {
            let mut data = fs::read(dest)?;
            data.push(0xff);
            fs::write(dest, data)?;
        }
        Ok(())
    }
}

/// Fixed in-memory template catalog.
#[derive(Default)]
pub struct StaticCatalog {
    templates: Mutex<Vec<TemplateMetadata>>,
    owners: Mutex<HashMap<String, String>>,
    uploads: Mutex<Vec<PathBuf>>,
    resolves: AtomicU32,
}

fn version_order(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect()
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, meta: TemplateMetadata) {
        if let Ok(mut templates) = self.templates.lock() {
            templates.push(meta);
        }
    }

    pub fn add_owner(&self, token: &str, owner: &str) {
        if let Ok(mut owners) = self.owners.lock() {
            owners.insert(token.to_owned(), owner.to_owned());
        }
    }

    /// Number of `resolve` calls served so far.
    pub fn resolve_count(&self) -> u32 {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    fn lock_templates(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<TemplateMetadata>>, RemoteError> {
        self.templates
            .lock()
            .map_err(|e| RemoteError::Config(format!("mutex poisoned: {e}")))
    }
}

impl MetadataService for StaticCatalog {
    fn resolve(&self, reference: &TemplateReference) -> Result<TemplateMetadata, RemoteError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let templates = self.lock_templates()?;
        let found = match reference {
            TemplateReference::Id(id) => templates.iter().find(|t| t.id == *id).cloned(),
            TemplateReference::Named {
                name,
                owner,
                version,
            } => templates
                .iter()
                .filter(|t| t.name == *name)
                .filter(|t| owner.as_ref().map_or(true, |o| t.owner == *o))
                .filter(|t| {
                    version
                        .as_deref()
                        .filter(|v| *v != LATEST_VERSION)
                        .map_or(true, |v| t.version == v)
                })
                .max_by_key(|t| version_order(&t.version))
                .cloned(),
        };
        found.ok_or_else(|| RemoteError::NotFound(format!("template {reference}")))
    }

    fn exists(&self, key: &TemplateKey) -> Result<bool, RemoteError> {
        Ok(self.lock_templates()?.iter().any(|t| t.key() == *key))
    }

    fn owner_for_token(&self, token: &str) -> Result<String, RemoteError> {
        self.owners
            .lock()
            .map_err(|e| RemoteError::Config(format!("mutex poisoned: {e}")))?
            .get(token)
            .cloned()
            .ok_or_else(|| RemoteError::Service {
                status: 401,
                url: "/users/username".to_owned(),
            })
    }

    fn upload(
        &self,
        archive: &Path,
        _token: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String, RemoteError> {
        let size = fs::metadata(archive)?.len();
        progress.start("upload", Some(size));
        progress.advance(size);
        progress.finish();
        self.uploads
            .lock()
            .map_err(|e| RemoteError::Config(format!("mutex poisoned: {e}")))?
            .push(archive.to_path_buf());
        Ok("uploaded".to_owned())
    }
}
