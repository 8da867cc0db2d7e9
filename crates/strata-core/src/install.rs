use crate::concurrency::{InstallLock, OperationKind};
use crate::engine::{Engine, MANAGEMENT};
use crate::CoreError;
use std::fs;
use std::path::{Path, PathBuf};
use strata_remote::ProgressSink;
use strata_schema::{
    dataset_path, mount_edits, ContainerConfig, TemplateKey, TemplateReference, DATASETS,
};
use strata_store::{unpack_archive, ReceiveMode, StoreError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// What `Engine::import` installs.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// Resolved through the metadata service and fetched into the cache.
    Reference(TemplateReference),
    /// A template archive on local disk. Not digest-checked and never deleted;
    /// its key comes from the archived config.
    Archive(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Key of the requested template.
    pub key: TemplateKey,
    /// Templates this call installed, ancestors first. Empty when the
    /// requested template was already present.
    pub installed: Vec<TemplateKey>,
}

/// A template whose archive is extracted and whose import lock is held.
struct Staged {
    key: TemplateKey,
    extracted: TempDir,
    /// Cache entry to delete once installed; `None` for local archives.
    cached_archive: Option<PathBuf>,
    _lock: InstallLock,
}

enum Prepared {
    Present(TemplateKey),
    Staged(Staged),
}

fn check_cycle(in_progress: &[TemplateKey], key: &TemplateKey) -> Result<(), CoreError> {
    match in_progress.iter().position(|k| k == key) {
        Some(pos) => {
            let mut chain: Vec<String> =
                in_progress[pos..].iter().map(ToString::to_string).collect();
            chain.push(key.to_string());
            Err(CoreError::DependencyCycle(chain))
        }
        None => Ok(()),
    }
}

impl Engine {
    /// Install a template and every missing ancestor, ancestors first.
    ///
    /// Each template is handled under its own import lock, held from the
    /// existence check until it is installed or the chain fails. A fully
    /// qualified reference that is already installed returns without contacting
    /// the metadata service or touching any dataset.
    pub fn import(
        &self,
        source: &ImportSource,
        progress: &dyn ProgressSink,
    ) -> Result<ImportOutcome, CoreError> {
        self.layout.initialize()?;

        let root = match source {
            ImportSource::Reference(reference) => {
                self.prepare_reference(reference, &[], progress)?
            }
            ImportSource::Archive(path) => self.prepare_local(path)?,
        };
        let mut stack = match root {
            Prepared::Present(key) => {
                return Ok(ImportOutcome {
                    key,
                    installed: Vec::new(),
                })
            }
            Prepared::Staged(staged) => vec![staged],
        };
        let key = stack[0].key.clone();
        let mut installed: Vec<TemplateKey> = Vec::new();
        // Declared parent keys already handed to the resolver. The resolved key
        // can differ from the declared one; each declaration is followed once.
        let mut followed: Vec<TemplateKey> = Vec::new();

        while let Some(top) = stack.last() {
            if let Some(parent) = self.missing_parent(top, &installed, &followed)? {
                info!("parent template required: {parent}");
                let chain: Vec<TemplateKey> = stack.iter().map(|s| s.key.clone()).collect();
                let prepared = self.prepare_reference(&parent.reference(), &chain, progress)?;
                followed.push(parent);
                if let Prepared::Staged(staged) = prepared {
                    stack.push(staged);
                }
                continue;
            }

            if let Some(staged) = stack.pop() {
                self.install(&staged)?;
                let done = staged.key.clone();
                self.finish(staged)?;
                installed.push(done);
            }
        }

        Ok(ImportOutcome { key, installed })
    }

    /// Installed means a read-only dataset tree and a runtime config.
    pub fn is_installed(&self, key: &TemplateKey) -> bool {
        let name = key.dataset();
        self.store.is_template(&name) && self.layout.is_defined(&name)
    }

    /// Resolve, fetch and extract `reference` under its import lock.
    ///
    /// `in_progress` holds the keys staged further down the chain; meeting one
    /// of them again is a dependency cycle.
    fn prepare_reference(
        &self,
        reference: &TemplateReference,
        in_progress: &[TemplateKey],
        progress: &dyn ProgressSink,
    ) -> Result<Prepared, CoreError> {
        let mut held = None;
        if let Some(key) = reference.key() {
            check_cycle(in_progress, &key)?;
            let lock = self.lock(&key.dataset(), OperationKind::Import)?;
            if self.is_installed(&key) {
                self.on_present(&key)?;
                return Ok(Prepared::Present(key));
            }
            held = Some((key, lock));
        }

        info!("importing {reference}");
        let meta = self.catalog.resolve(reference)?;
        let key = meta.key();
        if in_progress.last() == Some(&key) {
            debug!("{key} names itself as parent");
            return Ok(Prepared::Present(key));
        }
        check_cycle(in_progress, &key)?;
        let lock = match held {
            Some((held_key, lock)) if held_key == key => lock,
            _ => {
                let lock = self.lock(&key.dataset(), OperationKind::Import)?;
                if self.is_installed(&key) {
                    self.on_present(&key)?;
                    return Ok(Prepared::Present(key));
                }
                lock
            }
        };

        let archive = self.fetcher.ensure_local_archive(&meta, progress)?;
        info!("unpacking template {}", meta.name);
        let extracted = self.extract(&key.dataset(), &archive)?;
        Ok(Prepared::Staged(Staged {
            key,
            extracted,
            cached_archive: Some(archive),
            _lock: lock,
        }))
    }

    fn prepare_local(&self, archive: &Path) -> Result<Prepared, CoreError> {
        if !archive.is_file() {
            return Err(CoreError::NotFound(format!(
                "template archive {}",
                archive.display()
            )));
        }
        warn!(
            "skipping integrity verification of local archive {}",
            archive.display()
        );
        let stem = archive
            .file_name()
            .map_or_else(|| "local".to_owned(), |n| n.to_string_lossy().into_owned());
        let extracted = self.extract(&stem, archive)?;
        let key = ContainerConfig::load(&extracted.path().join("config"))?.template_key()?;
        info!("importing {key} from {}", archive.display());

        let lock = self.lock(&key.dataset(), OperationKind::Import)?;
        if self.is_installed(&key) {
            return Err(CoreError::AlreadyExists(format!("template {key}")));
        }
        Ok(Prepared::Staged(Staged {
            key,
            extracted,
            cached_archive: None,
            _lock: lock,
        }))
    }

    /// Unpack into a fresh directory under the cache, removed when dropped.
    fn extract(&self, prefix: &str, archive: &Path) -> Result<TempDir, CoreError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}."))
            .tempdir_in(self.layout.cache_dir())?;
        debug!("extracting {} to {}", archive.display(), dir.path().display());
        unpack_archive(archive, dir.path())?;
        Ok(dir)
    }

    /// The parent `staged` declares, if it still has to be installed first.
    fn missing_parent(
        &self,
        staged: &Staged,
        installed: &[TemplateKey],
        followed: &[TemplateKey],
    ) -> Result<Option<TemplateKey>, CoreError> {
        let config = ContainerConfig::load(&staged.extracted.path().join("config"))?;
        Ok(config.parent_key().filter(|parent| {
            *parent != staged.key
                && !followed.contains(parent)
                && !installed.contains(parent)
                && !self.is_installed(parent)
        }))
    }

    fn on_present(&self, key: &TemplateKey) -> Result<(), CoreError> {
        if key.name == MANAGEMENT && !self.store.is_container(MANAGEMENT) {
            return self.hook.bootstrap(key);
        }
        info!("{} instance exists", key.name);
        Ok(())
    }

    fn install(&self, staged: &Staged) -> Result<(), CoreError> {
        let name = staged.key.dataset();
        let dir = staged.extracted.path();

        let mut missing: Vec<String> = DATASETS
            .iter()
            .map(|p| format!("deltas/{}", p.delta_file()))
            .filter(|f| !dir.join(f).is_file())
            .collect();
        if !dir.join("config").is_file() {
            missing.push("config".to_owned());
        }
        if !missing.is_empty() {
            return Err(StoreError::InvalidArchive(format!(
                "template {name} lacks {}",
                missing.join(", ")
            ))
            .into());
        }

        info!("installing template {}", staged.key);
        let backend = self.store.backend();
        if backend.exists(&name) {
            warn!("removing leftover dataset {name}");
            self.store.destroy_tree(&name)?;
        }
        backend.create(&name)?;

        if let Err(e) = self.install_partitions(&name, dir) {
            warn!("install of {name} failed, removing partial dataset: {e}");
            if let Err(cleanup) = self.store.destroy_tree(&name) {
                warn!("could not remove partial dataset {name}: {cleanup}");
            }
            let config = self.layout.config_path(&name);
            if config.exists() {
                if let Err(cleanup) = fs::remove_file(&config) {
                    warn!("could not remove {}: {cleanup}", config.display());
                }
            }
            return Err(CoreError::PartialInstall {
                key: name,
                cause: e.to_string(),
            });
        }
        Ok(())
    }

    fn install_partitions(&self, name: &str, dir: &Path) -> Result<(), CoreError> {
        for p in DATASETS {
            self.store.receive_delta(
                &dataset_path(name, p),
                &dir.join("deltas").join(p.delta_file()),
                ReceiveMode::Fresh,
            )?;
        }
        self.store.mark_read_only(name)?;

        let target = self.layout.config_path(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(dir.join("config"), &target)?;
        ContainerConfig::edit(&target, mount_edits(self.layout.lxc_prefix(), name))?;
        Ok(())
    }

    fn finish(&self, staged: Staged) -> Result<(), CoreError> {
        let Staged {
            key,
            extracted,
            cached_archive,
            _lock,
        } = staged;
        if let Err(e) = extracted.close() {
            warn!("removing extraction directory of {key}: {e}");
        }
        if let Some(archive) = cached_archive {
            if let Err(e) = fs::remove_file(&archive) {
                warn!("removing {}: {e}", archive.display());
            }
        }
        if key.name == MANAGEMENT {
            self.hook.bootstrap(&key)?;
        }
        info!("template {key} installed");
        Ok(())
    }
}
