use crate::concurrency::{InstallLock, OperationKind};
use crate::config::AgentConfig;
use crate::supervisor::StateSupervisor;
use crate::CoreError;
use std::sync::Arc;
use std::time::Duration;
use strata_remote::{
    select_source, ArchiveSource, ArtifactFetcher, HttpMetadataService, MetadataService,
};
use strata_runtime::{select_runtime, ContainerRuntime, JsonStateStore, StateStore};
use strata_schema::TemplateKey;
use strata_store::{select_datasets, DatasetBackend, SnapshotStore, StoreLayout};
use tracing::{info, warn};

/// Name of the management template and of the container bootstrapped from it.
pub const MANAGEMENT: &str = "management";

/// One-time bootstrap of the management container, run by import when the
/// management template is installed but no management container exists yet.
pub trait ManagementHook: Send + Sync {
    fn bootstrap(&self, template: &TemplateKey) -> Result<(), CoreError>;
}

/// Default hook: reports that bootstrap is due and leaves it to the operator.
pub struct LogOnlyHook;

impl ManagementHook for LogOnlyHook {
    fn bootstrap(&self, template: &TemplateKey) -> Result<(), CoreError> {
        info!("management template {template} is installed; management container bootstrap is pending");
        Ok(())
    }
}

/// The external systems an `Engine` drives.
pub struct Collaborators {
    pub datasets: Arc<dyn DatasetBackend>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub states: Arc<dyn StateStore>,
    pub catalog: Arc<dyn MetadataService>,
    pub source: Box<dyn ArchiveSource>,
}

/// Template and snapshot distribution engine.
///
/// Every operation runs synchronously on the caller's thread. Imports and
/// destroys of one key are serialized across processes by `InstallLock`;
/// operations on different keys may run side by side.
pub struct Engine {
    pub(crate) config: AgentConfig,
    pub(crate) layout: StoreLayout,
    pub(crate) store: SnapshotStore,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) states: Arc<dyn StateStore>,
    pub(crate) catalog: Arc<dyn MetadataService>,
    pub(crate) fetcher: ArtifactFetcher,
    pub(crate) hook: Box<dyn ManagementHook>,
}

impl Engine {
    /// Build an engine with the backends named in `config`.
    pub fn new(config: &AgentConfig) -> Result<Self, CoreError> {
        let datasets: Arc<dyn DatasetBackend> =
            Arc::from(select_datasets(&config.agent.datasets, &config.agent.dataset)?);
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::from(select_runtime(&config.agent.runtime, &config.agent.lxc_prefix)?);
        Ok(Self::with_collaborators(
            config,
            Collaborators {
                datasets,
                runtime,
                states: Arc::new(JsonStateStore::new(&config.agent.state_dir)),
                catalog: Arc::new(HttpMetadataService::new(config.cdn.clone())),
                source: select_source(&config.cdn),
            },
        ))
    }

    pub fn with_collaborators(config: &AgentConfig, parts: Collaborators) -> Self {
        let layout = config.layout();
        let fetcher = ArtifactFetcher::new(
            parts.source,
            layout.cache_dir(),
            config.cdn.download_attempts,
        );
        Self {
            config: config.clone(),
            store: SnapshotStore::new(parts.datasets, layout.clone()),
            layout,
            runtime: parts.runtime,
            states: parts.states,
            catalog: parts.catalog,
            fetcher,
            hook: Box::new(LogOnlyHook),
        }
    }

    #[must_use]
    pub fn with_management_hook(mut self, hook: Box<dyn ManagementHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn source_name(&self) -> &str {
        self.fetcher.source_name()
    }

    /// A supervisor over this engine's runtime and desired-state store.
    pub fn supervisor(&self) -> StateSupervisor {
        StateSupervisor::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.states),
            self.config.supervisor.clone(),
        )
    }

    pub(crate) fn lock(&self, key: &str, kind: OperationKind) -> Result<InstallLock, CoreError> {
        InstallLock::acquire(&self.layout, key, kind, self.lock_poll())
    }

    fn lock_poll(&self) -> Duration {
        self.config.lock_poll()
    }

    pub(crate) fn require_container(&self, name: &str) -> Result<(), CoreError> {
        if self.store.is_container(name) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("container {name}")))
        }
    }

    /// Trimmed, non-empty container name.
    pub(crate) fn container_arg(name: &str) -> Result<&str, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidArgument("container name is empty".to_owned()));
        }
        Ok(name)
    }
}

/// Keeps a container stopped while alive and starts it again on drop if it
/// was running when the guard was taken.
pub(crate) struct StoppedGuard<'a> {
    runtime: &'a dyn ContainerRuntime,
    name: String,
    restart: bool,
}

impl<'a> StoppedGuard<'a> {
    pub(crate) fn stop(runtime: &'a dyn ContainerRuntime, name: &str) -> Result<Self, CoreError> {
        let restart = runtime.is_running(name);
        if restart {
            info!("stopping {name}");
            runtime.stop(name)?;
        }
        Ok(Self {
            runtime,
            name: name.to_owned(),
            restart,
        })
    }

    /// A guard that does nothing, for callers that asked not to stop.
    pub(crate) fn noop(runtime: &'a dyn ContainerRuntime, name: &str) -> Self {
        Self {
            runtime,
            name: name.to_owned(),
            restart: false,
        }
    }
}

impl Drop for StoppedGuard<'_> {
    fn drop(&mut self) {
        if self.restart {
            info!("starting {}", self.name);
            if let Err(e) = self.runtime.start(&self.name) {
                warn!("failed to restart {}: {e}", self.name);
            }
        }
    }
}
