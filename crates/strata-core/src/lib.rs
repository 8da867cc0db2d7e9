//! Orchestration engine for Strata template and snapshot distribution.
//!
//! This crate ties the schema, dataset store, container runtime and remote
//! catalog together into the `Engine`: dependency-ordered template import,
//! template export, partition snapshots, container snapshot bundles, clone and
//! destroy. It also provides the agent configuration file, cross-process
//! install locks, and the `StateSupervisor` that keeps desired-running
//! containers running.

mod bundle;
pub mod concurrency;
pub mod config;
mod containers;
pub mod engine;
mod export;
mod install;
mod snapshots;
pub mod supervisor;

pub use concurrency::{install_signal_handler, shutdown_flag, InstallLock, OperationKind};
pub use config::{AgentConfig, AgentSection, SupervisorConfig, DEFAULT_CONFIG_PATH};
pub use engine::{Collaborators, Engine, LogOnlyHook, ManagementHook, MANAGEMENT};
pub use export::{ExportOptions, ExportedTemplate};
pub use install::{ImportOutcome, ImportSource};
pub use supervisor::{CycleReport, StateSupervisor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] strata_schema::SchemaError),
    #[error("validation error: {0}")]
    InvalidArgument(String),
    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] strata_runtime::RuntimeError),
    #[error("remote error: {0}")]
    Remote(#[from] strata_remote::RemoteError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("install of {key} failed and was cleaned up: {cause}")]
    PartialInstall { key: String, cause: String },
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
