//! Container process control and desired-state persistence for Strata.
//!
//! `ContainerRuntime` starts, stops and inspects containers (`LxcRuntime` shells
//! out to the `lxc-*` tools, `MockRuntime` keeps state in memory). `StateStore`
//! persists the desired run state of each container so the supervisor can
//! restore it after a host restart.

pub mod lxc;
pub mod mock;
pub mod runtime;
pub mod state;

pub use lxc::LxcRuntime;
pub use mock::MockRuntime;
pub use runtime::{select_runtime, ContainerRuntime, ContainerState};
pub use state::{ContainerRecord, DesiredState, JsonStateStore, MemoryStateStore, StateStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state record error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("runtime '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("container '{0}' does not exist")]
    NotFound(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("state store error: {0}")]
    StateStore(String),
}
