use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Observed run state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Stopped,
    Unknown,
}

impl ContainerState {
    /// Parse the state word printed by `lxc-info -s -H`.
    pub fn from_lxc(word: &str) -> Self {
        match word.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self, container: &str) -> Result<(), RuntimeError>;

    fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    fn state(&self, container: &str) -> Result<ContainerState, RuntimeError>;

    fn is_running(&self, container: &str) -> bool {
        matches!(self.state(container), Ok(ContainerState::Running))
    }
}

pub fn select_runtime(
    name: &str,
    lxc_prefix: &Path,
) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "lxc" => Ok(Box::new(crate::lxc::LxcRuntime::new(lxc_prefix))),
        "mock" => Ok(Box::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
