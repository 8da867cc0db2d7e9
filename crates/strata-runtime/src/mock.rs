use crate::runtime::{ContainerRuntime, ContainerState};
use crate::RuntimeError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    states: HashMap<String, ContainerState>,
    failing_starts: HashMap<String, u32>,
    start_attempts: HashMap<String, u32>,
    calls: Vec<String>,
}

/// In-memory runtime. Unknown containers report `Stopped`.
#[derive(Default)]
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RuntimeError> {
        self.inner
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    pub fn set_state(&self, container: &str, state: ContainerState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.states.insert(container.to_owned(), state);
        }
    }

    /// Make the next `times` starts of `container` fail.
    pub fn fail_starts(&self, container: &str, times: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_starts.insert(container.to_owned(), times);
        }
    }

    pub fn start_attempts(&self, container: &str) -> u32 {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.start_attempts.get(container).copied())
            .unwrap_or(0)
    }

    /// `start <name>` / `stop <name>` in call order.
    pub fn calls(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|i| i.calls.clone())
            .unwrap_or_default()
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn start(&self, container: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.calls.push(format!("start {container}"));
        *inner
            .start_attempts
            .entry(container.to_owned())
            .or_insert(0) += 1;
        if let Some(remaining) = inner.failing_starts.get_mut(container) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RuntimeError::ExecFailed(format!(
                    "lxc-start -n {container}: mock failure"
                )));
            }
        }
        inner
            .states
            .insert(container.to_owned(), ContainerState::Running);
        Ok(())
    }

    fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.calls.push(format!("stop {container}"));
        inner
            .states
            .insert(container.to_owned(), ContainerState::Stopped);
        Ok(())
    }

    fn state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let inner = self.lock()?;
        Ok(inner
            .states
            .get(container)
            .copied()
            .unwrap_or(ContainerState::Stopped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_cycle() {
        let rt = MockRuntime::new();
        assert_eq!(rt.state("web1").unwrap(), ContainerState::Stopped);
        rt.start("web1").unwrap();
        assert!(rt.is_running("web1"));
        rt.stop("web1").unwrap();
        assert!(!rt.is_running("web1"));
        assert_eq!(rt.calls(), vec!["start web1", "stop web1"]);
    }

    #[test]
    fn injected_start_failures_run_out() {
        let rt = MockRuntime::new();
        rt.fail_starts("web1", 2);
        assert!(rt.start("web1").is_err());
        assert!(rt.start("web1").is_err());
        rt.start("web1").unwrap();
        assert_eq!(rt.start_attempts("web1"), 3);
        assert!(rt.is_running("web1"));
    }
}
