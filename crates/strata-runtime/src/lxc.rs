use crate::runtime::{ContainerRuntime, ContainerState};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Drives containers through the `lxc-start`, `lxc-stop` and `lxc-info` tools.
pub struct LxcRuntime {
    lxc_path: PathBuf,
}

impl LxcRuntime {
    pub fn new(lxc_path: &Path) -> Self {
        Self {
            lxc_path: lxc_path.to_path_buf(),
        }
    }

    fn run(&self, tool: &str, container: &str, extra: &[&str]) -> Result<String, RuntimeError> {
        let lxc_path = self.lxc_path.to_string_lossy();
        let mut args = vec!["-n", container, "-P", &*lxc_path];
        args.extend_from_slice(extra);
        debug!("{tool} {}", args.join(" "));

        let output = Command::new(tool)
            .args(&args)
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("{tool}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = stderr.to_lowercase();
            if msg.contains("doesn't exist") || msg.contains("does not exist") {
                return Err(RuntimeError::NotFound(container.to_owned()));
            }
            return Err(RuntimeError::ExecFailed(format!(
                "{tool} -n {container}: {}",
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerRuntime for LxcRuntime {
    fn name(&self) -> &'static str {
        "lxc"
    }

    fn start(&self, container: &str) -> Result<(), RuntimeError> {
        self.run("lxc-start", container, &["-d"])?;
        Ok(())
    }

    fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.run("lxc-stop", container, &[])?;
        Ok(())
    }

    fn state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let out = self.run("lxc-info", container, &["-s", "-H"])?;
        Ok(ContainerState::from_lxc(&out))
    }
}
