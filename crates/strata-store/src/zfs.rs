use crate::datasets::{DatasetBackend, ReceiveMode};
use crate::StoreError;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// ZFS datasets under a root dataset, driven through the `zfs` command.
pub struct ZfsDatasets {
    root: String,
    zfs_bin: String,
}

impl ZfsDatasets {
    pub fn new(root_dataset: &str) -> Self {
        Self {
            root: root_dataset.trim_end_matches('/').to_owned(),
            zfs_bin: "zfs".to_owned(),
        }
    }

    #[must_use]
    pub fn with_binary(mut self, zfs_bin: &str) -> Self {
        self.zfs_bin = zfs_bin.to_owned();
        self
    }

    fn full(&self, name: &str) -> String {
        if name.is_empty() {
            self.root.clone()
        } else if name.starts_with('@') {
            format!("{}{name}", self.root)
        } else {
            format!("{}/{name}", self.root)
        }
    }

    fn relative<'a>(&self, full: &'a str) -> &'a str {
        full.strip_prefix(self.root.as_str())
            .map_or(full, |rest| rest.trim_start_matches('/'))
    }

    fn run(&self, args: &[&str]) -> Result<String, StoreError> {
        debug!("{} {}", self.zfs_bin, args.join(" "));
        let output = Command::new(&self.zfs_bin)
            .args(args)
            .output()
            .map_err(|e| command_error(&self.zfs_bin, args, &e.to_string()))?;
        if !output.status.success() {
            return Err(command_error(
                &self.zfs_bin,
                args,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn command_error(bin: &str, args: &[&str], message: &str) -> StoreError {
    StoreError::Command {
        command: format!("{bin} {}", args.join(" ")),
        message: message.to_owned(),
    }
}

impl DatasetBackend for ZfsDatasets {
    fn name(&self) -> &'static str {
        "zfs"
    }

    fn exists(&self, name: &str) -> bool {
        let full = self.full(name);
        self.run(&["list", "-H", "-o", "name", "-t", "all", &full])
            .is_ok()
    }

    fn create(&self, dataset: &str) -> Result<(), StoreError> {
        self.run(&["create", &self.full(dataset)])?;
        Ok(())
    }

    fn snapshot(&self, snapshot: &str, recursive: bool) -> Result<(), StoreError> {
        let full = self.full(snapshot);
        if recursive {
            self.run(&["snapshot", "-r", &full])?;
        } else {
            self.run(&["snapshot", &full])?;
        }
        Ok(())
    }

    fn destroy(&self, name: &str, recursive: bool) -> Result<(), StoreError> {
        let full = self.full(name);
        if recursive {
            self.run(&["destroy", "-r", &full])?;
        } else {
            self.run(&["destroy", &full])?;
        }
        Ok(())
    }

    fn list_snapshots(&self, root: Option<&str>) -> Result<Vec<String>, StoreError> {
        let full = self.full(root.unwrap_or(""));
        let out = self.run(&["list", "-H", "-t", "snapshot", "-o", "name", "-r", &full])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.relative(l).to_owned())
            .collect())
    }

    fn rollback(&self, snapshot: &str, force: bool) -> Result<(), StoreError> {
        let full = self.full(snapshot);
        let result = if force {
            self.run(&["rollback", "-r", &full])
        } else {
            self.run(&["rollback", &full])
        };
        // zfs suggests its own `-r` flag; operators pass `--force` to us.
        result.map(|_| ()).map_err(|e| match e {
            StoreError::Command { command, message } => StoreError::Command {
                command,
                message: message.replace("use '-r' to force deletion", "use --force to force deletion"),
            },
            other => other,
        })
    }

    fn send(&self, from: &str, to: &str, dest: &Path) -> Result<(), StoreError> {
        let from_full = self.full(from);
        let to_full = self.full(to);
        let args = ["send", "-p", "-i", from_full.as_str(), to_full.as_str()];
        debug!("{} {} > {}", self.zfs_bin, args.join(" "), dest.display());

        let out = File::create(dest)?;
        let output = Command::new(&self.zfs_bin)
            .args(args)
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| command_error(&self.zfs_bin, &args, &e.to_string()))?;
        if !output.status.success() {
            if let Err(e) = std::fs::remove_file(dest) {
                warn!("could not remove {}: {e}", dest.display());
            }
            return Err(command_error(
                &self.zfs_bin,
                &args,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    fn receive(&self, dataset: &str, source: &Path, mode: ReceiveMode) -> Result<(), StoreError> {
        let full = self.full(dataset);
        let mut args = vec!["receive"];
        if mode == ReceiveMode::Fresh {
            args.push("-F");
        }
        args.push(&full);
        debug!("{} {} < {}", self.zfs_bin, args.join(" "), source.display());

        let input = File::open(source)?;
        let output = Command::new(&self.zfs_bin)
            .args(&args)
            .stdin(Stdio::from(input))
            .output()
            .map_err(|e| command_error(&self.zfs_bin, &args, &e.to_string()))?;
        if !output.status.success() {
            return Err(command_error(
                &self.zfs_bin,
                &args,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    fn clone_snapshot(&self, snapshot: &str, dataset: &str) -> Result<(), StoreError> {
        self.run(&["clone", &self.full(snapshot), &self.full(dataset)])?;
        Ok(())
    }

    fn set_read_only(&self, dataset: &str) -> Result<(), StoreError> {
        self.run(&["set", "readonly=on", &self.full(dataset)])?;
        Ok(())
    }

    fn is_read_only(&self, dataset: &str) -> Result<bool, StoreError> {
        let out = self.run(&["get", "-H", "-o", "value", "readonly", &self.full(dataset)])?;
        Ok(out.trim() == "on")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_rooted() {
        let zfs = ZfsDatasets::new("subutai/fs/");
        assert_eq!(zfs.full("web1/rootfs"), "subutai/fs/web1/rootfs");
        assert_eq!(zfs.full(""), "subutai/fs");
        assert_eq!(zfs.relative("subutai/fs/web1/var@now"), "web1/var@now");
        assert_eq!(zfs.relative("other/pool@x"), "other/pool@x");
    }

    #[test]
    fn missing_binary_reports_command() {
        let zfs = ZfsDatasets::new("pool").with_binary("/nonexistent/zfs");
        assert!(!zfs.exists("web1"));
        match zfs.create("web1") {
            Err(StoreError::Command { command, .. }) => {
                assert!(command.contains("create pool/web1"));
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }
}
