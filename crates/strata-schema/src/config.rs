//! Editor for the `key = value` runtime config file of templates and containers.

use crate::reference::TemplateKey;
use crate::SchemaError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Keys the agent reads or rewrites.
pub mod keys {
    pub const TEMPLATE: &str = "subutai.template";
    pub const TEMPLATE_OWNER: &str = "subutai.template.owner";
    pub const TEMPLATE_VERSION: &str = "subutai.template.version";
    pub const TEMPLATE_SIZE: &str = "subutai.template.size";
    pub const PARENT: &str = "subutai.parent";
    pub const PARENT_OWNER: &str = "subutai.parent.owner";
    pub const PARENT_VERSION: &str = "subutai.parent.version";
    pub const ROOTFS_PATH: &str = "lxc.rootfs.path";
    pub const MOUNT_ENTRY: &str = "lxc.mount.entry";
    pub const UTS_NAME: &str = "lxc.uts.name";
    pub const NET_HWADDR: &str = "lxc.net.0.hwaddr";
    pub const NET_VETH_PAIR: &str = "lxc.net.0.veth.pair";
    pub const NET_MTU: &str = "lxc.net.0.mtu";
    pub const NET_IPV4: &str = "lxc.net.0.ipv4";
    pub const NET_IPV4_GATEWAY: &str = "lxc.net.0.ipv4.gateway";
    pub const VLAN_ID: &str = "#vlan_id";
}

/// A single edit: set `key` to a value, or drop the key when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEdit {
    pub key: String,
    pub value: Option<String>,
}

impl ConfigEdit {
    pub fn set(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_owned(),
            value: Some(value.into()),
        }
    }

    pub fn remove(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: None,
        }
    }
}

/// In-memory copy of a config file. Line order and repeated keys are preserved.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    path: PathBuf,
    lines: Vec<String>,
}

impl ContainerConfig {
    /// Load `path`; a missing file yields an empty config that `save` will create.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let lines = match fs::read_to_string(path) {
            Ok(content) => content.lines().map(str::to_owned).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_owned(),
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of the first line whose key matches.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k.trim() == key).then(|| v.trim().to_owned())
        })
    }

    /// Like [`get`](Self::get), but an absent or empty value is an error.
    pub fn require(&self, key: &str) -> Result<String, SchemaError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SchemaError::MissingConfigKey {
                key: key.to_owned(),
                path: self.path.display().to_string(),
            })
    }

    /// Apply edits in place.
    ///
    /// Each existing line whose key matches the first not-yet-used edit with
    /// that key is replaced by `key = value`, or dropped if the edit has no
    /// value. Edits left over afterwards are appended when they carry a value.
    pub fn apply(&mut self, edits: Vec<ConfigEdit>) {
        let mut pending = edits;
        let mut out = Vec::with_capacity(self.lines.len() + pending.len());

        for line in &self.lines {
            let key = line.split('=').next().unwrap_or("").trim();
            match pending.iter().position(|e| e.key == key) {
                Some(pos) => {
                    let edit = pending.remove(pos);
                    if let Some(rendered) = render(&edit) {
                        out.push(rendered);
                    }
                }
                None => out.push(line.clone()),
            }
        }
        out.extend(pending.iter().filter_map(render));
        self.lines = out;
    }

    /// Atomically write the config back to its path.
    pub fn save(&self) -> Result<(), SchemaError> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;

        let mut content = self.lines.join("\n");
        content.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SchemaError::Io(e.error))?;
        Ok(())
    }

    /// Load, edit and save in one step.
    pub fn edit(path: &Path, edits: Vec<ConfigEdit>) -> Result<(), SchemaError> {
        let mut config = Self::load(path)?;
        config.apply(edits);
        config.save()
    }

    /// Identity the template declares for itself.
    pub fn template_key(&self) -> Result<TemplateKey, SchemaError> {
        Ok(TemplateKey::new(
            &self.require(keys::TEMPLATE)?,
            &self.require(keys::TEMPLATE_OWNER)?,
            &self.require(keys::TEMPLATE_VERSION)?,
        ))
    }

    /// Declared parent, if all three parent keys are present.
    pub fn parent_key(&self) -> Option<TemplateKey> {
        let name = self.get(keys::PARENT).filter(|v| !v.is_empty())?;
        let owner = self.get(keys::PARENT_OWNER).filter(|v| !v.is_empty())?;
        let version = self.get(keys::PARENT_VERSION).filter(|v| !v.is_empty())?;
        Some(TemplateKey::new(&name, &owner, &version))
    }
}

/// Edits that point the rootfs and the bind mounts of `name` at `lxc_prefix/name`.
pub fn mount_edits(lxc_prefix: &Path, name: &str) -> Vec<ConfigEdit> {
    let base = lxc_prefix.join(name);
    let mut edits = vec![ConfigEdit::set(
        keys::ROOTFS_PATH,
        format!("zfs:{}", base.join("rootfs").display()),
    )];
    for dir in ["home", "opt", "var"] {
        edits.push(ConfigEdit::set(
            keys::MOUNT_ENTRY,
            format!("{} {dir} none bind,rw 0 0", base.join(dir).display()),
        ));
    }
    edits
}

fn render(edit: &ConfigEdit) -> Option<String> {
    let value = edit.value.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
    Some(format!("{} = {value}", edit.key.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("config");
        fs::write(
            &path,
            "lxc.uts.name = old\n\
             subutai.template = base\n\
             lxc.mount.entry = /a home none bind,rw 0 0\n\
             lxc.mount.entry = /a var none bind,rw 0 0\n\
             lxc.net.0.hwaddr = 00:16:3e:00:00:01\n\
             # comment\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn get_trims_key_and_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContainerConfig::load(&sample(dir.path())).unwrap();
        assert_eq!(config.get("subutai.template").as_deref(), Some("base"));
        assert_eq!(
            config.get(keys::NET_HWADDR).as_deref(),
            Some("00:16:3e:00:00:01")
        );
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn apply_replaces_removes_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let mut config = ContainerConfig::load(&path).unwrap();
        config.apply(vec![
            ConfigEdit::set(keys::UTS_NAME, "web1"),
            ConfigEdit::remove(keys::NET_HWADDR),
            ConfigEdit::set(keys::TEMPLATE_OWNER, "pub"),
        ]);
        config.save().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("lxc.uts.name = web1\n"));
        assert!(!content.contains("hwaddr"));
        assert!(content.ends_with("subutai.template.owner = pub\n"));
        assert!(content.contains("# comment"));
    }

    #[test]
    fn repeated_keys_consume_edits_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path());
        let mut config = ContainerConfig::load(&path).unwrap();
        config.apply(mount_edits(Path::new("/var/lib/lxc"), "web1"));

        let mounts: Vec<&String> = config
            .lines
            .iter()
            .filter(|l| l.starts_with(keys::MOUNT_ENTRY))
            .collect();
        assert_eq!(mounts.len(), 3);
        assert_eq!(
            mounts[0],
            "lxc.mount.entry = /var/lib/lxc/web1/home home none bind,rw 0 0"
        );
        assert_eq!(
            mounts[1],
            "lxc.mount.entry = /var/lib/lxc/web1/opt opt none bind,rw 0 0"
        );
        assert_eq!(
            config.get(keys::ROOTFS_PATH).as_deref(),
            Some("zfs:/var/lib/lxc/web1/rootfs")
        );
    }

    #[test]
    fn removing_absent_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ContainerConfig::load(&sample(dir.path())).unwrap();
        let before = config.lines.clone();
        config.apply(vec![ConfigEdit::remove(keys::VLAN_ID)]);
        assert_eq!(config.lines, before);
    }

    #[test]
    fn missing_file_loads_empty_and_save_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config");
        ContainerConfig::edit(&path, vec![ConfigEdit::set(keys::TEMPLATE, "x")]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "subutai.template = x\n");
    }

    #[test]
    fn template_and_parent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(
            &path,
            "subutai.template = child\nsubutai.template.owner = pub\nsubutai.template.version = 1.0.0\n\
             subutai.parent = base\nsubutai.parent.owner = pub\nsubutai.parent.version = 1.0.0\n",
        )
        .unwrap();
        let config = ContainerConfig::load(&path).unwrap();
        assert_eq!(config.template_key().unwrap().dataset(), "child:pub:1.0.0");
        assert_eq!(config.parent_key().unwrap().dataset(), "base:pub:1.0.0");
    }

    #[test]
    fn template_key_requires_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "subutai.template = child\n").unwrap();
        let config = ContainerConfig::load(&path).unwrap();
        assert!(matches!(
            config.template_key(),
            Err(SchemaError::MissingConfigKey { .. })
        ));
        assert!(config.parent_key().is_none());
    }
}
