use crate::concurrency::OperationKind;
use crate::engine::Engine;
use crate::CoreError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use strata_schema::{
    keys, mount_edits, validate_container_name, ConfigEdit, ContainerConfig, TemplateKey,
};
use tracing::{debug, info, warn};

/// Locally administered prefix of the LXC vendor range.
const MAC_PREFIX: &str = "00:16:3e";

impl Engine {
    /// Create container `child` from an installed template.
    ///
    /// Each partition is cloned from the template's `now` snapshot. The
    /// copied config gets a fresh hardware address, the template as its
    /// parent, and rootfs, mount and hostname entries for `child`.
    pub fn clone_container(&self, template: &str, child: &str) -> Result<(), CoreError> {
        let key = TemplateKey::parse(template)?;
        let source = key.dataset();
        if !self.store.is_template(&source) || !self.layout.is_defined(&source) {
            return Err(CoreError::NotFound(format!("template {key}")));
        }
        let child = child.trim();
        validate_container_name(child)?;
        if self.store.backend().exists(child) || self.layout.is_defined(child) {
            return Err(CoreError::AlreadyExists(format!("container {child}")));
        }

        info!("cloning {child} from {key}");
        if let Err(e) = self.clone_into(&key, child) {
            warn!("clone of {child} failed, removing it: {e}");
            if let Err(cleanup) = self.store.destroy_tree(child) {
                warn!("could not remove dataset {child}: {cleanup}");
            }
            let dir = self.layout.instance_dir(child);
            if dir.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!("could not remove {}: {cleanup}", dir.display());
                }
            }
            return Err(e);
        }
        info!("{child} created");
        Ok(())
    }

    fn clone_into(&self, key: &TemplateKey, child: &str) -> Result<(), CoreError> {
        let mac = self.unused_hwaddr(child)?;
        self.store.clone_partitions(&key.dataset(), child)?;

        let target = self.layout.config_path(child);
        fs::create_dir_all(self.layout.instance_dir(child))?;
        fs::copy(self.layout.config_path(&key.dataset()), &target)?;

        let mut edits = vec![
            ConfigEdit::set(keys::NET_HWADDR, mac.as_str()),
            ConfigEdit::set(keys::NET_VETH_PAIR, mac.replace(':', "")),
            ConfigEdit::set(keys::PARENT, key.name.as_str()),
            ConfigEdit::set(keys::PARENT_OWNER, key.owner.as_str()),
            ConfigEdit::set(keys::PARENT_VERSION, key.version.as_str()),
        ];
        edits.extend(mount_edits(self.layout.lxc_prefix(), child));
        edits.push(ConfigEdit::set(keys::UTS_NAME, child));
        ContainerConfig::edit(&target, edits)?;

        let etc = self.layout.partition_dir(child, "rootfs").join("etc");
        fs::create_dir_all(&etc)?;
        fs::write(etc.join("hostname"), format!("{child}\n"))?;
        Ok(())
    }

    /// A hardware address derived from `name` that no defined instance uses.
    fn unused_hwaddr(&self, name: &str) -> Result<String, CoreError> {
        let mut taken = HashSet::new();
        for defined in self.layout.defined_names()? {
            let path = self.layout.config_path(&defined);
            match ContainerConfig::load(&path) {
                Ok(config) => {
                    if let Some(mac) = config.get(keys::NET_HWADDR) {
                        taken.insert(mac.to_ascii_lowercase());
                    }
                }
                Err(e) => debug!("skipping {}: {e}", path.display()),
            }
        }

        for attempt in 0..1024u32 {
            let hash = Sha256::digest(format!("{name}:{attempt}").as_bytes());
            let mac = format!("{MAC_PREFIX}:{:02x}:{:02x}:{:02x}", hash[0], hash[1], hash[2]);
            if !taken.contains(&mac) {
                return Ok(mac);
            }
        }
        Err(CoreError::InvalidArgument(format!(
            "no free hardware address for {name}"
        )))
    }

    /// Stop and remove a container with all of its snapshots and its
    /// desired-state record.
    pub fn destroy_container(&self, name: &str) -> Result<(), CoreError> {
        let name = Self::container_arg(name)?;
        let _lock = self.lock(name, OperationKind::Destroy)?;
        if !self.store.is_container(name) {
            return Err(CoreError::NotFound(format!("container {name}")));
        }

        if self.runtime.is_running(name) {
            info!("stopping {name}");
            self.runtime.stop(name)?;
        }
        self.store.destroy_tree(name)?;
        self.remove_instance_dir(name)?;
        if let Err(e) = self.states.remove(name) {
            warn!("removing desired state of {name}: {e}");
        }
        info!("container {name} destroyed");
        Ok(())
    }

    /// Remove an installed template. `name` is its `name:owner:version` key.
    pub fn destroy_template(&self, name: &str) -> Result<(), CoreError> {
        let name = Self::container_arg(name)?;
        let _lock = self.lock(name, OperationKind::Destroy)?;
        if !self.store.is_template(name) {
            return Err(CoreError::NotFound(format!("template {name}")));
        }
        self.store.destroy_tree(name)?;
        self.remove_instance_dir(name)?;
        info!("template {name} destroyed");
        Ok(())
    }

    fn remove_instance_dir(&self, name: &str) -> Result<(), CoreError> {
        let dir = self.layout.instance_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
