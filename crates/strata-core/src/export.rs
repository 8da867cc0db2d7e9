use crate::engine::{Engine, StoppedGuard};
use crate::CoreError;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use strata_remote::ProgressSink;
use strata_schema::{
    dataset_path, keys, mount_edits, validate_container_name, validate_version, ConfigEdit,
    ContainerConfig, DigestMethod, SizeTier, SnapshotId, TemplateKey, DATASETS,
};
use strata_store::{file_digest, pack_archive, NOW_LABEL};
use tracing::{debug, info, warn};

/// How a container is turned into a template.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Template name; defaults to the container name.
    pub new_name: Option<String>,
    /// `X.Y.Z`; defaults to the parent template's version.
    pub version: Option<String>,
    pub pref_size: Option<String>,
    /// CDN token. Decides the owner and is required unless `local`.
    pub token: Option<String>,
    /// Keep the archive in the cache instead of uploading it.
    pub local: bool,
}

/// An exported template archive and the metadata it was published with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedTemplate {
    pub archive: PathBuf,
    pub name: String,
    pub owner: String,
    pub version: String,
    pub md5: String,
    pub size: u64,
    pub parent: String,
    #[serde(rename = "pref-size")]
    pub pref_size: String,
}

/// Architecture label used in archive names.
fn arch_label() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Empty every regular file below `dir`, keeping the files themselves.
fn truncate_tree(dir: &Path) -> Result<(), CoreError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        if ft.is_dir() {
            truncate_tree(&entry.path())?;
        } else if ft.is_file() {
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(entry.path())?;
        }
    }
    Ok(())
}

impl Engine {
    /// Package a container as a template derived from its parent.
    ///
    /// Each partition is shipped as a delta from the parent template's `now`
    /// snapshot to a fresh `now` snapshot of the container. A running
    /// container is stopped for the duration and started again afterwards.
    pub fn export(
        &self,
        container: &str,
        options: &ExportOptions,
        progress: &dyn ProgressSink,
    ) -> Result<ExportedTemplate, CoreError> {
        let container = Self::container_arg(container)?;
        let target = match options.new_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {
                validate_container_name(name)?;
                name.to_owned()
            }
            _ => container.to_owned(),
        };
        self.require_container(container)?;

        let token = options
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if token.is_none() && !options.local {
            return Err(CoreError::InvalidArgument(
                "a CDN token is required to upload a template".to_owned(),
            ));
        }

        let config_path = self.layout.config_path(container);
        let config = ContainerConfig::load(&config_path)?;
        let parent = config
            .parent_key()
            .ok_or_else(|| CoreError::NotFound(format!("parent template of {container}")))?;

        let version = match options.version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => {
                validate_version(v)?;
                v.to_owned()
            }
            _ => parent.version.clone(),
        };
        let owner = match token {
            Some(token) => self.catalog.owner_for_token(token)?,
            None => config
                .get(keys::TEMPLATE_OWNER)
                .filter(|o| !o.is_empty())
                .unwrap_or_else(|| parent.owner.clone()),
        };
        let key = TemplateKey::new(&target, &owner, &version);
        if token.is_some() && self.catalog.exists(&key)? {
            return Err(CoreError::AlreadyExists(format!("template {key}")));
        }
        let size = options
            .pref_size
            .as_deref()
            .map(SizeTier::parse_or_default)
            .unwrap_or_default();

        let _guard = StoppedGuard::stop(&*self.runtime, container)?;

        let var = self.layout.partition_dir(container, "var");
        for dir in ["log", "cache"] {
            truncate_tree(&var.join(dir))?;
        }

        fs::create_dir_all(self.layout.cache_dir())?;
        let stem = format!("{target}-subutai-template_{version}_{}", arch_label());
        let staging = self.layout.cache_dir().join(&stem);
        let archive = self.layout.cache_dir().join(format!("{stem}.tar.gz"));

        info!("exporting {container} as {key}");
        let packed = self.stage_export(container, &parent, &staging, &archive, || {
            let mut edits = vec![
                ConfigEdit::set(keys::TEMPLATE_OWNER, owner.as_str()),
                ConfigEdit::set(keys::TEMPLATE_VERSION, version.as_str()),
                ConfigEdit::set(keys::TEMPLATE_SIZE, size.as_str()),
                ConfigEdit::remove(keys::NET_IPV4_GATEWAY),
                ConfigEdit::remove(keys::NET_IPV4),
                ConfigEdit::remove(keys::NET_VETH_PAIR),
                ConfigEdit::remove(keys::NET_HWADDR),
                ConfigEdit::remove(keys::NET_MTU),
                ConfigEdit::remove(keys::VLAN_ID),
                ConfigEdit::set(keys::TEMPLATE, target.as_str()),
            ];
            if target != container {
                edits.push(ConfigEdit::set(keys::UTS_NAME, target.as_str()));
                edits.extend(mount_edits(self.layout.lxc_prefix(), &target));
            }
            edits
        });
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!("removing {}: {e}", staging.display());
        }
        let size_bytes = packed?;

        let exported = ExportedTemplate {
            md5: file_digest(&archive, DigestMethod::Md5)?,
            archive,
            name: target.clone(),
            owner,
            version,
            size: size_bytes,
            parent: parent.name.clone(),
            pref_size: size.to_string(),
        };

        match token.filter(|_| !options.local) {
            Some(token) => {
                info!("uploading {}", exported.archive.display());
                let response = self.catalog.upload(&exported.archive, token, progress)?;
                info!("template {key} published: {}", response.trim());
            }
            None => info!(
                "template {key} exported: {}",
                serde_json::to_string(&exported)?
            ),
        }
        Ok(exported)
    }

    /// Write `deltas/<p>.delta` and `config` under `staging` and pack them.
    fn stage_export(
        &self,
        container: &str,
        parent: &TemplateKey,
        staging: &Path,
        archive: &Path,
        config_edits: impl FnOnce() -> Vec<ConfigEdit>,
    ) -> Result<u64, CoreError> {
        let deltas = staging.join("deltas");
        fs::create_dir_all(&deltas)?;

        for p in DATASETS {
            let now = SnapshotId::new(container, p, NOW_LABEL)?;
            self.store.remove(&now)?;
            self.store.create(&now)?;
            let from = format!("{}@{NOW_LABEL}", dataset_path(&parent.dataset(), p));
            debug!("sending {from} -> {now}");
            self.store
                .send_delta(&from, &now.to_string(), &deltas.join(p.delta_file()))?;
        }

        let config = staging.join("config");
        fs::copy(self.layout.config_path(container), &config)?;
        ContainerConfig::edit(&config, config_edits())?;

        Ok(pack_archive(staging, archive)?)
    }
}
