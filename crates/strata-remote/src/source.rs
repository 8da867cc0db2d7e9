use crate::http::ProgressReader;
use crate::{CdnConfig, ProgressSink, RemoteError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use strata_schema::TemplateMetadata;
use tracing::{debug, info, warn};

/// Suffix of an archive wrapped in a directory named after the template id.
const WRAPPED_SUFFIX: &str = ".tar.gz";

/// Somewhere template archives can be pulled from.
///
/// `locate` runs once per import and its failure is final. `fetch` may run
/// several times, each time replacing whatever is at `dest`.
pub trait ArchiveSource: Send + Sync {
    fn name(&self) -> &str;

    /// Find the archive of `meta`; the returned location is handed to `fetch`.
    fn locate(&self, meta: &TemplateMetadata) -> Result<String, RemoteError>;

    fn fetch(
        &self,
        meta: &TemplateMetadata,
        location: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), RemoteError>;

    /// Hook run once the fetched archive passed verification.
    fn after_verified(&self, _meta: &TemplateMetadata) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// True for URLs with both a scheme and an authority, after `{ID}` substitution.
pub fn is_absolute_url(template: &str) -> bool {
    template
        .replace("{ID}", "id")
        .parse::<ureq::http::Uri>()
        .is_ok_and(|uri| uri.scheme().is_some() && uri.authority().is_some())
}

/// HTTP gateway when the download URL is absolute, the peer network otherwise.
pub fn select_source(config: &CdnConfig) -> Box<dyn ArchiveSource> {
    if is_absolute_url(&config.template_download_url) {
        Box::new(GatewaySource::new(&config.template_download_url))
    } else {
        Box::new(PeerSource::new(&config.ipfs_path))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Downloads archives over HTTP from a gateway URL template containing `{ID}`.
pub struct GatewaySource {
    url_template: String,
    agent: ureq::Agent,
}

impl GatewaySource {
    pub fn new(url_template: &str) -> Self {
        Self {
            url_template: url_template.to_owned(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn do_head(&self, url: &str) -> Result<u16, RemoteError> {
        debug!("HEAD {url}");
        match self.agent.head(url).call() {
            Ok(resp) => Ok(resp.status().into()),
            Err(ureq::Error::StatusCode(code)) => Ok(code),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }
}

impl ArchiveSource for GatewaySource {
    fn name(&self) -> &'static str {
        "gateway"
    }

    /// Prefer `<url>/<name>.tar.gz` (a wrapped upload), then `<url>` itself.
    fn locate(&self, meta: &TemplateMetadata) -> Result<String, RemoteError> {
        let direct = self.url_template.replacen("{ID}", meta.id.as_str(), 1);
        let wrapped = format!(
            "{}/{}{WRAPPED_SUFFIX}",
            direct.trim_end_matches('/'),
            meta.name
        );
        if self.do_head(&wrapped)? == 200 {
            return Ok(wrapped);
        }
        if self.do_head(&direct)? == 200 {
            return Ok(direct);
        }
        Err(RemoteError::NotFound(format!(
            "template {} ({}) on the download gateway",
            meta.name, meta.id
        )))
    }

    fn fetch(
        &self,
        meta: &TemplateMetadata,
        location: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), RemoteError> {
        let wrapped = location.ends_with(WRAPPED_SUFFIX);
        let target = if wrapped {
            sibling(dest, "_wrap")
        } else {
            dest.to_path_buf()
        };

        info!("downloading {}", meta.name);
        debug!("GET {location} -> {}", target.display());
        let resp = match self.agent.get(location).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {location}")));
            }
            Err(e) => return Err(RemoteError::Http(e.to_string())),
        };
        let total = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or(Some(meta.size).filter(|s| *s > 0));

        progress.start(&meta.name, total);
        let mut reader = ProgressReader::new(resp.into_body().into_reader(), progress);
        let copied = File::create(&target).and_then(|mut file| {
            std::io::copy(&mut reader, &mut file)?;
            file.sync_all()
        });
        progress.finish();
        if let Err(e) = copied {
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!("could not remove {}: {cleanup}", target.display());
            }
            return Err(RemoteError::Http(format!("downloading {location}: {e}")));
        }

        if wrapped {
            if dest.exists() {
                fs::remove_file(dest)?;
            }
            fs::rename(&target, dest)?;
        }
        Ok(())
    }
}

/// Pulls archives from the IPFS peer network through the local `ipfs` client.
pub struct PeerSource {
    ipfs_bin: String,
    ipfs_path: String,
}

impl PeerSource {
    pub fn new(ipfs_path: &str) -> Self {
        Self {
            ipfs_bin: "ipfs".to_owned(),
            ipfs_path: ipfs_path.to_owned(),
        }
    }

    #[must_use]
    pub fn with_binary(mut self, ipfs_bin: &str) -> Self {
        self.ipfs_bin = ipfs_bin.to_owned();
        self
    }

    fn ipfs(&self, args: &[&str]) -> Result<String, RemoteError> {
        debug!("{} {}", self.ipfs_bin, args.join(" "));
        let output = Command::new(&self.ipfs_bin)
            .args(args)
            .env("IPFS_PATH", &self.ipfs_path)
            .output()
            .map_err(|e| RemoteError::PeerCommand(format!("{}: {e}", self.ipfs_bin)))?;
        if !output.status.success() {
            return Err(RemoteError::PeerCommand(format!(
                "{} {}: {}",
                self.ipfs_bin,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ArchiveSource for PeerSource {
    fn name(&self) -> &'static str {
        "peer"
    }

    /// Available when pinned on the local node or announced by any provider.
    fn locate(&self, meta: &TemplateMetadata) -> Result<String, RemoteError> {
        let id = meta.id.as_str();
        debug!("checking template availability in the peer network");
        let local = self
            .ipfs(&["refs", "local"])
            .is_ok_and(|out| out.lines().any(|l| l.contains(id)));
        if local {
            return Ok(id.to_owned());
        }
        let provided = self
            .ipfs(&["--timeout=600s", "dht", "findprovs", "-n1", id])
            .is_ok_and(|out| !out.trim().is_empty());
        if provided {
            return Ok(id.to_owned());
        }
        Err(RemoteError::NotFound(format!(
            "template {} ({id}) in the peer network",
            meta.name
        )))
    }

    fn fetch(
        &self,
        meta: &TemplateMetadata,
        location: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<(), RemoteError> {
        info!("downloading {}", meta.name);
        if dest.is_dir() {
            fs::remove_dir_all(dest)?;
        }
        progress.start(&meta.name, Some(meta.size).filter(|s| *s > 0));
        let dest_str = dest.to_string_lossy();
        let result = self.ipfs(&["get", location, "-o", &dest_str]);
        progress.finish();
        result?;

        if dest.is_dir() {
            let inner = dest.join(format!("{}{WRAPPED_SUFFIX}", meta.name));
            let tmp = sibling(dest, "_unwrap");
            if tmp.exists() {
                fs::remove_file(&tmp)?;
            }
            fs::rename(&inner, &tmp)?;
            fs::remove_dir_all(dest)?;
            fs::rename(&tmp, dest)?;
        }
        Ok(())
    }

    fn after_verified(&self, meta: &TemplateMetadata) -> Result<(), RemoteError> {
        self.ipfs(&["pin", "add", meta.id.as_str()])?;
        Ok(())
    }
}
