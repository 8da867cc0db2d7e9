use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_remote::CdnConfig;
use strata_store::StoreLayout;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/strata/agent.toml";

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "STRATA_CONFIG";

fn default_dataset() -> String {
    "subutai/fs".to_owned()
}

fn default_lxc_prefix() -> PathBuf {
    PathBuf::from("/var/lib/lxc")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/strata")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/run/strata/locks")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/strata/state")
}

fn default_lock_poll_ms() -> u64 {
    1000
}

fn default_datasets() -> String {
    "zfs".to_owned()
}

fn default_runtime() -> String {
    "lxc".to_owned()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_start_retries() -> u32 {
    5
}

fn default_retry_base_delay_secs() -> u64 {
    5
}

/// `[agent]`: where templates, containers and agent state live on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSection {
    /// Root dataset every template and container dataset is created under.
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_lxc_prefix")]
    pub lxc_prefix: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,
    /// Dataset backend: `zfs`, or `memory` for dry runs.
    #[serde(default = "default_datasets")]
    pub datasets: String,
    /// Container runtime: `lxc`, or `mock` for dry runs.
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            lxc_prefix: default_lxc_prefix(),
            cache_dir: default_cache_dir(),
            lock_dir: default_lock_dir(),
            state_dir: default_state_dir(),
            lock_poll_ms: default_lock_poll_ms(),
            datasets: default_datasets(),
            runtime: default_runtime(),
        }
    }
}

/// `[supervisor]`: pacing of the desired-state reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Start attempts after the first failed one.
    #[serde(default = "default_start_retries")]
    pub start_retries: u32,
    /// Delay before retry `n` (0-based) is `retry_base_delay_secs + n` seconds.
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            start_retries: default_start_retries(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self, retry: u32) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs + u64::from(retry))
    }
}

/// The agent config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub cdn: CdnConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl AgentConfig {
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load `path`. A missing file at the default location yields the
    /// defaults; a missing file anywhere else is an error.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display()))),
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && path == Path::new(DEFAULT_CONFIG_PATH) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(CoreError::Config(format!("{}: {e}", path.display()))),
        }
    }

    /// `explicit` if given, else `$STRATA_CONFIG`, else the default path.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Every host path under `root`, with in-memory datasets and runtime.
    pub fn rooted(root: &Path) -> Self {
        let layout = StoreLayout::new(root);
        Self {
            agent: AgentSection {
                dataset: "strata".to_owned(),
                lxc_prefix: layout.lxc_prefix().to_path_buf(),
                cache_dir: layout.cache_dir().to_path_buf(),
                lock_dir: layout.lock_dir().to_path_buf(),
                state_dir: layout.state_dir().to_path_buf(),
                lock_poll_ms: 20,
                datasets: "memory".to_owned(),
                runtime: "mock".to_owned(),
            },
            cdn: CdnConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::from_paths(
            &self.agent.lxc_prefix,
            &self.agent.cache_dir,
            &self.agent.lock_dir,
            &self.agent.state_dir,
        )
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.agent.lock_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.agent.dataset, "subutai/fs");
        assert_eq!(config.supervisor.interval(), Duration::from_secs(30));
        assert_eq!(config.cdn.download_attempts, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AgentConfig::from_toml(
            r#"
[agent]
cache_dir = "/srv/cache"

[cdn]
template_download_url = "local"

[supervisor]
start_retries = 2
"#,
        )
        .unwrap();
        assert_eq!(config.agent.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(config.agent.lxc_prefix, PathBuf::from("/var/lib/lxc"));
        assert_eq!(config.cdn.template_download_url, "local");
        assert_eq!(config.cdn.url, CdnConfig::default().url);
        assert_eq!(config.supervisor.start_retries, 2);
        assert_eq!(config.supervisor.interval_secs, 30);
    }

    #[test]
    fn retry_delays_grow_linearly() {
        let s = SupervisorConfig::default();
        let delays: Vec<u64> = (0..s.start_retries)
            .map(|i| s.retry_delay(i).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[agent\n").unwrap();
        assert!(matches!(AgentConfig::load(&path), Err(CoreError::Config(_))));
    }

    #[test]
    fn missing_non_default_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentConfig::load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let p = AgentConfig::locate(Some(Path::new("/tmp/x.toml")));
        assert_eq!(p, PathBuf::from("/tmp/x.toml"));
    }

    #[test]
    fn rooted_layout_stays_under_root() {
        let config = AgentConfig::rooted(Path::new("/tmp/strata"));
        let layout = config.layout();
        assert_eq!(layout.cache_dir(), Path::new("/tmp/strata/cache"));
        assert_eq!(config.agent.datasets, "memory");
    }
}
