use serde::{Deserialize, Serialize};

fn default_url() -> String {
    "https://cdn.example.org/rest/v1/cdn".to_owned()
}

fn default_download_url() -> String {
    "https://cdn.example.org/ipfs/{ID}".to_owned()
}

fn default_ipfs_path() -> String {
    "/var/lib/ipfs".to_owned()
}

fn default_attempts() -> u32 {
    3
}

/// Where templates are resolved, downloaded and published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Base URL of the metadata service (`/template`, `/users/username`, `/template/upload`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Gateway URL with an `{ID}` placeholder. Anything that is not an
    /// absolute URL selects the peer network instead.
    #[serde(default = "default_download_url")]
    pub template_download_url: String,
    /// `IPFS_PATH` handed to the peer network client.
    #[serde(default = "default_ipfs_path")]
    pub ipfs_path: String,
    #[serde(default = "default_attempts")]
    pub download_attempts: u32,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            template_download_url: default_download_url(),
            ipfs_path: default_ipfs_path(),
            download_attempts: default_attempts(),
        }
    }
}

impl CdnConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_download_url(mut self, url: &str) -> Self {
        self.template_download_url = url.to_owned();
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_strips_trailing_slash() {
        let config = CdnConfig::new("https://cdn.example.org/rest/");
        assert_eq!(config.url, "https://cdn.example.org/rest");
        assert_eq!(config.download_attempts, 3);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: CdnConfig =
            serde_json::from_str(r#"{"url": "http://localhost:1/rest/"}"#).unwrap();
        assert_eq!(config.base_url(), "http://localhost:1/rest");
        assert_eq!(config.template_download_url, "https://cdn.example.org/ipfs/{ID}");
        assert_eq!(config.ipfs_path, "/var/lib/ipfs");
    }
}
