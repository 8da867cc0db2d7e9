//! Remote side of template distribution for Strata.
//!
//! `MetadataService` resolves references against the CDN metadata endpoint,
//! checks name uniqueness, maps tokens to owners and uploads exported archives.
//! `ArtifactFetcher` makes sure a verified archive of a template sits in the
//! local cache, pulling it through an `ArchiveSource` (HTTP gateway, IPFS peer
//! network, or a local mirror directory) when it does not.

pub mod config;
pub mod fetch;
pub mod http;
pub mod mock;
pub mod source;
#[cfg(test)]
mod testutil;

pub use config::CdnConfig;
pub use fetch::ArtifactFetcher;
pub use http::HttpMetadataService;
pub use mock::{DirectorySource, FetchCounter, StaticCatalog};
pub use source::{select_source, ArchiveSource, GatewaySource, PeerSource};

use std::path::Path;
use strata_schema::{TemplateKey, TemplateMetadata, TemplateReference};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service returned HTTP {status} for {url}")]
    Service { status: u16, url: String },
    #[error("malformed service response: {0}")]
    Parse(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("integrity failure for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),
    #[error("peer network command failed: {0}")]
    PeerCommand(String),
}

/// Byte progress of a long transfer.
pub trait ProgressSink: Send + Sync {
    fn start(&self, _label: &str, _total: Option<u64>) {}

    fn advance(&self, _bytes: u64) {}

    fn finish(&self) {}
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// The template catalog.
pub trait MetadataService: Send + Sync {
    fn resolve(&self, reference: &TemplateReference) -> Result<TemplateMetadata, RemoteError>;

    /// True when a template with exactly this key is already published.
    fn exists(&self, key: &TemplateKey) -> Result<bool, RemoteError>;

    /// Owner name bound to an API token.
    fn owner_for_token(&self, token: &str) -> Result<String, RemoteError>;

    /// Publish an archive; returns the service's response body.
    fn upload(
        &self,
        archive: &Path,
        token: &str,
        progress: &dyn ProgressSink,
    ) -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_display() {
        let e = RemoteError::Service {
            status: 503,
            url: "https://cdn/template".to_owned(),
        };
        assert_eq!(e.to_string(), "service returned HTTP 503 for https://cdn/template");
    }

    #[test]
    fn store_integrity_is_wrapped() {
        let e: RemoteError = strata_store::StoreError::InvalidArchive("x".to_owned()).into();
        assert!(e.to_string().contains("invalid archive"));
    }
}
