use crate::source::ArchiveSource;
use crate::{ProgressSink, RemoteError};
use std::fs;
use std::path::{Path, PathBuf};
use strata_schema::TemplateMetadata;
use strata_store::{verify_file, StoreError};
use tracing::{debug, info, warn};

/// Makes sure a verified archive of a template sits in the local cache.
///
/// Cache entries are keyed by template id. Every path into the cache ends in
/// digest verification: a cached entry that fails it is deleted and counts as
/// the one tolerated mismatch, a fresh download that fails it is deleted and
/// fetched once more, and a second mismatch is fatal. Transport failures are
/// retried up to `attempts` fetches. A template the source cannot locate is
/// never retried.
pub struct ArtifactFetcher {
    source: Box<dyn ArchiveSource>,
    cache_dir: PathBuf,
    attempts: u32,
}

impl ArtifactFetcher {
    pub fn new(source: Box<dyn ArchiveSource>, cache_dir: &Path, attempts: u32) -> Self {
        Self {
            source,
            cache_dir: cache_dir.to_path_buf(),
            attempts: attempts.max(1),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn cache_entry(&self, meta: &TemplateMetadata) -> PathBuf {
        self.cache_dir.join(meta.id.as_str())
    }

    pub fn ensure_local_archive(
        &self,
        meta: &TemplateMetadata,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, RemoteError> {
        let dest = self.cache_entry(meta);
        let mut mismatches = 0u32;

        if dest.is_file() {
            match verify_file(&dest, &meta.digest) {
                Ok(()) => {
                    debug!("using cached archive {}", dest.display());
                    return Ok(dest);
                }
                Err(StoreError::IntegrityFailure { .. }) => {
                    warn!(
                        "cached archive of {} is corrupted, downloading again",
                        meta.name
                    );
                    fs::remove_file(&dest)?;
                    mismatches = 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        fs::create_dir_all(&self.cache_dir)?;
        let location = self.source.locate(meta)?;
        let mut failures = 0u32;
        loop {
            if let Err(e) = self.source.fetch(meta, &location, &dest, progress) {
                if matches!(e, RemoteError::NotFound(_)) {
                    return Err(e);
                }
                failures += 1;
                remove_partial(&dest);
                if failures >= self.attempts {
                    return Err(e);
                }
                warn!(
                    "download of {} failed (attempt {failures}/{}): {e}",
                    meta.name, self.attempts
                );
                continue;
            }

            match verify_file(&dest, &meta.digest) {
                Ok(()) => break,
                Err(StoreError::IntegrityFailure {
                    expected, actual, ..
                }) => {
                    remove_partial(&dest);
                    mismatches += 1;
                    if mismatches > 1 {
                        return Err(RemoteError::IntegrityFailure {
                            key: format!("{} ({})", meta.name, meta.id),
                            expected,
                            actual,
                        });
                    }
                    warn!("archive of {} failed verification, fetching again", meta.name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.source.after_verified(meta) {
            warn!("post-download step for {} failed: {e}", meta.name);
        }
        info!("archive of {} verified", meta.name);
        Ok(dest)
    }
}

fn remove_partial(path: &Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    };
    if let Err(e) = removed {
        warn!("could not remove {}: {e}", path.display());
    }
}
