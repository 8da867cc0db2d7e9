use crate::StoreError;
use md5::Md5;
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use strata_schema::{Digest, DigestMethod};
use tracing::debug;

const BUF_SIZE: usize = 64 * 1024;

fn stream_hash<H: sha2::Digest>(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path)?;
    let mut hasher = H::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex digest of a file's content.
pub fn file_digest(path: &Path, method: DigestMethod) -> Result<String, StoreError> {
    match method {
        DigestMethod::Md5 => stream_hash::<Md5>(path),
        DigestMethod::Sha256 => stream_hash::<Sha256>(path),
    }
}

/// Check a file against its declared digest.
pub fn verify_file(path: &Path, expected: &Digest) -> Result<(), StoreError> {
    let actual = file_digest(path, expected.method)?;
    if actual != expected.hash {
        return Err(StoreError::IntegrityFailure {
            path: path.display().to_string(),
            expected: format!("{}:{}", expected.method, expected.hash),
            actual: format!("{}:{actual}", expected.method),
        });
    }
    debug!("{} matches {} digest", path.display(), expected.method);
    Ok(())
}
