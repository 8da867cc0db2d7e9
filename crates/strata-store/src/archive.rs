use crate::{fsync_dir, StoreError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Pack `source_dir` into a gzip tar at `dest`.
///
/// Entry paths are relative to `source_dir` (`config`, `deltas/rootfs.delta`).
/// Entries are sorted, timestamps are zeroed and ownership is 0:0, so the same
/// tree always produces the same tar stream. The archive is written to a
/// temporary file next to `dest` and renamed into place.
pub fn pack_archive(source_dir: &Path, dest: &Path) -> Result<u64, StoreError> {
    if !source_dir.is_dir() {
        return Err(StoreError::InvalidArchive(format!(
            "{} is not a directory",
            source_dir.display()
        )));
    }
    let mut entries = collect_entries(source_dir, source_dir)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let tmp = NamedTempFile::new_in(parent)?;
    {
        let encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
        let mut ar = tar::Builder::new(encoder);
        ar.follow_symlinks(false);

        for (rel_path, full_path) in &entries {
            let ft = match full_path.symlink_metadata() {
                Ok(m) => m.file_type(),
                Err(e) => {
                    warn!("skipping {rel_path}: metadata error: {e}");
                    continue;
                }
            };
            if ft.is_file() {
                append_file(&mut ar, rel_path, full_path)?;
            } else if ft.is_dir() {
                append_dir(&mut ar, rel_path, full_path)?;
            } else if ft.is_symlink() {
                append_symlink(&mut ar, rel_path, full_path)?;
            } else {
                warn!("skipping unsupported file type: {rel_path}");
            }
        }

        let mut writer = ar.into_inner()?.finish()?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(parent)?;

    let size = fs::metadata(dest)?.len();
    debug!(
        "packed {} entries from {} into {} ({size} bytes)",
        entries.len(),
        source_dir.display(),
        dest.display()
    );
    Ok(size)
}

/// Extract a gzip tar archive into `target_dir`, creating it if needed.
pub fn unpack_archive(archive: &Path, target_dir: &Path) -> Result<(), StoreError> {
    let file = File::open(archive)?;
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir).map_err(|e| {
        StoreError::InvalidArchive(format!("{}: {e}", archive.display()))
    })?;
    debug!("unpacked {} into {}", archive.display(), target_dir.display());
    Ok(())
}

/// Recursively collect (relative_path, full_path) pairs from a directory tree.
fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .to_string();

        if full.symlink_metadata()?.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    header.set_size(if entry_type == tar::EntryType::Regular {
        meta.len()
    } else {
        0
    });
    Ok(header)
}

fn append_file<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_cksum();
    let file = File::open(full_path)?;
    ar.append_data(&mut header, rel_path, BufReader::new(file))?;
    Ok(())
}

fn append_dir<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_cksum();
    let path = if rel_path.ends_with('/') {
        rel_path.to_owned()
    } else {
        format!("{rel_path}/")
    };
    ar.append_data(&mut header, &path, std::io::empty())?;
    Ok(())
}

fn append_symlink<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_cksum();
    ar.append_link(&mut header, rel_path, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_dir(dir: &Path) {
        fs::create_dir_all(dir.join("deltas")).unwrap();
        fs::write(dir.join("config"), "subutai.template = base\n").unwrap();
        for p in ["rootfs", "home", "var", "opt"] {
            fs::write(dir.join("deltas").join(format!("{p}.delta")), p.repeat(64)).unwrap();
        }
    }

    #[test]
    fn pack_unpack_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("base-subutai-template_1.0.0_amd64");
        template_dir(&src);

        let archive = dir.path().join("base.tar.gz");
        let size = pack_archive(&src, &archive).unwrap();
        assert_eq!(size, fs::metadata(&archive).unwrap().len());

        let out = dir.path().join("out");
        unpack_archive(&archive, &out).unwrap();
        assert_eq!(
            fs::read_to_string(out.join("config")).unwrap(),
            "subutai.template = base\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("deltas/opt.delta")).unwrap(),
            "opt".repeat(64)
        );
    }

    #[test]
    fn pack_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        template_dir(&src);

        let a = dir.path().join("a.tar.gz");
        let b = dir.path().join("b.tar.gz");
        pack_archive(&src, &a).unwrap();
        pack_archive(&src, &b).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn pack_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = pack_archive(&dir.path().join("nope"), &dir.path().join("x.tar.gz"));
        assert!(matches!(result, Err(StoreError::InvalidArchive(_))));
    }

    #[test]
    fn unpack_garbage_is_invalid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.tar.gz");
        fs::write(&bogus, b"definitely not gzip").unwrap();
        assert!(matches!(
            unpack_archive(&bogus, &dir.path().join("out")),
            Err(StoreError::InvalidArchive(_))
        ));
    }
}
