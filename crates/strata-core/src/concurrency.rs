use crate::CoreError;
use fs2::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_store::StoreLayout;
use tracing::debug;

/// What a lock serializes. Imports and destroys of the same key use
/// different locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Import,
    Destroy,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive per-key operation lock, visible to every process on the host.
///
/// Backed by an advisory lock on `<lock_dir>/<key>.<kind>.lock`; released
/// when dropped.
pub struct InstallLock {
    lock_file: File,
    path: PathBuf,
}

impl InstallLock {
    fn open(path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?)
    }

    pub fn try_acquire(
        layout: &StoreLayout,
        key: &str,
        kind: OperationKind,
    ) -> Result<Option<Self>, CoreError> {
        let path = layout.lock_file(key, kind.as_str());
        let file = Self::open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Block until the lock is ours, polling every `poll`.
    pub fn acquire(
        layout: &StoreLayout,
        key: &str,
        kind: OperationKind,
        poll: Duration,
    ) -> Result<Self, CoreError> {
        let mut waited = false;
        loop {
            if let Some(lock) = Self::try_acquire(layout, key, kind)? {
                if waited {
                    debug!("acquired {kind} lock for {key}");
                }
                return Ok(lock);
            }
            if !waited {
                debug!("waiting for {kind} lock on {key}");
                waited = true;
            }
            std::thread::sleep(poll);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C asks long-running loops to stop, the second one exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current cycle...");
    });
}

pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN_REQUESTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn lock_file_is_named_by_key_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let lock = InstallLock::acquire(
            &layout,
            "base:pub:1.0.0",
            OperationKind::Import,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(lock.path(), layout.lock_file("base:pub:1.0.0", "import"));
        assert!(lock.path().exists());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let _held = InstallLock::try_acquire(&layout, "k", OperationKind::Import)
            .unwrap()
            .unwrap();
        assert!(InstallLock::try_acquire(&layout, "k", OperationKind::Import)
            .unwrap()
            .is_none());
        // A different operation on the same key is independent.
        assert!(InstallLock::try_acquire(&layout, "k", OperationKind::Destroy)
            .unwrap()
            .is_some());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        {
            let _lock = InstallLock::try_acquire(&layout, "k", OperationKind::Destroy).unwrap();
        }
        assert!(InstallLock::try_acquire(&layout, "k", OperationKind::Destroy)
            .unwrap()
            .is_some());
    }

    #[test]
    fn acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StoreLayout::new(dir.path()));
        let held = InstallLock::try_acquire(&layout, "k", OperationKind::Import)
            .unwrap()
            .unwrap();

        let l = Arc::clone(&layout);
        let start = Instant::now();
        let waiter = std::thread::spawn(move || {
            InstallLock::acquire(&l, "k", OperationKind::Import, Duration::from_millis(10))
                .map(|_| start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        let waited = waiter.join().unwrap().unwrap();
        assert!(waited >= Duration::from_millis(100));
    }
}
