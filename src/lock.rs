//! Store lock and atomic document writes.
//!
//! Every read and batch of the file store runs under one exclusive `fs2`
//! lock on `<data>/.store.lock`, polled until `store.lock_timeout_ms`.
//! Documents are replaced by writing a sibling temp file and renaming it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Used when `store.lock_timeout_ms` is not configured.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 20;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2 can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Exclusive hold on a store lock file; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Wait up to `timeout_ms` for the exclusive lock on `path`.
    ///
    /// The lock file is created if missing. Fails with `Error::LockFailed`
    /// once the timeout passes.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut waited = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    if waited {
                        tracing::debug!(lock = %path.display(), "store lock acquired after waiting");
                    }
                    return Ok(FileLock { file });
                }
                Err(err) if is_lock_contended(&err) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(lock = %path.display(), timeout_ms, "gave up waiting for store lock");
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    waited = true;
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Replace `path` with `data` in one rename; the caller holds the store lock.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Remove a file; returns false when it was already gone.
pub fn remove_if_exists(path: impl AsRef<Path>) -> Result<bool> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}
