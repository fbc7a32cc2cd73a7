// src/lock.rs

//! Interprocess staging lock
//!
//! A sentinel file inside the `.config` directory is locked exclusively for
//! the whole staging run. The lock is advisory and per-machine; its contents
//! (`pid=` / `created_at=`) exist only for humans diagnosing a stuck run.

use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Platform advisory-lock capability
///
/// The rest of the crate depends only on this trait; `fs2` supplies the
/// `flock`/`LockFileEx` implementations for [`File`].
pub trait AdvisoryLock {
    /// Try to take the exclusive lock; `Ok(false)` means it is contended
    fn try_lock_exclusive_nonblocking(&self) -> io::Result<bool>;

    /// Block until the exclusive lock is held
    fn lock_exclusive_blocking(&self) -> io::Result<()>;

    /// Release the lock
    fn release_lock(&self) -> io::Result<()>;
}

impl AdvisoryLock for File {
    fn try_lock_exclusive_nonblocking(&self) -> io::Result<bool> {
        match FileExt::try_lock_exclusive(self) {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn lock_exclusive_blocking(&self) -> io::Result<()> {
        FileExt::lock_exclusive(self)
    }

    fn release_lock(&self) -> io::Result<()> {
        FileExt::unlock(self)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// An acquired staging lock; released on [`StagingLock::release`] or drop
#[derive(Debug)]
pub struct StagingLock {
    file: Option<File>,
    path: PathBuf,
}

impl StagingLock {
    /// Acquire the lock at `path`, waiting if another process holds it
    ///
    /// Contention prints a notice and blocks; any other failure to open or
    /// lock the sentinel is fatal.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| Error::Lock {
                path: path.to_path_buf(),
                source,
            })?;

        let locked = file
            .try_lock_exclusive_nonblocking()
            .map_err(|source| Error::Lock {
                path: path.to_path_buf(),
                source,
            })?;
        if !locked {
            eprintln!("confik: another instance is running, waiting for lock...");
            file.lock_exclusive_blocking().map_err(|source| Error::Lock {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let mut lock = Self {
            file: Some(file),
            path: path.to_path_buf(),
        };
        if let Err(e) = lock.write_metadata() {
            warn!("Failed to write lock metadata to {}: {}", path.display(), e);
        }

        debug!("Acquired staging lock at {}", path.display());
        Ok(lock)
    }

    /// Path of the sentinel file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock is still held by this handle
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the lock and close the handle; calling it again is a no-op
    pub fn release(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let result = file.release_lock();
        drop(file);
        debug!("Released staging lock at {}", self.path.display());
        result.map_err(Error::Io)
    }

    fn write_metadata(&mut self) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        write!(file, "pid={}\ncreated_at={}\n", std::process::id(), stamp)?;
        file.sync_all()
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!("Failed to release lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_acquire_writes_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");

        let mut lock = StagingLock::acquire(&lock_path).unwrap();
        assert!(lock.is_held());

        let content = fs::read_to_string(&lock_path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            format!("pid={}", std::process::id())
        );
        assert!(lines.next().unwrap().starts_with("created_at="));

        lock.release().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");

        let mut lock = StagingLock::acquire(&lock_path).unwrap();
        assert!(lock.release().is_ok());
        assert!(lock.release().is_ok());
    }

    #[test]
    fn test_contended_lock_is_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");

        let mut lock = StagingLock::acquire(&lock_path).unwrap();

        // A second descriptor sees the lock as contended
        let other = OpenOptions::new().read(true).write(true).open(&lock_path).unwrap();
        assert!(!other.try_lock_exclusive_nonblocking().unwrap());

        lock.release().unwrap();
        assert!(other.try_lock_exclusive_nonblocking().unwrap());
        other.release_lock().unwrap();
    }

    #[test]
    fn test_acquire_blocks_until_holder_releases() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");
        let mut holder = StagingLock::acquire(&lock_path).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let path = lock_path.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let lock = StagingLock::acquire(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
                lock
            })
        };

        thread::sleep(Duration::from_millis(300));
        assert!(!acquired.load(Ordering::SeqCst), "acquire returned while contended");

        // Marks the sentinel so the new holder's metadata is recognisable
        fs::write(&lock_path, "stale\n").unwrap();
        holder.release().unwrap();

        let lock = waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(lock.is_held());

        let content = fs::read_to_string(&lock_path).unwrap();
        assert!(!content.contains("stale"));
        assert!(content.starts_with(&format!("pid={}\n", std::process::id())));
        assert!(content.contains("created_at="));
    }

    #[test]
    fn test_reacquire_after_release() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");

        let mut first = StagingLock::acquire(&lock_path).unwrap();
        first.release().unwrap();

        let second = StagingLock::acquire(&lock_path).unwrap();
        assert!(second.is_held());
        assert_eq!(second.path(), lock_path.as_path());
    }

    #[test]
    fn test_acquire_in_missing_directory_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join("missing").join(".confik.lock");

        let result = StagingLock::acquire(&lock_path);
        assert!(matches!(result.unwrap_err(), Error::Lock { .. }));
    }
}
