//! Advisory workbook lock
//!
//! A sentinel file `.<name>.lock` next to the workbook marks it as owned by
//! one writer. Creation is atomic (`create_new`), so two processes can never
//! both hold it. The lock is cooperative: nothing stops a tool that ignores it.

use crate::error::{GuardError, GuardResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Held lock; the sentinel is removed on drop
#[derive(Debug)]
pub struct FileLock {
    target: PathBuf,
    lock_path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Sentinel path for `target`
    pub fn lock_path_for(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{}.lock", name))
    }

    /// Retry until the sentinel can be created or `timeout` elapses
    pub fn acquire(target: &Path, timeout: Duration, poll_interval: Duration) -> GuardResult<Self> {
        let lock_path = Self::lock_path_for(target);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(mut file) => {
                    // Owner pid for humans inspecting a stale lock
                    let _ = writeln!(file, "{}", std::process::id());
                    tracing::debug!(path = %lock_path.display(), "lock acquired");
                    return Ok(Self {
                        target: target.to_path_buf(),
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        tracing::warn!(path = %target.display(), "lock wait timed out");
                        return Err(GuardError::LockTimeout {
                            path: target.to_path_buf(),
                            timeout,
                        });
                    }
                    thread::sleep(poll_interval);
                }
                Err(e) => return Err(GuardError::Io(e)),
            }
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Remove the sentinel now instead of at drop
    pub fn release(mut self) -> GuardResult<()> {
        self.remove_sentinel()?;
        Ok(())
    }

    fn remove_sentinel(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {
                tracing::debug!(path = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.remove_sentinel() {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_millis(150);
    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn test_lock_path_is_hidden_sibling() {
        let path = FileLock::lock_path_for(Path::new("/data/model.xlsx"));
        assert_eq!(path, PathBuf::from("/data/.model.xlsx.lock"));
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("model.xlsx");

        let held = FileLock::acquire(&target, SHORT, POLL).unwrap();
        assert!(held.lock_path().exists());

        match FileLock::acquire(&target, SHORT, POLL) {
            Err(GuardError::LockTimeout { path, timeout }) => {
                assert_eq!(path, target);
                assert_eq!(timeout, SHORT);
            }
            other => panic!("expected LockTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("model.xlsx");

        let lock_path = {
            let held = FileLock::acquire(&target, SHORT, POLL).unwrap();
            held.lock_path().to_path_buf()
        };
        assert!(!lock_path.exists());
        assert!(FileLock::acquire(&target, SHORT, POLL).is_ok());
    }

    #[test]
    fn test_explicit_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("model.xlsx");

        let held = FileLock::acquire(&target, SHORT, POLL).unwrap();
        let lock_path = held.lock_path().to_path_buf();
        held.release().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("model.xlsx");
        let held = FileLock::acquire(&target, SHORT, POLL).unwrap();

        let waiter_target = target.clone();
        let waiter = thread::spawn(move || {
            FileLock::acquire(&waiter_target, Duration::from_secs(5), POLL).map(|l| l.release())
        });
        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
