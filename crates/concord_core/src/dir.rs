//! Log directory management.
//!
//! ```text
//! <log_dir>/
//! ├─ <base>.lck     # Advisory lock: one coordinator process per log
//! └─ <base>.log     # Transaction log
//! ```
//!
//! Only the OS-level lock blocks a second process; a lock file left behind
//! by a process that died is reopened and locked again without complaint.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Holds the exclusive lock on a log directory.
///
/// Dropping a `LogDir` releases the lock and removes the lock file, the
/// same as [`LogDir::release`].
///
/// # Example
///
/// ```rust,ignore
/// use concord_core::dir::LogDir;
///
/// let dir = LogDir::open(Path::new("/var/lib/concord"), "tmlog", true)?;
/// println!("log: {:?}", dir.log_path());
/// ```
#[derive(Debug)]
pub struct LogDir {
    path: PathBuf,
    base_name: String,
    lock: Option<File>,
}

impl LogDir {
    /// Opens (or creates) the directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::LogInUse`] if the lock cannot be acquired, whatever
    ///   the reason; an attempt that fails in a way indistinguishable from
    ///   "held" must still stop startup
    /// - [`CoreError::InvalidConfig`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    pub fn open(path: &Path, base_name: &str, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_config(format!(
                    "log directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "log path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(format!("{base_name}.lck"));
        let in_use = || {
            tracing::error!(
                lock = %lock_path.display(),
                "the log seems to be in use already; make sure no other instance is running"
            );
            CoreError::LogInUse {
                path: lock_path.display().to_string(),
            }
        };

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|_| in_use())?;
        if lock.try_lock_exclusive().is_err() {
            return Err(in_use());
        }

        tracing::info!(dir = %path.display(), base = base_name, "acquired log lock");

        Ok(Self {
            path: path.to_path_buf(),
            base_name: base_name.to_string(),
            lock: Some(lock),
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the transaction log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(format!("{}.log", self.base_name))
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.path.join(format!("{}.lck", self.base_name))
    }

    /// Whether the lock is still held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Releases the lock and removes the lock file.
    ///
    /// Idempotent. Failures are logged, never returned: at shutdown there
    /// is nothing left to do about them.
    pub fn release(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        if let Err(e) = lock.unlock() {
            tracing::warn!(error = %e, "error releasing log lock");
        }
        drop(lock);

        let lock_path = self.lock_path();
        if let Err(e) = fs::remove_file(&lock_path) {
            tracing::warn!(lock = %lock_path.display(), error = %e, "could not remove lock file");
        } else {
            tracing::info!(lock = %lock_path.display(), "released log lock");
        }
    }
}

impl Drop for LogDir {
    fn drop(&mut self) {
        self.release();
    }
}
