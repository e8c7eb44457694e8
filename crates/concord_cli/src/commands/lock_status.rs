//! Lock status command implementation.

use crate::error::{CliError, CliResult};
use fs2::FileExt;
use std::fs::File;
use std::path::Path;

/// Whether a running instance holds the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No instance holds the lock.
    Free,
    /// Another process holds the lock.
    InUse,
}

/// Runs the lock-status command.
pub fn run(path: &Path, base: &str) -> CliResult<()> {
    match probe(path, base)? {
        LockStatus::Free => println!("{}: not in use", path.display()),
        LockStatus::InUse => println!("{}: in use by a running coordinator", path.display()),
    }
    Ok(())
}

/// Checks the lock with a shared lock that is dropped right away.
///
/// Never creates or removes the lock file. A coordinator starting in the
/// instant the shared lock is held still fails with `LogInUse`, so avoid
/// probing in a loop while a coordinator starts.
pub fn probe(path: &Path, base: &str) -> CliResult<LockStatus> {
    if !path.is_dir() {
        return Err(CliError::DirNotFound(path.to_path_buf()));
    }
    let lock_path = path.join(format!("{base}.lck"));
    if !lock_path.exists() {
        return Ok(LockStatus::Free);
    }

    let file = File::open(&lock_path).map_err(|source| CliError::LockFile {
        path: lock_path.clone(),
        source,
    })?;
    if file.try_lock_shared().is_err() {
        return Ok(LockStatus::InUse);
    }
    if let Err(e) = file.unlock() {
        tracing::warn!(lock = %lock_path.display(), error = %e, "could not drop probe lock");
    }
    Ok(LockStatus::Free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{Config, NoopResolver, TransactionService};

    #[test]
    fn reports_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new().log_dir(dir.path()).force_writes(false);
        let service = TransactionService::open(config, &NoopResolver).unwrap();

        assert_eq!(probe(dir.path(), "tmlog").unwrap(), LockStatus::InUse);
        assert_eq!(probe(dir.path(), "tmlog").unwrap(), LockStatus::InUse);
        assert!(service.holds_lock());

        service.shutdown();
        assert_eq!(probe(dir.path(), "tmlog").unwrap(), LockStatus::Free);
    }

    #[test]
    fn probing_leaves_lock_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe(dir.path(), "tmlog").unwrap(), LockStatus::Free);
        assert!(!dir.path().join("tmlog.lck").exists());

        std::fs::write(dir.path().join("tmlog.lck"), b"").unwrap();
        assert_eq!(probe(dir.path(), "tmlog").unwrap(), LockStatus::Free);
        assert!(dir.path().join("tmlog.lck").exists());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            probe(&dir.path().join("absent"), "tmlog"),
            Err(CliError::DirNotFound(_))
        ));
    }
}
