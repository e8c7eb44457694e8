//! Test fixtures and service helpers.
//!
//! Provides services over temporary directories and shared in-memory
//! logs, both of which can be restarted to exercise recovery.

use concord_core::{Config, CoreResult, NoopResolver, ParticipantResolver, TransactionService};
use concord_storage::InMemoryBackend;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration tuned for tests: no fsync and a fixed id namespace.
pub fn test_config() -> Config {
    Config::new()
        .tm_unique_name("test")
        .force_writes(false)
        .tick_interval(Duration::from_millis(10))
}

/// A file-backed service in a temporary directory.
pub struct TestService {
    /// The running service.
    pub service: Arc<TransactionService>,
    config: Config,
    temp_dir: TempDir,
}

impl TestService {
    /// Opens a service with [`test_config`] in a fresh directory.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Opens a service with `config` in a fresh directory.
    ///
    /// The log directory of `config` is replaced by the temporary one.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = config.log_dir(temp_dir.path());
        let service = TransactionService::open(config.clone(), &NoopResolver)
            .expect("Failed to open transaction service");
        Self {
            service: Arc::new(service),
            config,
            temp_dir,
        }
    }

    /// Shuts the service down and opens a new one on the same log.
    pub fn restart(&mut self, resolver: &dyn ParticipantResolver) {
        self.service.shutdown();
        let service = TransactionService::open(self.config.clone(), resolver)
            .expect("Failed to reopen transaction service");
        self.service = Arc::new(service);
    }

    /// Tries to open a second service on the same directory.
    pub fn open_again(&self) -> CoreResult<TransactionService> {
        TransactionService::open(self.config.clone(), &NoopResolver)
    }

    /// The configuration the service was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The log directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestService {
    type Target = TransactionService;

    fn deref(&self) -> &Self::Target {
        &self.service
    }
}

/// An in-memory log shared by every service opened from it.
///
/// Opening a new service over the same `MemoryLog` is a restart: the
/// new service recovers what the old one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    backend: InMemoryBackend,
}

impl MemoryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the underlying bytes.
    pub fn backend(&self) -> InMemoryBackend {
        self.backend.clone()
    }

    /// Opens a service over this log.
    pub fn open(&self, config: Config, resolver: &dyn ParticipantResolver) -> TransactionService {
        TransactionService::open_with_backend(config, Box::new(self.backend.clone()), resolver)
            .expect("Failed to open in-memory transaction service")
    }

    /// Current log size in bytes.
    pub fn len(&self) -> usize {
        self.backend.data().len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs `f` against a fresh in-memory service.
///
/// # Example
///
/// ```rust,ignore
/// use concord_testkit::with_memory_service;
///
/// with_memory_service(|service| {
///     let tx = service.begin().unwrap();
///     tx.rollback().unwrap();
/// });
/// ```
pub fn with_memory_service<F, R>(f: F) -> R
where
    F: FnOnce(&TransactionService) -> R,
{
    let log = MemoryLog::new();
    let service = log.open(test_config(), &NoopResolver);
    f(&service)
}
