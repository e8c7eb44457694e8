//! The process-wide transaction service.

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorSettings, CoordinatorSnapshot};
use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult};
use crate::log::LogManager;
use crate::participant::{ParticipantResolver, SuperiorRecoveryCoordinator};
use crate::recovery::RecoveryOrchestrator;
use crate::timer::TimeoutDriver;
use crate::types::{CoordinatorId, TxState};
use concord_storage::{FileBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owns the transaction log, its lock and every live coordinator.
///
/// Open one per process and log directory.
///
/// # Example
///
/// ```rust,ignore
/// use concord_core::{Config, NoopResolver, TransactionService};
///
/// let service = TransactionService::open(Config::new().log_dir("/var/lib/concord"), &NoopResolver)?;
/// let tx = service.begin()?;
/// tx.enlist(participant)?;
/// tx.commit(true)?;
/// ```
pub struct TransactionService {
    config: Config,
    settings: CoordinatorSettings,
    log: Arc<LogManager>,
    dir: Mutex<Option<LogDir>>,
    coordinators: RwLock<BTreeMap<CoordinatorId, Arc<Coordinator>>>,
    recovered: usize,
    is_open: RwLock<bool>,
}

impl TransactionService {
    /// Opens the log in `config.log_dir` and recovers it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] for an invalid configuration
    /// - [`CoreError::LogInUse`] if another instance holds the log
    /// - log corruption or I/O errors from recovery
    pub fn open(config: Config, resolver: &dyn ParticipantResolver) -> CoreResult<Self> {
        config.validate()?;
        let dir = LogDir::open(&config.log_dir, &config.log_base_name, config.create_if_missing)?;
        let backend = FileBackend::open_with_create_dirs(&dir.log_path())?;
        Self::open_inner(config, Box::new(backend), Some(dir), resolver)
    }

    /// Opens a service over an existing backend, without a directory lock.
    pub fn open_with_backend(
        config: Config,
        backend: Box<dyn StorageBackend>,
        resolver: &dyn ParticipantResolver,
    ) -> CoreResult<Self> {
        config.validate()?;
        Self::open_inner(config, backend, None, resolver)
    }

    fn open_inner(
        config: Config,
        backend: Box<dyn StorageBackend>,
        dir: Option<LogDir>,
        resolver: &dyn ParticipantResolver,
    ) -> CoreResult<Self> {
        let settings = CoordinatorSettings::from(&config);
        let log = Arc::new(LogManager::new(backend, config.force_writes));

        let report = RecoveryOrchestrator::new(&log, settings, resolver).run()?;
        let recovered = report.coordinators.len();
        let coordinators = report
            .coordinators
            .into_iter()
            .map(|c| (c.id().clone(), c))
            .collect();

        tracing::info!(
            tm = %config.tm_unique_name,
            recovered,
            "transaction service started"
        );

        Ok(Self {
            config,
            settings,
            log,
            dir: Mutex::new(dir),
            coordinators: RwLock::new(coordinators),
            recovered,
            is_open: RwLock::new(true),
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::sys("transaction service is shut down"))
        }
    }

    fn register(&self, coordinator: Coordinator) -> Arc<Coordinator> {
        let coordinator = Arc::new(coordinator);
        self.coordinators
            .write()
            .insert(coordinator.id().clone(), Arc::clone(&coordinator));
        coordinator
    }

    /// Begins a root transaction.
    pub fn begin(&self) -> CoreResult<Arc<Coordinator>> {
        self.ensure_open()?;
        let id = CoordinatorId::generate(&self.config.tm_unique_name);
        tracing::debug!(coordinator = %id, "begin");
        Ok(self.register(Coordinator::new(id, self.settings, Arc::clone(&self.log), None)))
    }

    /// Begins a transaction subordinate to `superior`.
    pub fn begin_subordinate(
        &self,
        superior: Arc<dyn SuperiorRecoveryCoordinator>,
    ) -> CoreResult<Arc<Coordinator>> {
        self.ensure_open()?;
        let id = CoordinatorId::generate(&self.config.tm_unique_name);
        tracing::debug!(coordinator = %id, superior = %superior.uri(), "begin subordinate");
        Ok(self.register(Coordinator::new(
            id,
            self.settings,
            Arc::clone(&self.log),
            Some(superior),
        )))
    }

    /// Looks up a live coordinator.
    #[must_use]
    pub fn coordinator(&self, id: &CoordinatorId) -> Option<Arc<Coordinator>> {
        self.coordinators.read().get(id).cloned()
    }

    /// Snapshots of every live coordinator, ordered by id.
    #[must_use]
    pub fn coordinators(&self) -> Vec<CoordinatorSnapshot> {
        self.live().iter().map(|c| c.snapshot()).collect()
    }

    /// Number of live coordinators.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.coordinators.read().len()
    }

    /// Number of unfinished coordinators recovered at startup.
    #[must_use]
    pub fn recovered_count(&self) -> usize {
        self.recovered
    }

    fn live(&self) -> Vec<Arc<Coordinator>> {
        self.coordinators.read().values().cloned().collect()
    }

    /// Delivers one timeout tick to every coordinator, then forgets those
    /// that terminated.
    pub fn tick(&self) {
        for coordinator in self.live() {
            coordinator.on_timeout();
        }
        let mut coordinators = self.coordinators.write();
        let before = coordinators.len();
        coordinators.retain(|_, c| c.state() != TxState::Terminated);
        let purged = before - coordinators.len();
        if purged > 0 {
            tracing::debug!(purged, live = coordinators.len(), "purged terminated coordinators");
        }
    }

    /// Starts a background thread ticking every `config.tick_interval`.
    pub fn start_timer(self: &Arc<Self>) -> CoreResult<TimeoutDriver> {
        self.ensure_open()?;
        TimeoutDriver::start(Arc::downgrade(self), self.config.tick_interval)
    }

    /// Rewrites the log to hold only the latest record of each logged,
    /// unfinished coordinator.
    ///
    /// Blocks new transactions and every coordinator for its duration.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let coordinators = self.coordinators.read();
        let guards: Vec<_> = coordinators.values().map(|c| c.lock_inner()).collect();
        let records: Vec<_> = guards
            .iter()
            .filter(|inner| {
                !matches!(inner.handler.state(), TxState::Active | TxState::Terminated)
            })
            .map(|inner| inner.handler.log_record(inner))
            .collect();

        self.log.compact(&records)?;
        tracing::info!(live = records.len(), "checkpoint complete");
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the transaction log.
    #[must_use]
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Whether the service still holds its log lock.
    #[must_use]
    pub fn holds_lock(&self) -> bool {
        self.dir.lock().as_ref().is_some_and(LogDir::is_locked)
    }

    /// Stops accepting transactions and releases the log lock.
    ///
    /// Idempotent. Unfinished coordinators stay in the log and are
    /// recovered by the next service.
    pub fn shutdown(&self) {
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return;
            }
            *is_open = false;
        }
        if let Some(mut dir) = self.dir.lock().take() {
            dir.release();
        }
        tracing::info!(live = self.active_count(), "transaction service shut down");
    }

    /// Whether the service is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }
}

impl Drop for TransactionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("tm", &self.config.tm_unique_name)
            .field("live", &self.active_count())
            .finish_non_exhaustive()
    }
}
