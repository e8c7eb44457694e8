//! Transaction log writer and reader.

use crate::error::CoreResult;
use crate::log::iterator::LogRecordIterator;
use crate::log::record::LogRecord;
use crate::types::CoordinatorId;
use concord_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Manages the shared transaction log.
///
/// Every coordinator of a process appends through one `LogManager`. The
/// backend mutex serializes writers, so each coordinator's own records
/// stay in the order it produced them.
pub struct LogManager {
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    /// Whether to fsync after each record.
    force_writes: bool,
}

impl LogManager {
    /// Creates a log manager over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, force_writes: bool) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            force_writes,
        }
    }

    /// Appends a record and makes it durable before returning.
    ///
    /// Returns the offset of the record.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be encoded or the backend rejects the
    /// write, flush or sync. The record must then be treated as not
    /// written.
    pub fn append(&self, record: &LogRecord) -> CoreResult<u64> {
        let frame = record.encode_frame()?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&frame)?;
        backend.flush()?;
        if self.force_writes {
            backend.sync()?;
        }

        tracing::debug!(
            coordinator = %record.coordinator_id,
            state = %record.state,
            offset,
            "logged state transition"
        );
        Ok(offset)
    }

    /// Returns the current log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns a streaming iterator over the log.
    ///
    /// The iterator holds the log mutex; appends block until it is dropped.
    pub fn iter(&self) -> CoreResult<LogRecordIterator<'_>> {
        LogRecordIterator::new(self.backend.lock(), 0)
    }

    /// Reads every record in the log.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, LogRecord)>> {
        self.iter()?.collect()
    }

    /// Returns the latest record of every coordinator, ordered by id.
    ///
    /// A torn record at the end of the log is cut off so later appends
    /// are not hidden behind it.
    pub fn replay(&self) -> CoreResult<BTreeMap<CoordinatorId, LogRecord>> {
        let mut latest = BTreeMap::new();
        let mut iter = self.iter()?;
        for result in iter.by_ref() {
            let (_, record) = result?;
            latest.insert(record.coordinator_id.clone(), record);
        }
        let torn_tail = iter.torn_tail();
        drop(iter);

        if let Some(offset) = torn_tail {
            tracing::warn!(offset, "truncating torn log tail");
            let mut backend = self.backend.lock();
            backend.truncate(offset)?;
            backend.sync()?;
        }

        tracing::debug!(coordinators = latest.len(), "replayed transaction log");
        Ok(latest)
    }

    /// Rewrites the log so it holds exactly `records`, in order.
    ///
    /// Used by checkpoints to drop superseded records and those of
    /// forgotten coordinators. The new image replaces the log in one
    /// atomic step; if that fails the log is left as it was.
    pub fn compact<'r>(&self, records: impl IntoIterator<Item = &'r LogRecord>) -> CoreResult<()> {
        let mut image = Vec::new();
        let mut count = 0usize;
        for record in records {
            image.extend_from_slice(&record.encode_frame()?);
            count += 1;
        }

        let mut backend = self.backend.lock();
        let before = backend.size()?;
        backend.replace(&image)?;

        tracing::info!(
            records = count,
            before,
            after = image.len(),
            "compacted transaction log"
        );
        Ok(())
    }

    /// Whether every record is fsynced before `append` returns.
    #[must_use]
    pub fn force_writes(&self) -> bool {
        self.force_writes
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("force_writes", &self.force_writes)
            .finish_non_exhaustive()
    }
}
