//! Streaming log record iterator.
//!
//! Reads records one by one from the backend with a bounded buffer, so
//! recovery does not load the whole log into memory.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use crate::types::TxState;
use concord_storage::StorageBackend;
use parking_lot::MutexGuard;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A streaming iterator over log records.
///
/// Yields `(offset, LogRecord)` pairs.
///
/// # Error Handling
///
/// - A record cut short by a crash (incomplete header, payload or
///   checksum) ends the iteration cleanly; it was never acknowledged
/// - Bad magic, a newer version, an unknown state tag or a checksum
///   mismatch are returned as errors and end the iteration
pub struct LogRecordIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    /// Offset of `buffer[buffer_pos]` in the log.
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
    torn_tail: Option<u64>,
}

impl<'a> LogRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
            torn_tail: None,
        })
    }

    /// Offset of a torn record at the end of the log, once the iterator
    /// has reached it.
    #[must_use]
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_tail
    }

    /// Makes at least `min_bytes` available from `buffer_pos`.
    ///
    /// Returns `false` if the log ends first. The buffer grows for
    /// records larger than its default size.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let unread = self.total_size.saturating_sub(self.current_offset) as usize;
        if unread < min_bytes {
            return Ok(false);
        }

        if self.buffer_pos > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(unread - available);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn corruption(&mut self, message: String) -> CoreError {
        self.finished = true;
        CoreError::log_corruption(message)
    }

    fn end_torn(&mut self, offset: u64) -> CoreResult<Option<(u64, LogRecord)>> {
        tracing::warn!(offset, "torn record at end of log, ignoring");
        self.finished = true;
        self.torn_tail = Some(offset);
        Ok(None)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let offset = self.current_offset;
        if offset >= self.total_size {
            self.finished = true;
            return Ok(None);
        }

        if !self.ensure_buffered(HEADER_SIZE)? {
            return self.end_torn(offset);
        }

        let header = &self.buffer[self.buffer_pos..self.buffer_pos + HEADER_SIZE];
        let magic_ok = header[0..4] == LOG_MAGIC;
        let version = u16::from_le_bytes([header[4], header[5]]);
        let tag = header[6];
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        if !magic_ok {
            return Err(self.corruption(format!("invalid magic at offset {offset}")));
        }
        if version > LOG_VERSION {
            return Err(self.corruption(format!(
                "unsupported log version {version} at offset {offset}"
            )));
        }
        let Some(state) = TxState::from_byte(tag) else {
            return Err(self.corruption(format!("unknown state tag {tag} at offset {offset}")));
        };

        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if !self.ensure_buffered(total_len)? {
            return self.end_torn(offset);
        }

        let frame = &self.buffer[self.buffer_pos..self.buffer_pos + total_len];
        let crc_start = HEADER_SIZE + payload_len;
        let stored = u32::from_le_bytes([
            frame[crc_start],
            frame[crc_start + 1],
            frame[crc_start + 2],
            frame[crc_start + 3],
        ]);
        let computed = crc32fast::hash(&frame[..crc_start]);
        if stored != computed {
            self.finished = true;
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let record = match LogRecord::decode_payload(state, &frame[HEADER_SIZE..crc_start]) {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;
        Ok(Some((offset, record)))
    }
}

impl Iterator for LogRecordIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_record().transpose()
    }
}
