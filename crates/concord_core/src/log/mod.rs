//! Durable transaction log.
//!
//! Every coordinator state transition is appended as one record and made
//! durable before the protocol call that caused it returns. The latest
//! record per coordinator id is its durable state.
//!
//! ## Record Format
//!
//! ```text
//! | magic "CTXL" (4) | version (2) | state tag (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers header and payload.

mod iterator;
mod record;
mod writer;

pub use iterator::LogRecordIterator;
pub use record::{HandlerPayload, LogRecord, ParticipantEntry, LOG_MAGIC, LOG_VERSION};
pub use writer::LogManager;

/// Milliseconds since the Unix epoch, for record timestamps.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
