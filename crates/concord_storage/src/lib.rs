//! # Concord Storage
//!
//! Byte stores underneath the Concord transaction log.
//!
//! A backend is an **opaque, append-only byte store**: it knows nothing
//! about log records, coordinators or the two-phase-commit protocol. The
//! log manager in `concord_core` owns framing, checksums and replay.
//!
//! ## Design Principles
//!
//! - Appends are the only mutation besides whole-log compaction (`truncate`)
//! - `sync` must make every appended byte survive a process crash
//! - Backends are `Send + Sync` so one log can serve every coordinator
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - the production backend, one file per log
//! - [`InMemoryBackend`] - ephemeral; clones share bytes so a test can
//!   "restart" a service on the same log
//! - [`CrashingBackend`] - wraps another backend and fails or tears writes
//!   at a chosen point, for crash-recovery tests
//!
//! ## Example
//!
//! ```rust
//! use concord_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod crash;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use crash::{CrashMode, CrashingBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
