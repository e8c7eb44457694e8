//! Crash injection for recovery tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Where a [`CrashingBackend`] stops accepting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashMode {
    /// Append `n` records normally, then reject every further append.
    FailAfter(usize),
    /// Append `n` records normally; the next append writes only its first
    /// `keep` bytes (a torn write) and every later append is rejected.
    TearAfter {
        /// Appends that complete normally.
        appends: usize,
        /// Bytes of the torn append that reach storage.
        keep: usize,
    },
}

/// Wraps a backend and simulates the process dying at a chosen append.
///
/// Once the crash point is reached the backend behaves like a dead disk:
/// appends fail with [`StorageError::SimulatedCrash`] and nothing more is
/// written, while reads of the bytes already present keep working.
pub struct CrashingBackend<B> {
    inner: B,
    mode: CrashMode,
    appends: usize,
    crashed: bool,
}

impl<B: StorageBackend> CrashingBackend<B> {
    /// Wraps `inner`.
    pub fn new(inner: B, mode: CrashMode) -> Self {
        Self {
            inner,
            mode,
            appends: 0,
            crashed: false,
        }
    }

    /// Whether the crash point has been reached.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.crashed
    }

    fn crash(&mut self) -> StorageError {
        if !self.crashed {
            tracing::debug!(appends = self.appends, "simulated crash reached");
        }
        self.crashed = true;
        StorageError::SimulatedCrash {
            appends: self.appends,
        }
    }
}

impl<B: StorageBackend> StorageBackend for CrashingBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.crashed {
            return Err(self.crash());
        }
        match self.mode {
            CrashMode::FailAfter(limit) if self.appends >= limit => Err(self.crash()),
            CrashMode::TearAfter { appends, keep } if self.appends >= appends => {
                let torn = &data[..keep.min(data.len())];
                self.inner.append(torn)?;
                self.inner.sync()?;
                Err(self.crash())
            }
            _ => {
                let offset = self.inner.append(data)?;
                self.appends += 1;
                Ok(offset)
            }
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash());
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash());
        }
        self.inner.truncate(new_size)
    }

    /// Counts as one append. A crash at this point leaves the old
    /// contents untouched, as an interrupted rename would.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.crashed {
            return Err(self.crash());
        }
        let limit = match self.mode {
            CrashMode::FailAfter(limit) => limit,
            CrashMode::TearAfter { appends, .. } => appends,
        };
        if self.appends >= limit {
            return Err(self.crash());
        }
        self.inner.replace(data)?;
        self.appends += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn fail_after_keeps_earlier_appends() {
        let memory = InMemoryBackend::new();
        let mut backend = CrashingBackend::new(memory.clone(), CrashMode::FailAfter(2));

        backend.append(b"one").unwrap();
        backend.append(b"two").unwrap();
        assert!(!backend.has_crashed());

        let result = backend.append(b"three");
        assert!(matches!(
            result,
            Err(StorageError::SimulatedCrash { appends: 2 })
        ));
        assert!(backend.has_crashed());
        assert_eq!(memory.data(), b"onetwo");
    }

    #[test]
    fn tear_writes_a_prefix_then_dies() {
        let memory = InMemoryBackend::new();
        let mut backend = CrashingBackend::new(
            memory.clone(),
            CrashMode::TearAfter {
                appends: 1,
                keep: 2,
            },
        );

        backend.append(b"whole").unwrap();
        assert!(backend.append(b"torn").is_err());
        assert!(backend.append(b"later").is_err());
        assert!(backend.sync().is_err());
        assert_eq!(memory.data(), b"wholeto");
    }

    #[test]
    fn crash_at_replace_keeps_old_contents() {
        let memory = InMemoryBackend::new();
        let mut backend = CrashingBackend::new(memory.clone(), CrashMode::FailAfter(1));

        backend.append(b"in-doubt").unwrap();
        assert!(matches!(
            backend.replace(b"x"),
            Err(StorageError::SimulatedCrash { appends: 1 })
        ));
        assert_eq!(memory.data(), b"in-doubt");
    }
}
