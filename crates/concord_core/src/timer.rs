//! Background timeout driver.

use crate::error::{CoreError, CoreResult};
use crate::service::TransactionService;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Calls [`TransactionService::tick`] at a fixed interval on a named
/// thread.
///
/// The thread holds only a weak reference to the service and stops once
/// the service is dropped, [`TimeoutDriver::stop`] is called, or the
/// driver is dropped.
#[derive(Debug)]
pub struct TimeoutDriver {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl TimeoutDriver {
    pub(crate) fn start(service: Weak<TransactionService>, interval: Duration) -> CoreResult<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("concord-timeout".to_string())
            .spawn(move || {
                let (stopped, wake) = &*signal;
                loop {
                    {
                        let mut stopped = stopped.lock();
                        if !*stopped {
                            wake.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    let Some(service) = service.upgrade() else {
                        break;
                    };
                    service.tick();
                }
                tracing::debug!("timeout driver stopped");
            })
            .map_err(|e| CoreError::sys(format!("failed to spawn timeout thread: {e}")))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "timeout driver started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stops the driver and waits for an in-flight tick to finish.
    pub fn stop(&mut self) {
        {
            let (stopped, wake) = &*self.stop;
            *stopped.lock() = true;
            wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("timeout thread panicked");
            }
        }
    }

    /// Whether the driver thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimeoutDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
