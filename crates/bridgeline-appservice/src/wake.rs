//! Wake signal between the consumer and one worker.

use std::sync::Mutex;

use tokio::sync::Notify;

/// Pending-event counter plus an async notification.
///
/// The counter is a hint; the queue is authoritative. It starts at 1 so a
/// freshly started worker drains whatever a previous run left behind.
#[derive(Debug)]
pub struct WakeSignal {
    pending: Mutex<u64>,
    notify: Notify,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    pub fn new() -> Self {
        Self { pending: Mutex::new(1), notify: Notify::new() }
    }

    /// Record one more queued event and wake the worker. Never blocks on the
    /// worker; if it is not waiting the wakeup is kept for its next wait.
    pub fn signal(&self) {
        *self.lock() += 1;
        self.notify.notify_one();
    }

    /// Read and reset the counter.
    pub fn take(&self) -> u64 {
        std::mem::take(&mut *self.lock())
    }

    pub fn pending(&self) -> u64 {
        *self.lock()
    }

    /// Wait until the counter is non-zero, then take it.
    ///
    /// Spurious and stale wakeups are absorbed by re-checking the counter.
    pub async fn wait(&self) -> u64 {
        loop {
            let notified = self.notify.notified();
            let n = self.take();
            if n > 0 {
                return n;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u64> {
        // The counter is a plain integer; a poisoned lock still holds a usable value.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
