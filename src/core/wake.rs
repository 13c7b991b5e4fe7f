//! Condvar-based wake notifications between the queue and the starter.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Level-triggered wake flag. `notify` sets it; `wait_for` consumes it or
/// times out.
#[derive(Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    /// New signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that new work may be runnable.
    pub fn notify(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_one();
    }

    /// Block until notified or `timeout` elapses. Returns true if a
    /// notification was consumed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.condvar.wait_for(&mut pending, timeout);
        }
        std::mem::take(&mut *pending)
    }
}
