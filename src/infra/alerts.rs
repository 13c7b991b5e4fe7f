//! In-memory alert sink.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::completion::{AlertSink, CompletionAlert, EntryKind};

/// Keeps the latest alert per kind.
#[derive(Default)]
pub struct InMemoryAlertSink {
    alerts: Mutex<BTreeMap<EntryKind, CompletionAlert>>,
    registrations: AtomicUsize,
}

impl InMemoryAlertSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current alert for `kind`.
    pub fn alert(&self, kind: EntryKind) -> Option<CompletionAlert> {
        self.alerts.lock().get(&kind).cloned()
    }

    /// All current alerts.
    pub fn active(&self) -> Vec<CompletionAlert> {
        self.alerts.lock().values().cloned().collect()
    }

    /// Total `register` calls so far.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::Relaxed)
    }
}

impl AlertSink for InMemoryAlertSink {
    fn register(&self, alert: CompletionAlert) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
        self.alerts.lock().insert(alert.kind, alert);
    }

    fn unregister(&self, kind: EntryKind) {
        self.alerts.lock().remove(&kind);
    }
}
