//! Tracking of completed, unacknowledged requests.
//!
//! One tracker per [`Direction`]. It owns the flat "seen" identifier set that
//! is mirrored to disk, one insertion-ordered entry list per [`EntryKind`],
//! and the grouped alert for each kind. Lifecycle:
//!
//! 1. [`CompletionTracker::load`] reads the list from disk and drops
//!    identifiers whose request is gone or runs the other way, then registers
//!    alerts for the rest. It runs in the background; until it reports back
//!    the set may be empty.
//! 2. Successes arrive through [`CompletionListener`]; dismissals through
//!    [`CompletionTracker::dismiss`] and [`CompletionTracker::dismiss_identifier`].
//!    Each change schedules a background save.
//! 3. [`CompletionTracker::flush`] writes synchronously at shutdown.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::core::client::CompletionListener;
use crate::core::executor::Spawn;
use crate::core::queue::RequestLookup;
use crate::core::request::{Request, RequestKind};
use crate::core::store::{DurableStore, StoreRef};
use crate::core::SchedulerError;
use crate::infra::completed_list::{CompletedListFiles, ListSource};
use crate::util::serde::{Durability, RequestKey};

pub use crate::core::request::Direction;

/// Activation depth used when paging in a request's result.
const RESULT_DEPTH: u32 = 5;

/// Completion group a finished request is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Fetches.
    Get,
    /// Single-file inserts.
    Put,
    /// Directory inserts.
    PutDir,
}

impl EntryKind {
    /// All kinds.
    pub const ALL: [Self; 3] = [Self::Get, Self::Put, Self::PutDir];

    /// Group of a request kind.
    pub const fn of(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Get => Self::Get,
            RequestKind::Put => Self::Put,
            RequestKind::PutDir { .. } => Self::PutDir,
        }
    }

    const fn noun(self) -> (&'static str, &'static str) {
        match self {
            Self::Get => ("Download", "downloads"),
            Self::Put => ("Upload", "uploads"),
            Self::PutDir => ("Site upload", "site uploads"),
        }
    }

    /// Alert title: the file name for a single entry, a count otherwise.
    pub fn title(self, entries: &[CompletionEntry]) -> String {
        let (single, plural) = self.noun();
        match entries {
            [only] => format!("{single} succeeded: {}", only.result_key.preferred_filename()),
            _ => format!("{} {plural} succeeded", entries.len()),
        }
    }
}

/// One finished, successful, unacknowledged request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEntry {
    /// Request identifier.
    pub identifier: String,
    /// Group.
    pub kind: EntryKind,
    /// Fetched key or final insert key.
    pub result_key: RequestKey,
    /// Size in bytes; total size for directories.
    pub size: u64,
    /// File count for directory inserts.
    pub files: Option<u32>,
    /// Whether the request lives in the durable store.
    pub durability: Durability,
}

/// Dismissible notification covering every pending entry of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionAlert {
    /// Group.
    pub kind: EntryKind,
    /// Aggregated title.
    pub title: String,
    /// Pending entries in completion order.
    pub entries: Vec<CompletionEntry>,
}

/// Receives alert registrations. Registering a kind replaces its previous alert.
pub trait AlertSink: Send + Sync {
    /// Show or update the alert for `alert.kind`.
    fn register(&self, alert: CompletionAlert);
    /// Hide the alert for `kind`.
    fn unregister(&self, kind: EntryKind);
}

/// Outcome of [`CompletionTracker::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Which file the list came from.
    pub source: ListSource,
    /// Identifiers kept.
    pub kept: usize,
    /// Identifiers dropped because their request is gone or mismatched.
    pub dropped: usize,
}

#[derive(Default)]
struct Groups {
    get: Mutex<Vec<CompletionEntry>>,
    put: Mutex<Vec<CompletionEntry>>,
    put_dir: Mutex<Vec<CompletionEntry>>,
}

impl Groups {
    const fn group(&self, kind: EntryKind) -> &Mutex<Vec<CompletionEntry>> {
        match kind {
            EntryKind::Get => &self.get,
            EntryKind::Put => &self.put,
            EntryKind::PutDir => &self.put_dir,
        }
    }
}

struct Shared {
    direction: Direction,
    seen: Mutex<BTreeSet<String>>,
    groups: Groups,
    files: CompletedListFiles,
    save_lock: Mutex<()>,
    alerts: Arc<dyn AlertSink>,
    store: Option<Arc<dyn DurableStore>>,
}

impl Shared {
    fn save(&self) -> Result<(), SchedulerError> {
        let _guard = self.save_lock.lock();
        let snapshot: Vec<String> = self.seen.lock().iter().cloned().collect();
        self.files.save(snapshot.iter().map(String::as_str))
    }

    fn entry_for(&self, request: &Request) -> Option<CompletionEntry> {
        if !request.has_finished() {
            debug!(identifier = request.identifier(), "request has not finished, no alert");
            return None;
        }
        let durable = request.is_persistent_forever();
        let result_ref = StoreRef::RequestResult(request.identifier().to_string());
        if let (true, Some(store)) = (durable, &self.store) {
            store.activate(result_ref.clone(), RESULT_DEPTH);
        }
        let success = request.success();
        if let (true, Some(store)) = (durable, &self.store) {
            store.deactivate(result_ref, RESULT_DEPTH);
        }
        let Some(success) = success else {
            error!(identifier = request.identifier(), "no result key for supposedly finished request");
            return None;
        };
        let files = match request.kind() {
            RequestKind::PutDir { files } => Some(files),
            RequestKind::Get | RequestKind::Put => None,
        };
        Some(CompletionEntry {
            identifier: request.identifier().to_string(),
            kind: EntryKind::of(request.kind()),
            result_key: success.result_key,
            size: success.size,
            files,
            durability: if durable {
                Durability::Durable
            } else {
                Durability::Transient
            },
        })
    }

    fn register_alert(&self, request: &Request) -> bool {
        let Some(entry) = self.entry_for(request) else {
            return false;
        };
        let kind = entry.kind;
        let alert = {
            let mut group = self.groups.group(kind).lock();
            group.retain(|e| e.identifier != entry.identifier);
            group.push(entry);
            CompletionAlert {
                kind,
                title: kind.title(&group),
                entries: group.clone(),
            }
        };
        debug!(identifier = request.identifier(), ?kind, "registered completion alert");
        self.alerts.register(alert);
        true
    }

    fn refresh_alert(&self, kind: EntryKind) {
        let alert = {
            let group = self.groups.group(kind).lock();
            if group.is_empty() {
                None
            } else {
                Some(CompletionAlert {
                    kind,
                    title: kind.title(&group),
                    entries: group.clone(),
                })
            }
        };
        match alert {
            Some(alert) => self.alerts.register(alert),
            None => self.alerts.unregister(kind),
        }
    }

    fn remove_identifier(&self, identifier: &str) -> bool {
        let mut found = self.seen.lock().remove(identifier);
        for kind in EntryKind::ALL {
            let removed = {
                let mut group = self.groups.group(kind).lock();
                let before = group.len();
                group.retain(|e| e.identifier != identifier);
                group.len() != before
            };
            if removed {
                found = true;
                self.refresh_alert(kind);
            }
        }
        found
    }

    fn reconcile(&self, identifiers: Vec<String>, lookup: &dyn RequestLookup) -> (usize, usize) {
        {
            let mut seen = self.seen.lock();
            seen.extend(identifiers.iter().cloned());
        }
        let mut kept = 0;
        let mut dropped = 0;
        for identifier in identifiers {
            let request = lookup
                .find_global(&identifier)
                .filter(|r| r.kind().direction() == self.direction);
            match request {
                Some(request) => {
                    self.register_alert(&request);
                    kept += 1;
                }
                None => {
                    debug!(identifier, "dropping completed identifier with no matching request");
                    self.seen.lock().remove(&identifier);
                    dropped += 1;
                }
            }
        }
        (kept, dropped)
    }
}

/// Tracks completed requests for one direction and mirrors the identifier set
/// to disk.
pub struct CompletionTracker<S: Spawn> {
    shared: Arc<Shared>,
    spawner: S,
}

impl<S: Spawn + Clone + 'static> CompletionTracker<S> {
    /// Tracker for `direction` storing its list under `node_dir`.
    pub fn new(
        direction: Direction,
        node_dir: impl AsRef<Path>,
        alerts: Arc<dyn AlertSink>,
        spawner: S,
    ) -> Self {
        Self::with_store(direction, node_dir, alerts, None, spawner)
    }

    /// Like [`CompletionTracker::new`], paging durable request results
    /// through `store`.
    pub fn with_store(
        direction: Direction,
        node_dir: impl AsRef<Path>,
        alerts: Arc<dyn AlertSink>,
        store: Option<Arc<dyn DurableStore>>,
        spawner: S,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                direction,
                seen: Mutex::new(BTreeSet::new()),
                groups: Groups::default(),
                files: CompletedListFiles::new(node_dir, direction),
                save_lock: Mutex::new(()),
                alerts,
                store,
            }),
            spawner,
        }
    }

    /// Direction tracked.
    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Read the list from disk, drop identifiers without a matching global
    /// request, register alerts for the rest, and rewrite the list if anything
    /// was dropped or it came from the legacy file. Runs in the background.
    pub fn load(&self, lookup: Arc<dyn RequestLookup>) -> oneshot::Receiver<Result<LoadReport, SchedulerError>> {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        self.spawner.spawn_blocking(move || {
            let loaded = shared.files.load();
            let rewrite = loaded.needs_rewrite();
            let source = loaded.source;
            let (kept, dropped) = shared.reconcile(loaded.identifiers, lookup.as_ref());
            let result = if dropped > 0 || rewrite {
                shared.save()
            } else {
                Ok(())
            };
            let result = result
                .map(|()| LoadReport { source, kept, dropped })
                .inspect_err(|e| error!(error = %e, "failed to rewrite completed list"));
            info!(direction = shared.direction.as_str(), ?source, kept, dropped, "loaded completed list");
            let _ = tx.send(result);
        });
        rx
    }

    /// Persist the identifier set in the background. Failures are logged; the
    /// receiver reports them to callers that care.
    pub fn save_off_thread(&self) -> oneshot::Receiver<Result<(), SchedulerError>> {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        self.spawner.spawn_blocking(move || {
            let result = shared.save();
            if let Err(e) = &result {
                error!(direction = shared.direction.as_str(), error = %e, "unable to save completed list");
            }
            let _ = tx.send(result);
        });
        rx
    }

    /// Persist the identifier set on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O failure.
    pub fn flush(&self) -> Result<(), SchedulerError> {
        self.shared.save()
    }

    /// Acknowledge every pending entry of `kind`.
    pub fn dismiss(&self, kind: EntryKind) -> oneshot::Receiver<Result<(), SchedulerError>> {
        let entries = std::mem::take(&mut *self.shared.groups.group(kind).lock());
        {
            let mut seen = self.shared.seen.lock();
            for entry in &entries {
                seen.remove(&entry.identifier);
            }
        }
        self.shared.alerts.unregister(kind);
        debug!(?kind, dismissed = entries.len(), "dismissed completion alert");
        self.save_off_thread()
    }

    /// Acknowledge a single entry. Returns `None` if it was not tracked.
    pub fn dismiss_identifier(&self, identifier: &str) -> Option<oneshot::Receiver<Result<(), SchedulerError>>> {
        if self.shared.remove_identifier(identifier) {
            Some(self.save_off_thread())
        } else {
            None
        }
    }

    /// Whether `identifier` is in the seen set.
    pub fn contains(&self, identifier: &str) -> bool {
        self.shared.seen.lock().contains(identifier)
    }

    /// The seen set, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        self.shared.seen.lock().iter().cloned().collect()
    }

    /// Pending entries of `kind` in completion order.
    pub fn pending(&self, kind: EntryKind) -> Vec<CompletionEntry> {
        self.shared.groups.group(kind).lock().clone()
    }
}

impl<S: Spawn + Clone + 'static> CompletionListener for CompletionTracker<S> {
    fn notify_success(&self, request: &Arc<Request>) {
        if request.kind().direction() != self.shared.direction {
            return;
        }
        self.shared
            .seen
            .lock()
            .insert(request.identifier().to_string());
        self.shared.register_alert(request);
        let _ = self.save_off_thread();
    }

    fn notify_failure(&self, request: &Arc<Request>) {
        debug!(identifier = request.identifier(), "failure not tracked");
    }

    fn on_remove(&self, request: &Arc<Request>) {
        if request.kind().direction() != self.shared.direction {
            return;
        }
        if self.shared.remove_identifier(request.identifier()) {
            let _ = self.save_off_thread();
        }
    }
}
