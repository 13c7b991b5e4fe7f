//! Builds a request queue, its store and both completion trackers from
//! configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;
use tracing::info;

use crate::config::{QueueConfig, RequestStoreConfig};
use crate::core::client::CompletionListener;
use crate::core::completion::{AlertSink, CompletionTracker, Direction, LoadReport};
use crate::core::executor::Spawn;
use crate::core::priority_index::PriorityIndex;
use crate::core::queue::{ReloadReport, RequestLookup, RequestQueue, TransferFactory};
use crate::core::store::{DurableStore, RequestStore};
use crate::core::{AppResult, SchedulerError};
use crate::infra::{FileRequestStore, InMemoryStore};

/// Receivers for the completed-list loads kicked off by [`QueueHandles::start`].
pub type LoadReceiver = oneshot::Receiver<Result<LoadReport, SchedulerError>>;

/// Result of [`QueueHandles::start`].
pub struct Startup {
    /// Requests rebuilt from the store.
    pub reload: ReloadReport,
    /// Pending load of the downloads list.
    pub downloads: LoadReceiver,
    /// Pending load of the uploads list.
    pub uploads: LoadReceiver,
}

/// Everything [`build_queue`] wires together.
pub struct QueueHandles<S: Spawn> {
    /// The queue.
    pub queue: Arc<RequestQueue>,
    /// Tracker for finished fetches.
    pub downloads: Arc<CompletionTracker<S>>,
    /// Tracker for finished inserts.
    pub uploads: Arc<CompletionTracker<S>>,
    /// Durable entity store, present with the in-memory backend.
    pub durable: Option<Arc<InMemoryStore>>,
    reloaded: AtomicBool,
}

impl<S: Spawn + Clone + 'static> QueueHandles<S> {
    /// Rebuild stored requests, then start loading both completed lists.
    ///
    /// The lists are reconciled against the global queue, so they must only
    /// load once the stored requests are back; otherwise every identifier
    /// looks orphaned and the lists are rewritten empty. The store is read on
    /// the first call only.
    ///
    /// # Errors
    ///
    /// A store-wide read failure from [`RequestQueue::reload`].
    pub fn start(&self, factory: &dyn TransferFactory) -> Result<Startup, SchedulerError> {
        let reload = if self.reloaded.swap(true, Ordering::SeqCst) {
            ReloadReport::default()
        } else {
            self.queue.reload(factory)?
        };
        let lookup: Arc<dyn RequestLookup> = Arc::clone(&self.queue) as Arc<dyn RequestLookup>;
        Ok(Startup {
            reload,
            downloads: self.downloads.load(Arc::clone(&lookup)),
            uploads: self.uploads.load(lookup),
        })
    }

    /// Write both completed lists on the calling thread.
    ///
    /// # Errors
    ///
    /// The first I/O failure.
    pub fn flush(&self) -> Result<(), SchedulerError> {
        self.downloads.flush()?;
        self.uploads.flush()
    }
}

/// Validate `cfg` and build the queue with its store and completion trackers.
/// Both trackers are registered as completion listeners of the global client.
///
/// # Errors
///
/// Invalid configuration, or a request store file that cannot be opened.
pub fn build_queue<S>(cfg: &QueueConfig, alerts: Arc<dyn AlertSink>, spawner: S) -> AppResult<QueueHandles<S>>
where
    S: Spawn + Clone + 'static,
{
    cfg.validate()
        .map_err(SchedulerError::InvalidConfig)
        .context("queue config invalid")?;

    let (requests, durable): (Arc<dyn RequestStore>, Option<Arc<InMemoryStore>>) = match &cfg.request_store {
        RequestStoreConfig::InMemory => {
            let store = Arc::new(InMemoryStore::new());
            (Arc::clone(&store) as Arc<dyn RequestStore>, Some(store))
        }
        RequestStoreConfig::File { path } => {
            let store = FileRequestStore::open(path)
                .with_context(|| format!("opening request store {}", path.display()))?;
            (Arc::new(store) as Arc<dyn RequestStore>, None)
        }
    };
    let entity_store = durable
        .as_ref()
        .map(|store| Arc::clone(store) as Arc<dyn DurableStore>);

    let index = Arc::new(PriorityIndex::new(entity_store.clone()));
    let queue = Arc::new(RequestQueue::new(index, Some(requests)));

    let downloads = Arc::new(CompletionTracker::with_store(
        Direction::Downloads,
        &cfg.node_dir,
        Arc::clone(&alerts),
        entity_store.clone(),
        spawner.clone(),
    ));
    let uploads = Arc::new(CompletionTracker::with_store(
        Direction::Uploads,
        &cfg.node_dir,
        alerts,
        entity_store,
        spawner,
    ));
    queue.add_completion_listener(Arc::clone(&downloads) as Arc<dyn CompletionListener>);
    queue.add_completion_listener(Arc::clone(&uploads) as Arc<dyn CompletionListener>);

    info!(node_dir = %cfg.node_dir.display(), store = ?cfg.request_store, "request queue built");
    Ok(QueueHandles {
        queue,
        downloads,
        uploads,
        durable,
        reloaded: AtomicBool::new(false),
    })
}
