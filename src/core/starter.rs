//! Request starter: pulls runnable transfers from the queue and runs them on
//! dedicated OS threads.
//!
//! One selector thread asks the [`RequestQueue`] for the next runnable
//! transfer, skipping anything already in flight, and hands it to a worker
//! over a bounded channel. Each worker owns a single-threaded tokio runtime
//! and drives a [`TransferExecutor`] to completion before reporting the
//! result back to the queue.
//!
//! Shutdown drops the channel by stopping the selector; workers drain and
//! exit on their own.
//!
//! # Design Principles
//!
//! - **No polling**: the selector sleeps on the queue's [`WakeSignal`](crate::core::WakeSignal) when
//!   nothing is runnable and is woken by inserts and finished runs
//! - **One run per transfer**: the in-flight set is consulted as an exclusion
//!   policy, so a resident transfer is never handed to two workers
//! - **Backpressure**: the bounded channel stops the selector from pulling
//!   more work than the workers can take

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StarterConfig;
use crate::core::executor::{TransferExecutor, TransferResult};
use crate::core::grab_array::{ExclusionPolicy, GrabItem};
use crate::core::priority_index::Selection;
use crate::core::queue::RequestQueue;
use crate::core::request::Transfer;
use crate::core::SchedulerError;
use crate::util::serde::ItemId;

/// Extra exclusion rule applied on top of the in-flight set.
pub type SharedPolicy = Arc<dyn ExclusionPolicy<dyn Transfer> + Send + Sync>;

/// Point-in-time starter statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StarterStats {
    /// Worker threads.
    pub worker_count: usize,
    /// Transfers handed to workers.
    pub selected: u64,
    /// Runs that ended the owning request.
    pub completed: u64,
    /// Runs that made progress and went back into the index.
    pub continued: u64,
    /// Transfers currently running.
    pub in_flight: u64,
}

#[derive(Default)]
struct StarterCounters {
    selected: AtomicU64,
    completed: AtomicU64,
    continued: AtomicU64,
}

/// Items currently held by a worker.
#[derive(Default)]
struct InFlight {
    items: Mutex<HashSet<ItemId>>,
}

impl InFlight {
    fn insert(&self, id: ItemId) {
        self.items.lock().insert(id);
    }

    fn remove(&self, id: &ItemId) {
        self.items.lock().remove(id);
    }

    fn contains(&self, id: &ItemId) -> bool {
        self.items.lock().contains(id)
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

struct SelectorPolicy<'a> {
    in_flight: &'a InFlight,
    extra: Option<&'a SharedPolicy>,
}

impl ExclusionPolicy<dyn Transfer> for SelectorPolicy<'_> {
    fn exclude(&self, item: &(dyn Transfer + 'static)) -> bool {
        self.in_flight.contains(&item.item_id())
            || self.extra.is_some_and(|policy| policy.exclude(item))
    }
}

/// Background scheduler that keeps workers fed from a [`RequestQueue`].
pub struct RequestStarter<E: TransferExecutor> {
    config: StarterConfig,
    queue: Arc<RequestQueue>,
    in_flight: Arc<InFlight>,
    counters: Arc<StarterCounters>,
    shutdown: Arc<AtomicBool>,
    selector: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    _executor: PhantomData<E>,
}

impl<E: TransferExecutor> RequestStarter<E> {
    /// Start the selector and `config.worker_count` workers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the config fails validation, `Io` if a thread
    /// cannot be spawned.
    pub fn new(config: StarterConfig, queue: Arc<RequestQueue>, executor: E) -> Result<Self, SchedulerError> {
        Self::with_policy(config, queue, executor, None)
    }

    /// Like [`RequestStarter::new`] with an extra exclusion rule consulted
    /// after the in-flight check.
    ///
    /// # Errors
    ///
    /// Same as [`RequestStarter::new`].
    pub fn with_policy(
        config: StarterConfig,
        queue: Arc<RequestQueue>,
        executor: E,
        policy: Option<SharedPolicy>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let (tx, rx) = bounded::<Selection>(config.channel_depth);
        let in_flight = Arc::new(InFlight::default());
        let counters = Arc::new(StarterCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let spawned = spawn_worker(
                worker_id,
                rx.clone(),
                Arc::clone(&queue),
                Arc::clone(&in_flight),
                Arc::clone(&counters),
                executor.clone(),
                config.thread_stack_size,
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Closing the channel lets the workers already started exit.
                    drop(tx);
                    return Err(e.into());
                }
            }
        }
        drop(rx);

        let selector = spawn_selector(
            tx,
            Arc::clone(&queue),
            Arc::clone(&in_flight),
            Arc::clone(&counters),
            Arc::clone(&shutdown),
            policy,
            Duration::from_millis(config.idle_wait_ms),
        )?;

        info!(
            worker_count = config.worker_count,
            channel_depth = config.channel_depth,
            idle_wait_ms = config.idle_wait_ms,
            "request starter running"
        );

        Ok(Self {
            config,
            queue,
            in_flight,
            counters,
            shutdown,
            selector: Mutex::new(Some(selector)),
            workers: Mutex::new(workers),
            _executor: PhantomData,
        })
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> StarterStats {
        StarterStats {
            worker_count: self.config.worker_count,
            selected: self.counters.selected.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            continued: self.counters.continued.load(Ordering::Relaxed),
            in_flight: self.in_flight.len() as u64,
        }
    }

    /// True once `shutdown` has been called or the starter dropped.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop selecting, let workers finish what they hold, and join all
    /// threads. Threads that do not exit within two seconds are detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down request starter");
        self.queue.wake_signal().notify();

        if let Some(selector) = self.selector.lock().take() {
            join_with_timeout(selector, "selector");
        }
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            join_with_timeout(worker, &format!("worker-{idx}"));
        }
        info!(worker_count, "request starter stopped");
    }
}

impl<E: TransferExecutor> Drop for RequestStarter<E> {
    fn drop(&mut self) {
        // Signal only; joining here can hang on a stuck executor.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.queue.wake_signal().notify();
            debug!("request starter dropped without shutdown; threads detached");
        }
    }
}

fn join_with_timeout(handle: JoinHandle<()>, name: &str) {
    let (tx, rx) = std::sync::mpsc::channel();
    let join_thread = thread::spawn(move || {
        let joined = handle.join();
        let _ = tx.send(joined.is_ok());
    });
    match rx.recv_timeout(Duration::from_secs(2)) {
        Ok(true) => debug!(thread = name, "joined"),
        Ok(false) => warn!(thread = name, "thread panicked"),
        Err(_) => {
            warn!(thread = name, "thread did not exit within timeout; detaching");
            return;
        }
    }
    let _ = join_thread.join();
}

fn spawn_selector(
    tx: Sender<Selection>,
    queue: Arc<RequestQueue>,
    in_flight: Arc<InFlight>,
    counters: Arc<StarterCounters>,
    shutdown: Arc<AtomicBool>,
    policy: Option<SharedPolicy>,
    idle_wait: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("rq-selector".into()).spawn(move || {
        debug!("selector started");
        let wake = queue.wake_signal();
        let mut rng = rand::rng();
        while !shutdown.load(Ordering::Acquire) {
            let excluding = SelectorPolicy {
                in_flight: &in_flight,
                extra: policy.as_ref(),
            };
            let Some(selection) = queue.next_runnable(&excluding, &mut rng) else {
                wake.wait_for(idle_wait);
                continue;
            };
            in_flight.insert(selection.item.item_id());
            counters.selected.fetch_add(1, Ordering::Relaxed);
            debug!(
                priority = %selection.priority,
                client = %selection.client,
                item = %selection.item.item_id(),
                "dispatching transfer"
            );
            if let Err(returned) = tx.send(selection) {
                in_flight.remove(&returned.0.item.item_id());
                debug!("worker channel closed");
                break;
            }
        }
        debug!("selector exiting");
    })
}

fn spawn_worker<E: TransferExecutor>(
    worker_id: usize,
    rx: Receiver<Selection>,
    queue: Arc<RequestQueue>,
    in_flight: Arc<InFlight>,
    counters: Arc<StarterCounters>,
    executor: E,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("rq-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker started");
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };
            let wake = queue.wake_signal();
            while let Ok(selection) = rx.recv() {
                let item_id = selection.item.item_id();
                let result = rt.block_on(executor.execute(selection.clone()));
                match &result {
                    TransferResult::Completed(outcome) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                        debug!(worker_id, item = %item_id, success = outcome.is_success(), "transfer finished");
                    }
                    TransferResult::Continue => {
                        counters.continued.fetch_add(1, Ordering::Relaxed);
                    }
                }
                queue.complete_transfer(&selection, result);
                in_flight.remove(&item_id);
                wake.notify();
            }
            debug!(worker_id, "worker exiting");
        })
}
