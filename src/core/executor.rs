//! Execution traits: running selected transfers and spawning background work.

use std::future::Future;

use async_trait::async_trait;

use crate::core::priority_index::Selection;
use crate::core::request::Outcome;

/// What happened when a selected transfer was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    /// The owning request reached a terminal outcome.
    Completed(Outcome),
    /// Progress was made but work remains; the transfer goes back in the index.
    Continue,
}

/// Runs the network operation behind a selected transfer.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_request_queue::core::{Selection, TransferExecutor, TransferResult};
///
/// #[derive(Clone)]
/// struct FetchExecutor;
///
/// #[async_trait]
/// impl TransferExecutor for FetchExecutor {
///     async fn execute(&self, selection: Selection) -> TransferResult {
///         // fetch a block for selection.item ...
///         TransferResult::Continue
///     }
/// }
/// ```
#[async_trait]
pub trait TransferExecutor: Send + Sync + Clone + 'static {
    /// Run one step of the selected transfer.
    ///
    /// Called from a starter worker thread with its own current-thread tokio
    /// runtime, so blocking here does not stall the caller's runtime.
    async fn execute(&self, selection: Selection) -> TransferResult;
}

/// Abstraction for spawning work on a runtime.
pub trait Spawn: Send + Sync {
    /// Spawn an async task.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Run blocking work (file I/O) off the calling thread.
    fn spawn_blocking<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::spawn(job);
    }
}
