//! Core scheduling: grab arrays, the priority index, requests and their
//! clients, the queue, the starter and completion tracking.

pub mod audit;
pub mod client;
pub mod completion;
pub mod error;
pub mod executor;
pub mod grab_array;
pub mod priority_index;
pub mod queue;
pub mod request;
pub mod starter;
pub mod store;
pub mod wake;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use client::{Client, CompletionListener, RequestOwner};
pub use completion::{
    AlertSink, CompletionAlert, CompletionEntry, CompletionTracker, Direction, EntryKind, LoadReport,
};
pub use error::{AppResult, SchedulerError};
pub use executor::{Spawn, TransferExecutor, TransferResult};
pub use grab_array::{ExcludeNothing, ExclusionPolicy, GrabArray, GrabItem};
pub use priority_index::{BucketSnapshot, PriorityIndex, Selection, TransferArray};
pub use queue::{ReloadReport, RequestLookup, RequestQueue, TransferFactory};
pub use request::{
    ConnectionHandler, NewRequest, Outcome, PersistenceClass, Request, RequestKind, RequestRecord,
    RequestState, SuccessInfo, Transfer, TransferProgress,
};
pub use starter::{RequestStarter, SharedPolicy, StarterStats};
pub use store::{DurableStore, RequestStore, StoreRef};
pub use wake::WakeSignal;
