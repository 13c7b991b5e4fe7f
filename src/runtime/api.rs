//! API-facing request/response models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{
    NewRequest, Outcome, PersistenceClass, Request, RequestKind, RequestQueue, RequestState,
    SchedulerError, Transfer, TransferProgress,
};
use crate::util::serde::{ClientId, PriorityClass, RequestKey};

fn default_persistence() -> String {
    PersistenceClass::Connection.as_str().to_string()
}

fn default_priority() -> u8 {
    PriorityClass::default().as_u8()
}

/// Request submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSubmission {
    /// Kind of job.
    pub kind: RequestKind,
    /// Key to fetch or insert to.
    pub key: String,
    /// Client-chosen identifier.
    pub identifier: String,
    /// Submitting client.
    pub client: String,
    /// Place on the global queue instead of the client's own.
    #[serde(default)]
    pub global: bool,
    /// Priority class, 0 (most urgent) to 6.
    #[serde(default = "default_priority")]
    pub priority_class: u8,
    /// Persistence class name or code.
    #[serde(default = "default_persistence")]
    pub persistence: String,
    /// Verbosity mask.
    #[serde(default)]
    pub verbosity: u32,
    /// Opaque token echoed back.
    #[serde(default)]
    pub client_token: Option<String>,
}

/// Coarse request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Still scheduled.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
    /// Removed.
    Dropped,
}

/// Request status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatusResponse {
    /// Owning client.
    pub client: String,
    /// Identifier.
    pub identifier: String,
    /// Kind of job.
    pub kind: RequestKind,
    /// Current priority class.
    pub priority_class: u8,
    /// Persistence class name.
    pub persistence: String,
    /// Current status.
    pub status: RequestStatus,
    /// Transfer progress while running.
    pub progress: Option<TransferProgress>,
    /// Result key on success.
    pub result_key: Option<String>,
    /// Failure reason.
    pub reason: Option<String>,
}

impl From<&Request> for RequestStatusResponse {
    fn from(request: &Request) -> Self {
        let (status, result_key, reason) = match request.state() {
            RequestState::Running => (RequestStatus::Running, None, None),
            RequestState::Finished(Outcome::Succeeded(info)) => (
                RequestStatus::Succeeded,
                Some(info.result_key.to_string()),
                None,
            ),
            RequestState::Finished(Outcome::Failed(reason)) => (RequestStatus::Failed, None, Some(reason)),
            RequestState::Finished(Outcome::Cancelled) => (RequestStatus::Cancelled, None, None),
            RequestState::Dropped => (RequestStatus::Dropped, None, None),
        };
        Self {
            client: request.client().to_string(),
            identifier: request.identifier().to_string(),
            kind: request.kind(),
            priority_class: request.priority_class().as_u8(),
            persistence: request.persistence().to_string(),
            status,
            progress: request.progress(),
            result_key,
            reason,
        }
    }
}

/// Occupancy of one client array in a priority class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketView {
    /// Priority class.
    pub priority_class: u8,
    /// Owning client.
    pub client: String,
    /// Whether the array is durable.
    pub durable: bool,
    /// Queued transfers.
    pub len: usize,
}

/// Snapshot of the whole queue for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueListing {
    /// Every registered request, global queue first.
    pub requests: Vec<RequestStatusResponse>,
    /// Non-empty index buckets, most urgent class first.
    pub buckets: Vec<BucketView>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Validate a submission and start it on `queue` with `transfer`.
///
/// # Errors
///
/// Unknown persistence or priority values, plus anything
/// [`RequestQueue::start`] rejects.
pub fn submit_request(
    queue: &RequestQueue,
    submission: RequestSubmission,
    transfer: Arc<dyn Transfer>,
) -> Result<RequestStatusResponse, SchedulerError> {
    let persistence = PersistenceClass::parse(&submission.persistence)?;
    let priority = PriorityClass::from_u8(submission.priority_class)
        .ok_or(SchedulerError::InvalidPriority(submission.priority_class))?;
    let mut params = NewRequest::new(submission.kind, RequestKey::new(submission.key), submission.identifier)
        .with_priority(priority)
        .with_persistence(persistence)
        .with_verbosity(submission.verbosity);
    if let Some(token) = submission.client_token {
        params = params.with_client_token(token);
    }
    if submission.global {
        params = params.on_global_queue();
    }
    let request = queue.start(Request::new(params, ClientId::new(submission.client)), transfer)?;
    Ok(RequestStatusResponse::from(request.as_ref()))
}

/// List every request and the occupied index buckets.
pub fn list_queue(queue: &RequestQueue) -> QueueListing {
    let requests = queue
        .requests()
        .iter()
        .map(|request| RequestStatusResponse::from(request.as_ref()))
        .collect();
    let buckets = queue
        .index()
        .snapshot()
        .into_iter()
        .filter(|bucket| bucket.len > 0)
        .map(|bucket| BucketView {
            priority_class: bucket.priority.as_u8(),
            client: bucket.client.to_string(),
            durable: bucket.durability.is_durable(),
            len: bucket.len,
        })
        .collect();
    QueueListing { requests, buckets }
}

/// Return a health payload.
pub fn health() -> Health {
    Health { ok: true }
}
