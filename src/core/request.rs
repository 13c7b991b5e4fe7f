//! Client-visible requests: lifecycle, persistence class, and the durable
//! field set used to rebuild them after a restart.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::client::RequestOwner;
use crate::core::grab_array::GrabItem;
use crate::core::SchedulerError;
use crate::util::serde::{ClientId, Durability, PriorityClass, RequestKey};

/// Kind of job a request performs. Behaviour that differs per kind matches on
/// this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Fetch content for a key.
    Get,
    /// Insert a single file.
    Put,
    /// Insert a directory of files.
    PutDir {
        /// Number of files in the directory.
        files: u32,
    },
}

impl RequestKind {
    /// Type tag used in stored records.
    #[must_use]
    pub const fn type_tag(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::PutDir { .. } => "PUTDIR",
        }
    }

    /// Direction of data flow for this kind.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Get => Direction::Downloads,
            Self::Put | Self::PutDir { .. } => Direction::Uploads,
        }
    }
}

/// Data flow direction; each direction has its own completion tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Fetches.
    Downloads,
    /// Inserts.
    Uploads,
}

impl Direction {
    /// Lowercase name, also used in completed-list file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloads => "downloads",
            Self::Uploads => "uploads",
        }
    }
}

/// How long a request survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceClass {
    /// Dropped when the client connection goes away.
    Connection,
    /// Survives loss of the connection but not a restart.
    Reboot,
    /// Written to the durable store and rebuilt after a restart.
    Forever,
}

impl PersistenceClass {
    /// Parse a persistence name (`connection`, `reboot`, `forever`, any case)
    /// or its numeric code (`0`, `1`, `2`).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownPersistence`] for anything else.
    pub fn parse(value: &str) -> Result<Self, SchedulerError> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("connection") || trimmed == "0" {
            Ok(Self::Connection)
        } else if trimmed.eq_ignore_ascii_case("reboot") || trimmed == "1" {
            Ok(Self::Reboot)
        } else if trimmed.eq_ignore_ascii_case("forever") || trimmed == "2" {
            Ok(Self::Forever)
        } else {
            Err(SchedulerError::UnknownPersistence(value.to_string()))
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Reboot => "reboot",
            Self::Forever => "forever",
        }
    }

    /// Durability required of the transfer backing a request of this class.
    #[must_use]
    pub const fn durability(self) -> Durability {
        match self {
            Self::Forever => Durability::Durable,
            Self::Connection | Self::Reboot => Durability::Transient,
        }
    }

    /// False only for [`PersistenceClass::Connection`].
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        !matches!(self, Self::Connection)
    }
}

impl fmt::Display for PersistenceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result key and size of a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessInfo {
    /// Key of the fetched data, or the final key an insert landed at.
    pub result_key: RequestKey,
    /// Size in bytes.
    pub size: u64,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Completed successfully.
    Succeeded(SuccessInfo),
    /// Failed with a reason.
    Failed(String),
    /// Cancelled before completing; counts as a failure.
    Cancelled,
}

impl Outcome {
    /// True for [`Outcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Lifecycle state. `Running -> Finished -> Dropped`; nothing leaves
/// `Finished` except dropping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// Still scheduled.
    Running,
    /// Terminal outcome recorded.
    Finished(Outcome),
    /// Removed from all bookkeeping.
    Dropped,
}

/// Transferred and total bytes of a running transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes moved so far.
    pub transferred: u64,
    /// Total bytes, when known.
    pub total: Option<u64>,
}

/// The network operation a request wraps; this is what actually sits in a
/// grab array.
pub trait Transfer: GrabItem {
    /// Stop the operation. Must be idempotent.
    fn cancel(&self);
    /// Current scheduling priority.
    fn priority(&self) -> PriorityClass;
    /// Update the scheduling priority.
    fn set_priority(&self, priority: PriorityClass);
    /// Progress so far.
    fn progress(&self) -> TransferProgress;
    /// Release any buffered data.
    fn free_data(&self) {}
}

/// Live connection that submitted a connection-scoped request.
pub trait ConnectionHandler: Send + Sync {
    /// Called once when a connection-scoped request reaches a terminal outcome.
    fn finished_request(&self, request: &Request);
}

/// Parameters for a freshly submitted request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Kind of job.
    pub kind: RequestKind,
    /// Key to fetch or insert to.
    pub key: RequestKey,
    /// Client-chosen identifier, unique within the owning client.
    pub identifier: String,
    /// Verbosity mask for progress reporting.
    pub verbosity: u32,
    /// Initial priority class.
    pub priority: PriorityClass,
    /// Persistence class.
    pub persistence: PersistenceClass,
    /// Opaque token echoed back to the client.
    pub client_token: Option<String>,
    /// Whether the request lives on the global queue.
    pub global: bool,
}

impl NewRequest {
    /// Connection-scoped request at the default priority.
    pub fn new(kind: RequestKind, key: RequestKey, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            key,
            identifier: identifier.into(),
            verbosity: 0,
            priority: PriorityClass::default(),
            persistence: PersistenceClass::Connection,
            client_token: None,
            global: false,
        }
    }

    /// Set the priority class.
    #[must_use]
    pub const fn with_priority(mut self, priority: PriorityClass) -> Self {
        self.priority = priority;
        self
    }

    /// Set the persistence class.
    #[must_use]
    pub const fn with_persistence(mut self, persistence: PersistenceClass) -> Self {
        self.persistence = persistence;
        self
    }

    /// Set the verbosity mask.
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: u32) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the client token.
    #[must_use]
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }

    /// Place the request on the global queue.
    #[must_use]
    pub const fn on_global_queue(mut self) -> Self {
        self.global = true;
        self
    }
}

struct RequestInner {
    priority: PriorityClass,
    client_token: Option<String>,
    state: RequestState,
    transfer: Option<Arc<dyn Transfer>>,
    owner: Option<Weak<dyn RequestOwner>>,
}

/// One client job.
pub struct Request {
    kind: RequestKind,
    key: RequestKey,
    identifier: String,
    verbosity: u32,
    client: ClientId,
    global: bool,
    persistence: PersistenceClass,
    connection: Option<Weak<dyn ConnectionHandler>>,
    inner: Mutex<RequestInner>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("identifier", &self.identifier)
            .field("client", &self.client)
            .field("kind", &self.kind)
            .field("persistence", &self.persistence)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Build a request from a live client command. Global requests are owned
    /// by the global client regardless of `client`.
    pub fn new(params: NewRequest, client: ClientId) -> Self {
        let client = if params.global { ClientId::global() } else { client };
        Self {
            kind: params.kind,
            key: params.key,
            identifier: params.identifier,
            verbosity: params.verbosity,
            client,
            global: params.global,
            persistence: params.persistence,
            connection: None,
            inner: Mutex::new(RequestInner {
                priority: params.priority,
                client_token: params.client_token,
                state: RequestState::Running,
                transfer: None,
                owner: None,
            }),
        }
    }

    /// Attach the submitting connection. Ignored unless the request is
    /// connection-scoped.
    #[must_use]
    pub fn with_connection(mut self, handler: Weak<dyn ConnectionHandler>) -> Self {
        if self.persistence == PersistenceClass::Connection {
            self.connection = Some(handler);
        }
        self
    }

    /// Rebuild a request from its stored field set.
    ///
    /// # Errors
    ///
    /// Fails for connection-scoped or unrecognised persistence classes, unknown
    /// request types, and missing or inconsistent fields.
    pub fn from_record(record: RequestRecord) -> Result<Self, SchedulerError> {
        let persistence = PersistenceClass::parse(&record.persistence)?;
        if persistence == PersistenceClass::Connection {
            return Err(SchedulerError::DisallowedPersistence(
                persistence.as_str().to_string(),
            ));
        }
        if record.identifier.is_empty() {
            return Err(SchedulerError::MalformedRecord("empty identifier".into()));
        }
        let kind = match record.request_type.as_str() {
            "GET" => RequestKind::Get,
            "PUT" => RequestKind::Put,
            "PUTDIR" => RequestKind::PutDir {
                files: record.files.ok_or_else(|| {
                    SchedulerError::MalformedRecord(format!(
                        "{}: PUTDIR record without files",
                        record.identifier
                    ))
                })?,
            },
            other => return Err(SchedulerError::UnknownRequestType(other.to_string())),
        };
        let priority = PriorityClass::from_u8(record.priority_class).ok_or_else(|| {
            SchedulerError::MalformedRecord(format!(
                "{}: priority class {} out of range",
                record.identifier, record.priority_class
            ))
        })?;
        let state = if record.finished {
            match record.succeeded {
                Some(true) => {
                    let result_key = record.result_key.ok_or_else(|| {
                        SchedulerError::MalformedRecord(format!(
                            "{}: succeeded without result key",
                            record.identifier
                        ))
                    })?;
                    RequestState::Finished(Outcome::Succeeded(SuccessInfo {
                        result_key,
                        size: record.data_size.unwrap_or(0),
                    }))
                }
                Some(false) => RequestState::Finished(Outcome::Failed(
                    record.failure_reason.unwrap_or_else(|| "unknown".into()),
                )),
                None => {
                    return Err(SchedulerError::MalformedRecord(format!(
                        "{}: finished without outcome",
                        record.identifier
                    )))
                }
            }
        } else {
            RequestState::Running
        };
        let client = if record.global {
            ClientId::global()
        } else {
            record.client_name
        };

        Ok(Self {
            kind,
            key: record.key,
            identifier: record.identifier,
            verbosity: record.verbosity,
            client,
            global: record.global,
            persistence,
            connection: None,
            inner: Mutex::new(RequestInner {
                priority,
                client_token: record.client_token,
                state,
                transfer: None,
                owner: None,
            }),
        })
    }

    /// Field set describing this request for the durable store.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotPersistent`] for connection-scoped requests.
    pub fn to_record(&self) -> Result<RequestRecord, SchedulerError> {
        if !self.persistence.is_persistent() {
            return Err(SchedulerError::NotPersistent(self.identifier.clone()));
        }
        let inner = self.inner.lock();
        let (finished, succeeded, result_key, data_size, failure_reason) = match &inner.state {
            RequestState::Running => (false, None, None, None, None),
            RequestState::Finished(Outcome::Succeeded(info)) => (
                true,
                Some(true),
                Some(info.result_key.clone()),
                Some(info.size),
                None,
            ),
            RequestState::Finished(Outcome::Failed(reason)) => {
                (true, Some(false), None, None, Some(reason.clone()))
            }
            RequestState::Finished(Outcome::Cancelled) | RequestState::Dropped => {
                (true, Some(false), None, None, Some("cancelled".to_string()))
            }
        };
        let files = match self.kind {
            RequestKind::PutDir { files } => Some(files),
            RequestKind::Get | RequestKind::Put => None,
        };
        Ok(RequestRecord {
            request_type: self.kind.type_tag().to_string(),
            client_name: self.client.clone(),
            key: self.key.clone(),
            identifier: self.identifier.clone(),
            verbosity: self.verbosity,
            priority_class: inner.priority.as_u8(),
            persistence: self.persistence.as_str().to_string(),
            client_token: inner.client_token.clone(),
            finished,
            global: self.global,
            files,
            succeeded,
            result_key,
            data_size,
            failure_reason,
        })
    }

    /// Kind of job.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Key to fetch or insert to.
    #[must_use]
    pub const fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Client-chosen identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Verbosity mask.
    #[must_use]
    pub const fn verbosity(&self) -> u32 {
        self.verbosity
    }

    /// Owning client.
    #[must_use]
    pub const fn client(&self) -> &ClientId {
        &self.client
    }

    /// Whether the request lives on the global queue.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.global
    }

    /// Persistence class.
    #[must_use]
    pub const fn persistence(&self) -> PersistenceClass {
        self.persistence
    }

    /// Whether the request survives loss of its connection.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.persistence.is_persistent()
    }

    /// Whether the request is written to the durable store.
    #[must_use]
    pub fn is_persistent_forever(&self) -> bool {
        self.persistence == PersistenceClass::Forever
    }

    /// Current priority class.
    pub fn priority_class(&self) -> PriorityClass {
        self.inner.lock().priority
    }

    /// Client token, if any.
    pub fn client_token(&self) -> Option<String> {
        self.inner.lock().client_token.clone()
    }

    /// Replace the client token.
    pub fn set_client_token(&self, token: Option<String>) {
        self.inner.lock().client_token = token;
    }

    /// Snapshot of the lifecycle state.
    pub fn state(&self) -> RequestState {
        self.inner.lock().state.clone()
    }

    /// True once a terminal outcome has been recorded. Never reverts.
    pub fn has_finished(&self) -> bool {
        !matches!(self.inner.lock().state, RequestState::Running)
    }

    /// Result key and size, if the request succeeded.
    pub fn success(&self) -> Option<SuccessInfo> {
        match &self.inner.lock().state {
            RequestState::Finished(Outcome::Succeeded(info)) => Some(info.clone()),
            _ => None,
        }
    }

    /// Failure reason, if the request failed or was cancelled.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.inner.lock().state {
            RequestState::Finished(Outcome::Failed(reason)) => Some(reason.clone()),
            RequestState::Finished(Outcome::Cancelled) => Some("cancelled".to_string()),
            _ => None,
        }
    }

    /// The wrapped transfer, while one is attached.
    pub fn transfer(&self) -> Option<Arc<dyn Transfer>> {
        self.inner.lock().transfer.clone()
    }

    /// Progress of the wrapped transfer.
    pub fn progress(&self) -> Option<TransferProgress> {
        self.transfer().map(|transfer| transfer.progress())
    }

    /// Attach the transfer this request drives.
    pub fn attach_transfer(&self, transfer: Arc<dyn Transfer>) {
        self.inner.lock().transfer = Some(transfer);
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn RequestOwner>) {
        self.inner.lock().owner = Some(owner);
    }

    /// Cancel the wrapped transfer and finish the request as
    /// [`Outcome::Cancelled`], notifying the connection handler and owner like
    /// any other outcome. Safe to call repeatedly. Returns true if this call
    /// finished the request.
    ///
    /// The durable record is not touched here; `RequestQueue::cancel_request`
    /// writes it.
    pub(crate) fn cancel(self: &Arc<Self>) -> bool {
        self.cancel_transfer();
        let changed = self.finish(Outcome::Cancelled);
        if changed {
            info!(identifier = %self.identifier, "request cancelled");
        }
        changed
    }

    fn cancel_transfer(&self) {
        let transfer = self.inner.lock().transfer.clone();
        if let Some(transfer) = transfer {
            transfer.cancel();
        }
    }

    /// Change the priority class on the request and its transfer.
    ///
    /// The caller must also move the transfer into the grab array of the new
    /// priority bucket; `RequestQueue::change_priority` does both.
    pub fn set_priority_class(&self, priority: PriorityClass) {
        let transfer = {
            let mut inner = self.inner.lock();
            inner.priority = priority;
            inner.transfer.clone()
        };
        if let Some(transfer) = transfer {
            transfer.set_priority(priority);
        }
    }

    /// Record a terminal outcome and notify the connection handler (for
    /// connection-scoped requests) and the owning client. Returns false if the
    /// request had already finished.
    pub fn finish(self: &Arc<Self>, outcome: Outcome) -> bool {
        let owner = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, RequestState::Running) {
                debug!(identifier = %self.identifier, "finish ignored, already terminal");
                return false;
            }
            inner.state = RequestState::Finished(outcome);
            inner.owner.clone()
        };
        info!(identifier = %self.identifier, client = %self.client, "request finished");

        if self.persistence == PersistenceClass::Connection {
            if let Some(handler) = self.connection.as_ref().and_then(Weak::upgrade) {
                handler.finished_request(self);
            }
        }
        if let Some(owner) = owner.as_ref().and_then(Weak::upgrade) {
            owner.finished_request(self);
        }
        true
    }

    /// Remove the request from all bookkeeping: cancel it if still running,
    /// release buffered data, and detach the transfer. Safe on requests that
    /// are already finished, cancelled, or dropped.
    pub fn dropped(&self) {
        self.cancel_transfer();
        let transfer = {
            let mut inner = self.inner.lock();
            inner.state = RequestState::Dropped;
            inner.transfer.take()
        };
        if let Some(transfer) = transfer {
            transfer.free_data();
        }
    }
}

/// Durable field set of a persistent request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestRecord {
    /// `GET`, `PUT`, or `PUTDIR`.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Owning client name.
    pub client_name: ClientId,
    /// Key to fetch or insert to.
    pub key: RequestKey,
    /// Client-chosen identifier.
    pub identifier: String,
    /// Verbosity mask.
    pub verbosity: u32,
    /// Priority class ordinal.
    pub priority_class: u8,
    /// Persistence class name.
    pub persistence: String,
    /// Client token.
    #[serde(default)]
    pub client_token: Option<String>,
    /// Whether a terminal outcome was recorded.
    pub finished: bool,
    /// Whether the request lives on the global queue.
    pub global: bool,
    /// File count for `PUTDIR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<u32>,
    /// Outcome flag once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
    /// Result key once succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<RequestKey>,
    /// Data size once succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_size: Option<u64>,
    /// Failure reason once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RequestRecord {
    /// Parse one stored line.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::MalformedRecord`] for invalid JSON, missing
    /// required fields, or unknown fields.
    pub fn from_json(line: &str) -> Result<Self, SchedulerError> {
        serde_json::from_str(line).map_err(|e| SchedulerError::MalformedRecord(e.to_string()))
    }

    /// Serialize to one line.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Backend`] if serialization fails.
    pub fn to_json(&self) -> Result<String, SchedulerError> {
        serde_json::to_string(self).map_err(|e| SchedulerError::Backend(e.to_string()))
    }
}
