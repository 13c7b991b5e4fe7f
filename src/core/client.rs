//! Per-client identifier registry and completion routing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::request::Request;
use crate::core::SchedulerError;
use crate::util::serde::ClientId;

/// Receives terminal outcomes of the requests it owns.
pub trait RequestOwner: Send + Sync {
    /// Called once per request when it finishes.
    fn finished_request(&self, request: &Arc<Request>);
}

/// Observer of a client's finished and removed requests.
pub trait CompletionListener: Send + Sync {
    /// A request finished successfully.
    fn notify_success(&self, request: &Arc<Request>);
    /// A request failed or was cancelled.
    fn notify_failure(&self, request: &Arc<Request>);
    /// A request was removed from its client.
    fn on_remove(&self, request: &Arc<Request>);
}

/// A client and the requests it currently owns.
pub struct Client {
    id: ClientId,
    requests: RwLock<HashMap<String, Arc<Request>>>,
    listeners: RwLock<Vec<Arc<dyn CompletionListener>>>,
}

impl Client {
    /// New client with no requests.
    pub fn new(id: ClientId) -> Arc<Self> {
        Arc::new(Self {
            id,
            requests: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Client name.
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    /// Register a request under its identifier and become its owner.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::IdentifierCollision`] if the identifier is
    /// already registered; the existing request is left untouched.
    pub fn register(self: &Arc<Self>, request: Arc<Request>) -> Result<(), SchedulerError> {
        let mut requests = self.requests.write();
        if requests.contains_key(request.identifier()) {
            warn!(client = %self.id, identifier = request.identifier(), "identifier collision");
            return Err(SchedulerError::IdentifierCollision(
                request.identifier().to_string(),
            ));
        }
        let owner: Weak<dyn RequestOwner> = Arc::downgrade(self) as Weak<dyn RequestOwner>;
        request.set_owner(owner);
        requests.insert(request.identifier().to_string(), request);
        Ok(())
    }

    /// Look up a request.
    pub fn get(&self, identifier: &str) -> Option<Arc<Request>> {
        self.requests.read().get(identifier).cloned()
    }

    /// Unregister a request and tell listeners. Does not cancel it.
    pub fn remove(&self, identifier: &str) -> Option<Arc<Request>> {
        let removed = self.requests.write().remove(identifier)?;
        debug!(client = %self.id, identifier, "request removed");
        for listener in self.listeners() {
            listener.on_remove(&removed);
        }
        Some(removed)
    }

    /// Unregister without notifying listeners; used to roll back a failed start.
    pub(crate) fn forget(&self, identifier: &str) -> Option<Arc<Request>> {
        self.requests.write().remove(identifier)
    }

    /// All requests, ordered by identifier.
    pub fn requests(&self) -> Vec<Arc<Request>> {
        let mut all: Vec<_> = self.requests.read().values().cloned().collect();
        all.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        all
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    /// True when no requests are registered.
    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }

    /// Add a completion listener.
    pub fn add_listener(&self, listener: Arc<dyn CompletionListener>) {
        self.listeners.write().push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn CompletionListener>> {
        self.listeners.read().clone()
    }
}

impl RequestOwner for Client {
    fn finished_request(&self, request: &Arc<Request>) {
        let succeeded = request.success().is_some();
        for listener in self.listeners() {
            if succeeded {
                listener.notify_success(request);
            } else {
                listener.notify_failure(request);
            }
        }
    }
}
