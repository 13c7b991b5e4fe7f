//! The request queue: clients, the priority index, the durable request store
//! and the wake signal, kept consistent with each other.
//!
//! # Design Principles
//!
//! - **Store first**: a fully-durable request's record is written before an
//!   operation reports success, so a restart sees what callers saw
//! - **Roll back on failure**: a start that cannot persist or index its
//!   transfer is unregistered again
//! - **Terminal is final**: finishing, cancelling and removing all go through
//!   [`Request::finish`] or [`Request::dropped`], and a finished request never
//!   runs again, including after [`RequestQueue::reload`]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::client::{Client, CompletionListener};
use crate::core::executor::TransferResult;
use crate::core::grab_array::{ExclusionPolicy, GrabItem};
use crate::core::priority_index::{PriorityIndex, Selection};
use crate::core::request::{Outcome, Request, Transfer};
use crate::core::store::RequestStore;
use crate::core::wake::WakeSignal;
use crate::core::SchedulerError;
use crate::util::serde::{ClientId, ItemId, PriorityClass};

/// Creates the transfer for a request rebuilt from the durable store.
pub trait TransferFactory {
    /// Build a transfer for `request`, which is still running.
    ///
    /// # Errors
    ///
    /// Any error skips this request during reload.
    fn resume(&self, request: &Request) -> Result<Arc<dyn Transfer>, SchedulerError>;
}

impl<F> TransferFactory for F
where
    F: Fn(&Request) -> Result<Arc<dyn Transfer>, SchedulerError>,
{
    fn resume(&self, request: &Request) -> Result<Arc<dyn Transfer>, SchedulerError> {
        self(request)
    }
}

/// Finds requests by identifier on behalf of the completion tracker.
pub trait RequestLookup: Send + Sync {
    /// The global-queue request with this identifier, if it still exists.
    fn find_global(&self, identifier: &str) -> Option<Arc<Request>>;
}

/// Counts from [`RequestQueue::reload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Requests rebuilt and registered.
    pub loaded: usize,
    /// Records that could not be rebuilt.
    pub failed: usize,
}

type SharedAudit = Arc<Mutex<Box<dyn AuditSink>>>;

/// Owns every client's requests and schedules their transfers.
pub struct RequestQueue {
    global: Arc<Client>,
    clients: RwLock<HashMap<ClientId, Arc<Client>>>,
    by_item: RwLock<HashMap<ItemId, (ClientId, String)>>,
    index: Arc<PriorityIndex>,
    store: Option<Arc<dyn RequestStore>>,
    audit: Option<SharedAudit>,
    wake: Arc<WakeSignal>,
}

impl RequestQueue {
    /// Queue over `index`, persisting fully-durable requests to `store`.
    pub fn new(index: Arc<PriorityIndex>, store: Option<Arc<dyn RequestStore>>) -> Self {
        Self {
            global: Client::new(ClientId::global()),
            clients: RwLock::new(HashMap::new()),
            by_item: RwLock::new(HashMap::new()),
            index,
            store,
            audit: None,
            wake: Arc::new(WakeSignal::new()),
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Signal poked whenever new work may be runnable.
    pub fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.wake)
    }

    /// The priority index.
    pub fn index(&self) -> &Arc<PriorityIndex> {
        &self.index
    }

    /// The global-queue client.
    pub fn global_client(&self) -> &Arc<Client> {
        &self.global
    }

    /// The client with this name, created on first use. Non-global clients are
    /// dropped again once their last request is removed.
    pub fn client(&self, id: &ClientId) -> Arc<Client> {
        if id.is_global() {
            return Arc::clone(&self.global);
        }
        if let Some(client) = self.clients.read().get(id) {
            return Arc::clone(client);
        }
        Arc::clone(
            self.clients
                .write()
                .entry(id.clone())
                .or_insert_with(|| Client::new(id.clone())),
        )
    }

    /// Number of non-global clients with registered requests.
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    // Registration runs under the client map lock so `prune_client` never
    // drops a client that is gaining a request.
    fn register(&self, request: &Arc<Request>) -> Result<Arc<Client>, SchedulerError> {
        let id = request.client();
        if id.is_global() {
            self.global.register(Arc::clone(request))?;
            return Ok(Arc::clone(&self.global));
        }
        if let Some(client) = self.clients.read().get(id) {
            client.register(Arc::clone(request))?;
            return Ok(Arc::clone(client));
        }
        let mut clients = self.clients.write();
        let client = clients.entry(id.clone()).or_insert_with(|| Client::new(id.clone()));
        client.register(Arc::clone(request))?;
        Ok(Arc::clone(client))
    }

    fn forget(&self, client: &Client, request: &Request) {
        client.forget(request.identifier());
        self.prune_client(request.client());
    }

    fn prune_client(&self, id: &ClientId) {
        if id.is_global() {
            return;
        }
        let mut clients = self.clients.write();
        if clients.get(id).is_some_and(|client| client.is_empty()) {
            clients.remove(id);
            debug!(client = %id, "dropped idle client");
        }
    }

    fn existing_client(&self, id: &ClientId) -> Option<Arc<Client>> {
        if id.is_global() {
            Some(Arc::clone(&self.global))
        } else {
            self.clients.read().get(id).cloned()
        }
    }

    /// Route completion events of global-queue requests to `listener`.
    pub fn add_completion_listener(&self, listener: Arc<dyn CompletionListener>) {
        self.global.add_listener(listener);
    }

    /// Register a request, persist it if fully durable, and queue its transfer.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::DurabilityMismatch`] if the transfer's durability
    ///   does not match the request's persistence class.
    /// * [`SchedulerError::IdentifierCollision`] if the identifier is taken.
    /// * Store errors; the request is unregistered again in that case.
    pub fn start(&self, request: Request, transfer: Arc<dyn Transfer>) -> Result<Arc<Request>, SchedulerError> {
        let required = request.persistence().durability();
        if transfer.durability() != required {
            return Err(SchedulerError::DurabilityMismatch {
                item: transfer.durability(),
                array: required,
            });
        }
        transfer.set_priority(request.priority_class());
        request.attach_transfer(Arc::clone(&transfer));

        let request = Arc::new(request);
        let client = self.register(&request)?;

        if let Err(e) = self.persist(&request) {
            self.forget(&client, &request);
            return Err(e);
        }
        if let Err(e) = self.index.add(request.client(), Arc::clone(&transfer)) {
            self.forget(&client, &request);
            self.unpersist(&request);
            return Err(e);
        }
        self.by_item.write().insert(
            transfer.item_id(),
            (request.client().clone(), request.identifier().to_string()),
        );

        info!(
            client = %request.client(),
            identifier = request.identifier(),
            priority = %request.priority_class(),
            persistence = %request.persistence(),
            "request started"
        );
        self.record(&request, AuditAction::Submit, None);
        self.wake.notify();
        Ok(request)
    }

    /// Look up a request.
    pub fn get_request(&self, client: &ClientId, identifier: &str) -> Option<Arc<Request>> {
        self.existing_client(client)?.get(identifier)
    }

    fn require(&self, client: &ClientId, identifier: &str) -> Result<Arc<Request>, SchedulerError> {
        self.get_request(client, identifier)
            .ok_or_else(|| SchedulerError::RequestNotFound(identifier.to_string()))
    }

    /// Every request of every client, global queue first.
    pub fn requests(&self) -> Vec<Arc<Request>> {
        let mut all = self.global.requests();
        let mut clients: Vec<_> = self.clients.read().values().cloned().collect();
        clients.sort_by(|a, b| a.id().cmp(b.id()));
        for client in clients {
            all.extend(client.requests());
        }
        all
    }

    /// Change a request's priority class and move its transfer to the
    /// matching array.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RequestNotFound`], or store errors for fully-durable
    /// requests.
    pub fn change_priority(
        &self,
        client: &ClientId,
        identifier: &str,
        priority: PriorityClass,
    ) -> Result<(), SchedulerError> {
        let request = self.require(client, identifier)?;
        let previous = request.priority_class();
        request.set_priority_class(priority);
        if let Some(transfer) = request.transfer() {
            if transfer.parent().is_some() {
                self.index.rehome(request.client(), transfer)?;
            }
        }
        self.persist(&request)?;
        debug!(identifier, from = %previous, to = %priority, "priority changed");
        self.record(&request, AuditAction::Priority, Some(format!("{previous}->{priority}")));
        self.wake.notify();
        Ok(())
    }

    /// Remove a request: unregister it, pull its transfer from the index,
    /// cancel it and free its data, and delete its durable record.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RequestNotFound`] if no such request exists.
    pub fn remove_request(&self, client: &ClientId, identifier: &str) -> Result<Arc<Request>, SchedulerError> {
        let owner = self
            .existing_client(client)
            .ok_or_else(|| SchedulerError::RequestNotFound(identifier.to_string()))?;
        let request = owner
            .remove(identifier)
            .ok_or_else(|| SchedulerError::RequestNotFound(identifier.to_string()))?;
        if let Some(transfer) = request.transfer() {
            self.index.remove(transfer.as_ref());
            self.by_item.write().remove(&transfer.item_id());
        }
        request.dropped();
        self.unpersist(&request);
        self.prune_client(request.client());
        info!(client = %request.client(), identifier, "request removed");
        self.record(&request, AuditAction::Remove, None);
        Ok(request)
    }

    /// Cancel a running request: stop its transfer, finish it as
    /// [`Outcome::Cancelled`] through its owner, and write the finished record
    /// so it stays finished after a restart. Returns false if the request had
    /// already finished.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RequestNotFound`], or store errors for fully-durable
    /// requests.
    pub fn cancel_request(&self, client: &ClientId, identifier: &str) -> Result<bool, SchedulerError> {
        let request = self.require(client, identifier)?;
        if let Some(transfer) = request.transfer() {
            self.index.remove(transfer.as_ref());
            self.by_item.write().remove(&transfer.item_id());
        }
        if !request.cancel() {
            return Ok(false);
        }
        self.persist(&request)?;
        self.record(&request, AuditAction::Cancel, None);
        Ok(true)
    }

    /// Remove every request on the global queue. Returns how many were removed.
    pub fn remove_all_global(&self) -> usize {
        let mut removed = 0;
        for request in self.global.requests() {
            match self.remove_request(&ClientId::global(), request.identifier()) {
                Ok(_) => removed += 1,
                Err(e) => warn!(identifier = request.identifier(), error = %e, "remove failed"),
            }
        }
        warn!(removed, "removed all global requests");
        removed
    }

    /// Record a terminal outcome. Returns false if the request had already
    /// finished.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::RequestNotFound`], or store errors for fully-durable
    /// requests.
    pub fn finish_request(
        &self,
        client: &ClientId,
        identifier: &str,
        outcome: Outcome,
    ) -> Result<bool, SchedulerError> {
        let request = self.require(client, identifier)?;
        if let Some(transfer) = request.transfer() {
            self.index.remove(transfer.as_ref());
            self.by_item.write().remove(&transfer.item_id());
        }
        let detail = match &outcome {
            Outcome::Succeeded(_) => "succeeded".to_string(),
            Outcome::Failed(reason) => format!("failed: {reason}"),
            Outcome::Cancelled => "cancelled".to_string(),
        };
        if !request.finish(outcome) {
            return Ok(false);
        }
        self.persist(&request)?;
        self.record(&request, AuditAction::Finish, Some(detail));
        Ok(true)
    }

    /// Apply the result of running a selected transfer.
    pub fn complete_transfer(&self, selection: &Selection, result: TransferResult) {
        let owner = self.by_item.read().get(&selection.item.item_id()).cloned();
        let Some((client, identifier)) = owner else {
            debug!(item = %selection.item.item_id(), "transfer has no live request");
            return;
        };
        match result {
            TransferResult::Completed(outcome) => {
                if let Err(e) = self.finish_request(&client, &identifier, outcome) {
                    error!(%client, identifier, error = %e, "failed to record outcome");
                }
            }
            TransferResult::Continue => {
                if selection.item.parent().is_none() && !selection.item.is_empty() {
                    if let Err(e) = self.index.add(&client, Arc::clone(&selection.item)) {
                        error!(%client, identifier, error = %e, "failed to requeue transfer");
                    }
                }
                self.wake.notify();
            }
        }
    }

    /// Pick the next transfer to run.
    pub fn next_runnable<P, R>(&self, excluding: &P, rng: &mut R) -> Option<Selection>
    where
        P: ExclusionPolicy<dyn Transfer> + ?Sized,
        R: Rng,
    {
        self.index.next_runnable(excluding, rng)
    }

    /// Rebuild fully-durable requests from the store. Records that fail to
    /// parse or reconstruct are counted and skipped; the rest still load.
    /// Unfinished requests get a fresh transfer from `factory`.
    ///
    /// # Errors
    ///
    /// Only a store-wide read failure is returned.
    pub fn reload(&self, factory: &dyn TransferFactory) -> Result<ReloadReport, SchedulerError> {
        let Some(store) = &self.store else {
            return Ok(ReloadReport::default());
        };
        let mut report = ReloadReport::default();
        for record in store.load_all()? {
            match self.reload_one(record, factory) {
                Ok(request) => {
                    report.loaded += 1;
                    self.record(&request, AuditAction::Reload, None);
                }
                Err(e) => {
                    warn!(error = %e, "skipping stored request");
                    report.failed += 1;
                }
            }
        }
        info!(loaded = report.loaded, failed = report.failed, "reloaded requests");
        if report.loaded > 0 {
            self.wake.notify();
        }
        Ok(report)
    }

    fn reload_one(
        &self,
        record: Result<crate::core::request::RequestRecord, SchedulerError>,
        factory: &dyn TransferFactory,
    ) -> Result<Arc<Request>, SchedulerError> {
        let request = Arc::new(Request::from_record(record?)?);
        let transfer = if request.has_finished() {
            None
        } else {
            let transfer = factory.resume(&request)?;
            if transfer.durability() != request.persistence().durability() {
                return Err(SchedulerError::DurabilityMismatch {
                    item: transfer.durability(),
                    array: request.persistence().durability(),
                });
            }
            transfer.set_priority(request.priority_class());
            request.attach_transfer(Arc::clone(&transfer));
            Some(transfer)
        };

        let client = self.register(&request)?;
        if let Some(transfer) = transfer {
            if let Err(e) = self.index.add(request.client(), Arc::clone(&transfer)) {
                self.forget(&client, &request);
                return Err(e);
            }
            self.by_item.write().insert(
                transfer.item_id(),
                (request.client().clone(), request.identifier().to_string()),
            );
        }
        Ok(request)
    }

    fn persist(&self, request: &Request) -> Result<(), SchedulerError> {
        match &self.store {
            Some(store) if request.is_persistent_forever() => store.save(&request.to_record()?),
            _ => Ok(()),
        }
    }

    fn unpersist(&self, request: &Request) {
        if let Some(store) = &self.store {
            if request.is_persistent_forever() {
                if let Err(e) = store.delete(request.client(), request.identifier()) {
                    error!(identifier = request.identifier(), error = %e, "failed to delete stored request");
                }
            }
        }
    }

    fn record(&self, request: &Request, action: AuditAction, detail: Option<String>) {
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(request.client(), request.identifier(), action, detail));
        }
    }
}

impl RequestLookup for RequestQueue {
    fn find_global(&self, identifier: &str) -> Option<Arc<Request>> {
        self.global.get(identifier)
    }
}
