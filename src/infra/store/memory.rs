//! In-memory store for tests and transient nodes.
//!
//! Tracks dirty marks and activation depth so callers can assert on the
//! activation contract, and keeps request records as JSON lines so the reload
//! path parses exactly what a file-backed store would hand it.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::core::request::RequestRecord;
use crate::core::store::{DurableStore, RequestStore, StoreRef};
use crate::core::SchedulerError;
use crate::util::serde::ClientId;

#[derive(Default)]
struct Activity {
    dirty: HashMap<StoreRef, usize>,
    active: HashMap<StoreRef, usize>,
}

/// In-memory durable store.
#[derive(Default)]
pub struct InMemoryStore {
    activity: Mutex<Activity>,
    records: Mutex<BTreeMap<(ClientId, String), String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `entity` has been marked dirty.
    pub fn dirty_count(&self, entity: &StoreRef) -> usize {
        self.activity.lock().dirty.get(entity).copied().unwrap_or(0)
    }

    /// Number of entities currently paged in.
    pub fn active_count(&self) -> usize {
        self.activity.lock().active.len()
    }

    /// Number of stored request records.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Store a raw line under `(client, identifier)`, bypassing validation.
    pub fn insert_raw(&self, client: ClientId, identifier: impl Into<String>, line: impl Into<String>) {
        self.records
            .lock()
            .insert((client, identifier.into()), line.into());
    }
}

impl DurableStore for InMemoryStore {
    fn mark_dirty(&self, entity: StoreRef) {
        *self.activity.lock().dirty.entry(entity).or_insert(0) += 1;
    }

    fn activate(&self, entity: StoreRef, _depth: u32) {
        *self.activity.lock().active.entry(entity).or_insert(0) += 1;
    }

    fn deactivate(&self, entity: StoreRef, _depth: u32) {
        let mut activity = self.activity.lock();
        if let Some(count) = activity.active.get_mut(&entity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                activity.active.remove(&entity);
            }
        }
    }
}

impl RequestStore for InMemoryStore {
    fn save(&self, record: &RequestRecord) -> Result<(), SchedulerError> {
        let line = record.to_json()?;
        self.records
            .lock()
            .insert((record.client_name.clone(), record.identifier.clone()), line);
        Ok(())
    }

    fn delete(&self, client: &ClientId, identifier: &str) -> Result<(), SchedulerError> {
        self.records
            .lock()
            .remove(&(client.clone(), identifier.to_string()));
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Result<RequestRecord, SchedulerError>>, SchedulerError> {
        Ok(self
            .records
            .lock()
            .values()
            .map(|line| RequestRecord::from_json(line))
            .collect())
    }
}
