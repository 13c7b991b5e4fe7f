//! Contracts the scheduler needs from a backing durable store.
//!
//! Two concerns live here. [`DurableStore`] is the activation contract: durable
//! entities are paged in before their fields are read, paged out when no
//! longer needed, and marked dirty after every structural mutation so a later
//! flush persists them. [`RequestStore`] holds the field sets of fully-durable
//! requests so they can be rebuilt after a restart.

use crate::core::request::RequestRecord;
use crate::core::SchedulerError;
use crate::util::serde::{ArrayId, ClientId, ItemId};

/// An entity the scheduler asks the durable store to track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreRef {
    /// The slot sequence and counters of a grab array.
    Array(ArrayId),
    /// The membership set of a grab array.
    Membership(ArrayId),
    /// A schedulable item.
    Item(ItemId),
    /// The result key and size object of a request.
    RequestResult(String),
}

/// Activation contract of the backing store.
///
/// Implementations must be safe to call while a grab array lock is held and
/// must not call back into the scheduler.
pub trait DurableStore: Send + Sync {
    /// Mark an entity as modified so the next flush persists it.
    fn mark_dirty(&self, entity: StoreRef);
    /// Page an entity in, following references up to `depth` levels.
    fn activate(&self, entity: StoreRef, depth: u32);
    /// Page an entity out.
    fn deactivate(&self, entity: StoreRef, depth: u32);
}

/// Persistence for fully-durable request field sets.
pub trait RequestStore: Send + Sync {
    /// Insert or replace the record for `(client, identifier)`.
    fn save(&self, record: &RequestRecord) -> Result<(), SchedulerError>;
    /// Remove the record for `(client, identifier)`. Missing records are not an error.
    fn delete(&self, client: &ClientId, identifier: &str) -> Result<(), SchedulerError>;
    /// Load every stored record. The outer error is a store-wide failure; each
    /// inner result is one record, so a malformed entry never hides the rest.
    fn load_all(&self) -> Result<Vec<Result<RequestRecord, SchedulerError>>, SchedulerError>;
}
