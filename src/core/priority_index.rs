//! Priority class to client to grab array index.
//!
//! Selection walks classes from most to least urgent and, inside a class,
//! visits client arrays round-robin. Arrays are created lazily on first insert
//! and live in an arena keyed by [`ArrayId`]; items only hold that id as their
//! parent handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, warn};

use crate::core::grab_array::{ExclusionPolicy, GrabArray, GrabItem};
use crate::core::request::Transfer;
use crate::core::store::DurableStore;
use crate::core::SchedulerError;
use crate::util::serde::{ArrayId, ClientId, Durability, PriorityClass};

/// Grab array holding transfers.
pub type TransferArray = GrabArray<dyn Transfer>;

/// An item chosen for execution.
#[derive(Clone)]
pub struct Selection {
    /// Class the item was drawn from.
    pub priority: PriorityClass,
    /// Client whose array yielded it.
    pub client: ClientId,
    /// The transfer.
    pub item: Arc<dyn Transfer>,
}

/// Occupancy of one client array, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    /// Priority class.
    pub priority: PriorityClass,
    /// Owning client.
    pub client: ClientId,
    /// Durability of the array.
    pub durability: Durability,
    /// Live slots.
    pub len: usize,
}

struct Bucket {
    client: ClientId,
    durability: Durability,
    array: Arc<TransferArray>,
}

#[derive(Default)]
struct ClassBuckets {
    buckets: Vec<Bucket>,
    cursor: AtomicUsize,
}

#[derive(Default)]
struct IndexState {
    classes: BTreeMap<PriorityClass, ClassBuckets>,
    arena: HashMap<ArrayId, Arc<TransferArray>>,
}

/// Two-level index from priority class and client to grab arrays.
pub struct PriorityIndex {
    state: RwLock<IndexState>,
    next_id: AtomicU64,
    store: Option<Arc<dyn DurableStore>>,
}

impl Default for PriorityIndex {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PriorityIndex {
    /// Empty index. Durable arrays report to `store` when given.
    pub fn new(store: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            next_id: AtomicU64::new(1),
            store,
        }
    }

    /// Insert a transfer into the array for its priority, its durability, and
    /// `client`, creating the array if needed. Returns the array id.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerError::DurabilityMismatch`] from the array.
    pub fn add(&self, client: &ClientId, item: Arc<dyn Transfer>) -> Result<ArrayId, SchedulerError> {
        let priority = item.priority();
        let durability = item.durability();
        let mut state = self.state.write();
        let existing = state.classes.get(&priority).and_then(|class| {
            class
                .buckets
                .iter()
                .find(|b| &b.client == client && b.durability == durability)
                .map(|b| Arc::clone(&b.array))
        });
        let array = match existing {
            Some(array) => array,
            None => {
                let id = ArrayId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let array = Arc::new(TransferArray::new(id, durability, self.store.clone()));
                debug!(array = %id, %priority, %client, ?durability, "created grab array");
                state.arena.insert(id, Arc::clone(&array));
                state.classes.entry(priority).or_default().buckets.push(Bucket {
                    client: client.clone(),
                    durability,
                    array: Arc::clone(&array),
                });
                array
            }
        };
        array.add(item)?;
        Ok(array.id())
    }

    /// Remove a transfer from whichever array currently holds it.
    pub fn remove(&self, item: &(dyn Transfer + 'static)) -> bool {
        let Some(parent) = item.parent() else {
            return false;
        };
        let array = self.state.read().arena.get(&parent).cloned();
        match array {
            Some(array) => array.remove(item),
            None => {
                warn!(array = %parent, item = %item.item_id(), "parent array no longer indexed");
                item.set_parent(None);
                false
            }
        }
    }

    /// Move a transfer into the array matching its current priority.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`PriorityIndex::add`].
    pub fn rehome(&self, client: &ClientId, item: Arc<dyn Transfer>) -> Result<ArrayId, SchedulerError> {
        self.remove(item.as_ref());
        self.add(client, item)
    }

    /// Pick the next runnable transfer: classes in ascending order, clients
    /// round-robin within a class. `None` means nothing is eligible now.
    pub fn next_runnable<P, R>(&self, excluding: &P, rng: &mut R) -> Option<Selection>
    where
        P: ExclusionPolicy<dyn Transfer> + ?Sized,
        R: Rng,
    {
        let state = self.state.read();
        for (priority, class) in &state.classes {
            let n = class.buckets.len();
            if n == 0 {
                continue;
            }
            let start = class.cursor.fetch_add(1, Ordering::Relaxed) % n;
            for k in 0..n {
                let bucket = &class.buckets[(start + k) % n];
                if let Some(item) = bucket.array.remove_random(excluding, rng) {
                    debug!(%priority, client = %bucket.client, item = %item.item_id(), "selected");
                    return Some(Selection {
                        priority: *priority,
                        client: bucket.client.clone(),
                        item,
                    });
                }
            }
        }
        None
    }

    /// Drop arrays with no live slots. Returns how many were dropped.
    pub fn prune_empty(&self) -> usize {
        let mut state = self.state.write();
        let mut dropped = Vec::new();
        for class in state.classes.values_mut() {
            class.buckets.retain(|bucket| {
                let keep = !bucket.array.is_empty();
                if !keep {
                    dropped.push(bucket.array.id());
                }
                keep
            });
        }
        state.classes.retain(|_, class| !class.buckets.is_empty());
        for id in &dropped {
            state.arena.remove(id);
        }
        dropped.len()
    }

    /// Array by id.
    pub fn array(&self, id: ArrayId) -> Option<Arc<TransferArray>> {
        self.state.read().arena.get(&id).cloned()
    }

    /// Number of arrays.
    pub fn array_count(&self) -> usize {
        self.state.read().arena.len()
    }

    /// Total live slots across all arrays.
    pub fn len(&self) -> usize {
        self.state.read().arena.values().map(|a| a.len()).sum()
    }

    /// True when no array has live slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy of every array, most urgent class first.
    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let state = self.state.read();
        state
            .classes
            .iter()
            .flat_map(|(priority, class)| {
                class.buckets.iter().map(|bucket| BucketSnapshot {
                    priority: *priority,
                    client: bucket.client.clone(),
                    durability: bucket.durability,
                    len: bucket.array.len(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::core::grab_array::ExcludeNothing;
    use crate::infra::transfer::InMemoryTransfer;

    fn transfer(priority: PriorityClass) -> Arc<InMemoryTransfer> {
        InMemoryTransfer::new(Durability::Transient, priority)
    }

    #[test]
    fn test_lazy_array_creation() {
        let index = PriorityIndex::default();
        let alice = ClientId::new("alice");
        let a = index.add(&alice, transfer(PriorityClass::UPDATE)).unwrap();
        let b = index.add(&alice, transfer(PriorityClass::UPDATE)).unwrap();
        let c = index.add(&alice, transfer(PriorityClass::PREFETCH)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(index.array_count(), 2);
    }

    #[test]
    fn test_more_urgent_class_drains_first() {
        let index = PriorityIndex::default();
        let client = ClientId::new("alice");
        let urgent: Vec<_> = (0..3).map(|_| transfer(PriorityClass::INTERACTIVE)).collect();
        for item in &urgent {
            index.add(&client, item.clone()).unwrap();
        }
        index.add(&client, transfer(PriorityClass::MINIMUM)).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..3 {
            let chosen = index.next_runnable(&ExcludeNothing, &mut rng).unwrap();
            assert_eq!(chosen.priority, PriorityClass::INTERACTIVE);
        }
        let last = index.next_runnable(&ExcludeNothing, &mut rng).unwrap();
        assert_eq!(last.priority, PriorityClass::MINIMUM);
        assert!(index.next_runnable(&ExcludeNothing, &mut rng).is_none());
    }

    #[test]
    fn test_clients_alternate_within_class() {
        let index = PriorityIndex::default();
        let alice = ClientId::new("alice");
        let bob = ClientId::new("bob");
        for _ in 0..4 {
            index.add(&alice, transfer(PriorityClass::UPDATE)).unwrap();
            index.add(&bob, transfer(PriorityClass::UPDATE)).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(11);
        let picks: Vec<_> = (0..4)
            .filter_map(|_| index.next_runnable(&ExcludeNothing, &mut rng))
            .map(|s| s.client)
            .collect();
        assert_eq!(picks.iter().filter(|c| **c == alice).count(), 2);
        assert_eq!(picks.iter().filter(|c| **c == bob).count(), 2);
    }

    #[test]
    fn test_rehome_moves_between_classes() {
        let index = PriorityIndex::default();
        let client = ClientId::new("alice");
        let item = transfer(PriorityClass::PREFETCH);
        let before = index.add(&client, item.clone()).unwrap();
        item.set_priority(PriorityClass::MAXIMUM);
        let after = index.rehome(&client, item.clone()).unwrap();
        assert_ne!(before, after);
        assert_eq!(item.parent(), Some(after));
        assert!(index.array(before).unwrap().is_empty());
        assert_eq!(index.prune_empty(), 1);
        assert_eq!(index.array_count(), 1);
    }

    #[test]
    fn test_remove_through_shared_transfer() {
        let index = PriorityIndex::default();
        let client = ClientId::new("alice");
        let shared: Arc<dyn Transfer> = transfer(PriorityClass::UPDATE);
        let array = index.add(&client, Arc::clone(&shared)).unwrap();

        assert!(index.remove(shared.as_ref()));
        assert!(shared.parent().is_none());
        assert!(index.array(array).unwrap().is_empty());
        assert!(!index.remove(shared.as_ref()));
    }
}
