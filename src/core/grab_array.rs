//! Grab array: a container supporting fast removal of a uniformly random
//! eligible element.
//!
//! Items live in a dense prefix of a slot vector plus a membership set used for
//! duplicate detection. Selection never weights items; urgency is expressed
//! only by which array the caller chooses to poll.
//!
//! Small arrays are fully compacted on every selection, which is also where
//! dead items (`is_empty() == true`) are purged. Large arrays sample random
//! slots and give up after [`MAX_EXCLUDED`] exclusions so a mostly-excluded
//! bucket cannot stall the caller.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::core::store::{DurableStore, StoreRef};
use crate::core::SchedulerError;
use crate::util::serde::{ArrayId, Durability, ItemId};

/// Minimum slot capacity of an array.
pub const MIN_SIZE: usize = 32;

/// Occupancy below which selection takes the full compaction path.
pub const SMALL_ARRAY: usize = 10;

/// Exclusions tolerated by one large-array selection before it returns nothing.
pub const MAX_EXCLUDED: usize = 10;

/// Anything that can be scheduled through a grab array.
///
/// Implementations must not call back into the owning array from any of these
/// methods; they are invoked while the array lock is held.
pub trait GrabItem: Send + Sync {
    /// Stable identity used for membership tests.
    fn item_id(&self) -> ItemId;

    /// Fixed at creation; must equal the durability of any array holding the item.
    fn durability(&self) -> Durability;

    /// True once the item has no more work (cancelled or fully serviced).
    fn is_empty(&self) -> bool;

    /// False while the item must stay resident after being selected.
    fn can_remove(&self) -> bool {
        true
    }

    /// Array currently holding this item, if any.
    fn parent(&self) -> Option<ArrayId>;

    /// Record or clear the holding array. This is a relation, never ownership.
    fn set_parent(&self, parent: Option<ArrayId>);
}

/// Caller-supplied eligibility predicate applied during selection.
///
/// Called with the array lock held; it must not mutate the array.
pub trait ExclusionPolicy<T: ?Sized> {
    /// True if `item` must be skipped for now.
    fn exclude(&self, item: &T) -> bool;
}

impl<T: ?Sized, F> ExclusionPolicy<T> for F
where
    F: Fn(&T) -> bool,
{
    fn exclude(&self, item: &T) -> bool {
        self(item)
    }
}

/// Policy that never excludes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludeNothing;

impl<T: ?Sized> ExclusionPolicy<T> for ExcludeNothing {
    fn exclude(&self, _item: &T) -> bool {
        false
    }
}

/// Slot storage guarded by the array mutex.
struct Slots<T: ?Sized> {
    /// Live items in `[0, index)`, `None` beyond.
    reqs: Vec<Option<Arc<T>>>,
    /// Number of live slots.
    index: usize,
    contents: HashSet<ItemId>,
}

impl<T: GrabItem + ?Sized> Slots<T> {
    fn new() -> Self {
        Self {
            reqs: vec![None; MIN_SIZE],
            index: 0,
            contents: HashSet::new(),
        }
    }

    /// Move the last live slot into `i` and return what was at `i`.
    fn swap_remove_slot(&mut self, i: usize) -> Option<Arc<T>> {
        let last = self.index - 1;
        self.reqs.swap(i, last);
        self.index = last;
        self.reqs[last].take()
    }

    fn maybe_shrink(&mut self) {
        let capacity = self.reqs.len();
        if self.index < capacity / 4 && capacity > MIN_SIZE {
            let new_size = (self.index * 2).max(MIN_SIZE);
            self.reqs.truncate(new_size);
            self.reqs.shrink_to_fit();
        }
    }
}

/// Fair random-removal container for one (priority, client, durability) bucket.
pub struct GrabArray<T: GrabItem + ?Sized> {
    id: ArrayId,
    durability: Durability,
    store: Option<Arc<dyn DurableStore>>,
    slots: Mutex<Slots<T>>,
}

impl<T: GrabItem + ?Sized> GrabArray<T> {
    /// Create an empty array. Durable arrays report every structural change to
    /// `store` when one is given.
    pub fn new(id: ArrayId, durability: Durability, store: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            id,
            durability,
            store,
            slots: Mutex::new(Slots::new()),
        }
    }

    /// Create an empty memory-only array.
    #[must_use]
    pub fn transient(id: ArrayId) -> Self {
        Self::new(id, Durability::Transient, None)
    }

    /// Handle of this array.
    #[must_use]
    pub const fn id(&self) -> ArrayId {
        self.id
    }

    /// Durability shared by the array and all of its items.
    #[must_use]
    pub const fn durability(&self) -> Durability {
        self.durability
    }

    /// Add an item.
    ///
    /// Returns `Ok(false)` when the item is already finished or already a
    /// member; neither case changes the array.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DurabilityMismatch`] if the item's durability
    /// differs from the array's.
    pub fn add(&self, item: Arc<T>) -> Result<bool, SchedulerError> {
        if item.durability() != self.durability {
            error!(
                array = %self.id,
                item = %item.item_id(),
                "refusing item with mismatched durability"
            );
            return Err(SchedulerError::DurabilityMismatch {
                item: item.durability(),
                array: self.durability,
            });
        }
        if item.is_empty() {
            debug!(array = %self.id, item = %item.item_id(), "item already finished, not adding");
            return Ok(false);
        }

        let mut slots = self.slots.lock();
        if !slots.contents.insert(item.item_id()) {
            debug!(array = %self.id, item = %item.item_id(), len = slots.index, "already a member");
            return Ok(false);
        }
        item.set_parent(Some(self.id));
        if slots.index >= slots.reqs.len() {
            let grown = slots.reqs.len() * 2;
            slots.reqs.resize(grown, None);
        }
        let index = slots.index;
        slots.reqs[index] = Some(item);
        slots.index += 1;
        debug!(array = %self.id, len = slots.index, "added item");
        self.mark_changed(true);
        Ok(true)
    }

    /// Remove and return a random eligible item, or `None` if nothing is
    /// eligible right now.
    ///
    /// An item whose `can_remove()` is false is returned but stays in the array.
    pub fn remove_random<P, R>(&self, excluding: &P, rng: &mut R) -> Option<Arc<T>>
    where
        P: ExclusionPolicy<T> + ?Sized,
        R: Rng,
    {
        let mut slots = self.slots.lock();
        let mut excluded = 0usize;
        let mut changed = false;
        loop {
            if slots.index == 0 {
                debug!(array = %self.id, "array is empty");
                self.mark_changed(changed);
                return None;
            }
            if slots.index < SMALL_ARRAY {
                let (ret, compacted) = self.remove_random_small(&mut slots, excluding, rng);
                self.mark_changed(changed || compacted);
                return ret;
            }

            let i = rng.random_range(0..slots.index);
            let Some(item) = slots.reqs[i].clone() else {
                error!(array = %self.id, slot = i, len = slots.index, "empty slot inside live prefix");
                slots.swap_remove_slot(i);
                changed = true;
                continue;
            };
            self.page_in(&*item);

            if item.is_empty() {
                debug!(array = %self.id, item = %item.item_id(), "purging finished item");
                slots.contents.remove(&item.item_id());
                slots.swap_remove_slot(i);
                slots.maybe_shrink();
                item.set_parent(None);
                self.page_out(&*item);
                changed = true;
                continue;
            }

            if excluding.exclude(&*item) {
                self.page_out(&*item);
                excluded += 1;
                if excluded >= MAX_EXCLUDED {
                    warn!(
                        array = %self.id,
                        excluded,
                        len = slots.index,
                        "exclusion budget exhausted, returning nothing"
                    );
                    self.mark_changed(changed);
                    return None;
                }
                continue;
            }

            if !item.can_remove() {
                debug!(array = %self.id, item = %item.item_id(), "returning resident item");
                self.mark_changed(changed);
                return Some(item);
            }

            slots.contents.remove(&item.item_id());
            slots.swap_remove_slot(i);
            slots.maybe_shrink();
            item.set_parent(None);
            debug!(array = %self.id, len = slots.index, "removed random item");
            self.mark_changed(true);
            return Some(item);
        }
    }

    /// Compact the whole array, purge finished items, then pick uniformly among
    /// the eligible ones. Returns the selection and whether anything changed.
    fn remove_random_small<P, R>(
        &self,
        slots: &mut Slots<T>,
        excluding: &P,
        rng: &mut R,
    ) -> (Option<Arc<T>>, bool)
    where
        P: ExclusionPolicy<T> + ?Sized,
        R: Rng,
    {
        let mut changed = false;
        let mut valid_slots = [0usize; SMALL_ARRAY];
        let mut valid = 0usize;
        let mut excluded = 0usize;
        let mut target = 0usize;

        for i in 0..slots.index {
            let Some(item) = slots.reqs[i].take() else {
                error!(array = %self.id, slot = i, len = slots.index, "empty slot inside live prefix");
                changed = true;
                continue;
            };
            self.page_in(&*item);
            if item.is_empty() {
                slots.contents.remove(&item.item_id());
                item.set_parent(None);
                self.page_out(&*item);
                changed = true;
                continue;
            }
            if excluding.exclude(&*item) {
                excluded += 1;
            } else {
                valid_slots[valid] = target;
                valid += 1;
            }
            if i != target {
                changed = true;
            }
            slots.reqs[target] = Some(item);
            target += 1;
        }
        slots.index = target;

        if valid == 0 {
            self.page_out_all(slots, None);
            if excluded == 0 {
                debug!(array = %self.id, "no valid or excluded items");
                slots.maybe_shrink();
                return (None, true);
            }
            debug!(array = %self.id, excluded, "no valid items");
            return (None, changed);
        }

        let pick = if valid == 1 {
            0
        } else {
            rng.random_range(0..valid)
        };
        let chosen = valid_slots[pick];
        let Some(item) = slots.reqs[chosen].clone() else {
            error!(array = %self.id, slot = chosen, "chosen slot vanished during compaction");
            return (None, changed);
        };
        self.page_out_all(slots, Some(item.item_id()));

        if item.can_remove() {
            slots.contents.remove(&item.item_id());
            slots.swap_remove_slot(chosen);
            slots.maybe_shrink();
            item.set_parent(None);
            changed = true;
        }
        debug!(array = %self.id, valid, excluded, "chose random item");
        (Some(item), changed)
    }

    /// Remove a specific item. Returns false if it was not a member.
    pub fn remove(&self, item: &T) -> bool {
        let id = item.item_id();
        let mut slots = self.slots.lock();
        if !slots.contents.remove(&id) {
            return false;
        }
        let live = slots.index;
        let position = slots.reqs[..live]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|held| held.item_id() == id));
        match position {
            Some(pos) => {
                slots.swap_remove_slot(pos);
            }
            None => error!(array = %self.id, item = %id, "member missing from slots"),
        }
        slots.maybe_shrink();
        self.mark_changed(true);
        drop(slots);
        item.set_parent(None);
        true
    }

    /// True when no live slots remain.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().index == 0
    }

    /// Number of live slots, including finished items not yet purged.
    pub fn len(&self) -> usize {
        self.slots.lock().index
    }

    /// Current slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.lock().reqs.len()
    }

    /// Membership test.
    pub fn contains(&self, id: ItemId) -> bool {
        self.slots.lock().contents.contains(&id)
    }

    /// Snapshot of the live items.
    pub fn items(&self) -> Vec<Arc<T>> {
        let slots = self.slots.lock();
        slots.reqs[..slots.index].iter().flatten().cloned().collect()
    }

    /// True if the membership set and the live slots describe exactly the same
    /// items with no holes.
    pub fn is_consistent(&self) -> bool {
        let slots = self.slots.lock();
        let live = &slots.reqs[..slots.index];
        if live.iter().any(Option::is_none) || slots.reqs[slots.index..].iter().any(Option::is_some) {
            return false;
        }
        let ids: HashSet<ItemId> = live.iter().flatten().map(|item| item.item_id()).collect();
        ids.len() == slots.index && ids == slots.contents
    }

    fn mark_changed(&self, changed: bool) {
        if !changed || !self.durability.is_durable() {
            return;
        }
        if let Some(store) = &self.store {
            store.mark_dirty(StoreRef::Membership(self.id));
            store.mark_dirty(StoreRef::Array(self.id));
        }
    }

    fn page_in(&self, item: &T) {
        if let (Durability::Durable, Some(store)) = (self.durability, &self.store) {
            store.activate(StoreRef::Item(item.item_id()), 1);
        }
    }

    fn page_out(&self, item: &T) {
        if let (Durability::Durable, Some(store)) = (self.durability, &self.store) {
            store.deactivate(StoreRef::Item(item.item_id()), 1);
        }
    }

    fn page_out_all(&self, slots: &Slots<T>, keep: Option<ItemId>) {
        if !self.durability.is_durable() || self.store.is_none() {
            return;
        }
        for item in slots.reqs[..slots.index].iter().flatten() {
            if Some(item.item_id()) != keep {
                self.page_out(item.as_ref());
            }
        }
    }
}

impl<T: GrabItem + ?Sized> Drop for GrabArray<T> {
    fn drop(&mut self) {
        let id = self.id;
        let slots = self.slots.get_mut();
        for item in slots.reqs.drain(..).flatten() {
            if item.parent() == Some(id) {
                item.set_parent(None);
            }
        }
        slots.contents.clear();
        slots.index = 0;
    }
}
