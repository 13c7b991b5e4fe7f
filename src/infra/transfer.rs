//! In-memory transfer used by tests, benches and the request starter demos.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::grab_array::GrabItem;
use crate::core::request::{Transfer, TransferProgress};
use crate::util::serde::{ArrayId, Durability, ItemId, PriorityClass};

/// Transfer whose progress and completion are driven by the caller.
pub struct InMemoryTransfer {
    id: ItemId,
    durability: Durability,
    priority: Mutex<PriorityClass>,
    parent: Mutex<Option<ArrayId>>,
    cancelled: AtomicBool,
    done: AtomicBool,
    resident: AtomicBool,
    freed: AtomicBool,
    transferred: AtomicU64,
    total: Option<u64>,
}

impl InMemoryTransfer {
    /// New transfer with unknown total size.
    pub fn new(durability: Durability, priority: PriorityClass) -> Arc<Self> {
        Self::with_total(durability, priority, None)
    }

    /// New transfer with a known total size.
    pub fn with_total(durability: Durability, priority: PriorityClass, total: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            id: ItemId::new(),
            durability,
            priority: Mutex::new(priority),
            parent: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            resident: AtomicBool::new(false),
            freed: AtomicBool::new(false),
            transferred: AtomicU64::new(0),
            total,
        })
    }

    /// Mark the transfer as having no remaining work.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Keep the transfer in its array when selected.
    pub fn set_resident(&self, resident: bool) {
        self.resident.store(resident, Ordering::SeqCst);
    }

    /// Record bytes moved.
    pub fn advance(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether `free_data` has been called.
    pub fn data_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }
}

impl GrabItem for InMemoryTransfer {
    fn item_id(&self) -> ItemId {
        self.id
    }

    fn durability(&self) -> Durability {
        self.durability
    }

    fn is_empty(&self) -> bool {
        self.done.load(Ordering::SeqCst) || self.is_cancelled()
    }

    fn can_remove(&self) -> bool {
        !self.resident.load(Ordering::SeqCst)
    }

    fn parent(&self) -> Option<ArrayId> {
        *self.parent.lock()
    }

    fn set_parent(&self, parent: Option<ArrayId>) {
        *self.parent.lock() = parent;
    }
}

impl Transfer for InMemoryTransfer {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn priority(&self) -> PriorityClass {
        *self.priority.lock()
    }

    fn set_priority(&self, priority: PriorityClass) {
        *self.priority.lock() = priority;
    }

    fn progress(&self) -> TransferProgress {
        TransferProgress {
            transferred: self.transferred.load(Ordering::SeqCst),
            total: self.total,
        }
    }

    fn free_data(&self) {
        self.freed.store(true, Ordering::SeqCst);
    }
}
