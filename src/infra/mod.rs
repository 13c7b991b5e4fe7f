//! Infrastructure adapters for durable storage, completed lists, alerts, and transfers.

pub mod alerts;
pub mod completed_list;
pub mod store;
pub mod transfer;

pub use alerts::InMemoryAlertSink;
pub use completed_list::{CompletedListFiles, ListSource, LoadedList};
pub use store::{FileRequestStore, InMemoryStore};
pub use transfer::InMemoryTransfer;
