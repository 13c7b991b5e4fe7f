//! Backing store adapters.

pub mod file;
pub mod memory;

pub use file::FileRequestStore;
pub use memory::InMemoryStore;
