//! Configuration models for the queue, its store, and the starter.

pub mod queue;

pub use queue::{QueueConfig, RequestStoreConfig, StarterConfig};
