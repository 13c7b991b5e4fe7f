//! Builders to construct the request queue from configuration.

pub mod queue_builder;

pub use queue_builder::{build_queue, LoadReceiver, QueueHandles, Startup};
