//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    health, list_queue, submit_request, BucketView, Health, QueueListing, RequestStatus,
    RequestStatusResponse, RequestSubmission,
};
pub use tokio_spawner::TokioSpawner;
