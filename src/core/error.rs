//! Error types for scheduler operations.

use thiserror::Error;

use crate::util::serde::Durability;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An item's durability does not match the grab array it was offered to.
    #[error("durability mismatch: item is {item:?} but array is {array:?}")]
    DurabilityMismatch {
        /// Durability of the rejected item.
        item: Durability,
        /// Durability of the target array.
        array: Durability,
    },
    /// Identifier already registered for this client.
    #[error("identifier collision: {0}")]
    IdentifierCollision(String),
    /// No request with this identifier.
    #[error("request not found: {0}")]
    RequestNotFound(String),
    /// Persistence class string was not recognised.
    #[error("unknown persistence class: {0}")]
    UnknownPersistence(String),
    /// Persistence class cannot be reloaded from the durable store.
    #[error("persistence class `{0}` cannot be reloaded")]
    DisallowedPersistence(String),
    /// Request type tag was not recognised.
    #[error("unknown request type: {0}")]
    UnknownRequestType(String),
    /// Stored field set could not be parsed.
    #[error("malformed request record: {0}")]
    MalformedRecord(String),
    /// Priority class outside the supported range.
    #[error("priority class {0} out of range")]
    InvalidPriority(u8),
    /// Request is not persistent and cannot be written to the store.
    #[error("request {0} is not persistent")]
    NotPersistent(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
