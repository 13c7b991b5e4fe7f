//! Tests for error types

use prometheus_request_queue::core::SchedulerError;
use prometheus_request_queue::util::serde::Durability;

#[test]
fn test_durability_mismatch_error() {
    let err = SchedulerError::DurabilityMismatch {
        item: Durability::Transient,
        array: Durability::Durable,
    };
    assert_eq!(
        format!("{err}"),
        "durability mismatch: item is Transient but array is Durable"
    );
}

#[test]
fn test_identifier_collision_error() {
    let err = SchedulerError::IdentifierCollision("req1".to_string());
    assert_eq!(format!("{err}"), "identifier collision: req1");
}

#[test]
fn test_unknown_persistence_error() {
    let err = SchedulerError::UnknownPersistence("sometimes".to_string());
    assert_eq!(format!("{err}"), "unknown persistence class: sometimes");
}

#[test]
fn test_invalid_priority_error() {
    let err = SchedulerError::InvalidPriority(9);
    assert_eq!(format!("{err}"), "priority class 9 out of range");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("store offline".to_string());
    assert_eq!(format!("{err}"), "backend error: store offline");
}

#[test]
fn test_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: SchedulerError = io.into();
    assert!(matches!(err, SchedulerError::Io(_)));
}
