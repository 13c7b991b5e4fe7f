//! Tests for utility types

use prometheus_request_queue::util::{ArrayId, ClientId, Durability, ItemId, PriorityClass, RequestKey};

#[test]
fn test_priority_ordering() {
    assert!(PriorityClass::MAXIMUM < PriorityClass::INTERACTIVE);
    assert!(PriorityClass::BULK_SPLITFILE < PriorityClass::MINIMUM);
    assert_eq!(PriorityClass::all().count(), PriorityClass::COUNT);
    assert_eq!(PriorityClass::from_u8(7), None);
    assert_eq!(PriorityClass::from_u8(3), Some(PriorityClass::UPDATE));
}

#[test]
fn test_global_client() {
    assert!(ClientId::global().is_global());
    assert!(!ClientId::new("fproxy").is_global());
    assert_eq!(ClientId::global().as_str(), ClientId::GLOBAL_NAME);
}

#[test]
fn test_preferred_filename() {
    assert_eq!(RequestKey::new("CHK@abc,def/photo.jpg").preferred_filename(), "photo.jpg");
}

#[test]
fn test_item_ids_are_unique() {
    assert_ne!(ItemId::new(), ItemId::new());
}

#[test]
fn test_array_id_display() {
    assert_eq!(ArrayId(4).to_string(), "array-4");
    assert!(Durability::Durable.is_durable());
    assert!(!Durability::Transient.is_durable());
}
