//! Tests for configuration validation

use prometheus_request_queue::config::{QueueConfig, RequestStoreConfig, StarterConfig};

#[test]
fn test_default_queue_config_is_valid() {
    let cfg = QueueConfig::new("/var/lib/node");
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.request_store, RequestStoreConfig::InMemory);
}

#[test]
fn test_empty_node_dir_rejected() {
    let cfg = QueueConfig::new("");
    assert!(cfg.validate().unwrap_err().contains("node_dir"));
}

#[test]
fn test_empty_store_path_rejected() {
    let mut cfg = QueueConfig::new("/var/lib/node");
    cfg.request_store = RequestStoreConfig::File { path: "".into() };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_starter_builders() {
    let starter = StarterConfig::default()
        .with_worker_count(3)
        .with_idle_wait_ms(25)
        .with_channel_depth(4);
    assert_eq!(starter.worker_count, 3);
    assert_eq!(starter.idle_wait_ms, 25);
    assert_eq!(starter.channel_depth, 4);
    assert!(starter.validate().is_ok());
}

#[test]
fn test_starter_invalid_values() {
    assert!(StarterConfig::default().with_idle_wait_ms(0).validate().is_err());
    assert!(StarterConfig::default().with_channel_depth(0).validate().is_err());
    let mut small_stack = StarterConfig::default();
    small_stack.thread_stack_size = 1024;
    assert!(small_stack.validate().is_err());
}

#[test]
fn test_config_round_trips_through_json() {
    let mut cfg = QueueConfig::new("/node");
    cfg.request_store = RequestStoreConfig::File {
        path: "/node/requests.jsonl".into(),
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(QueueConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_parse_error_reported() {
    let err = QueueConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
