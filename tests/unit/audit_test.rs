//! Tests for audit sink

use prometheus_request_queue::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};
use prometheus_request_queue::util::serde::ClientId;

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let client = ClientId::new("fproxy");

    let event = build_audit_event(&client, "req1", AuditAction::Submit, Some("GET".to_string()));
    sink.record(event);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier, "req1");
    assert_eq!(events[0].client, client);
    assert_eq!(events[0].action, AuditAction::Submit);
    assert_eq!(events[0].detail.as_deref(), Some("GET"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let client = ClientId::new("fproxy");

    sink.record(build_audit_event(&client, "req1", AuditAction::Submit, None));
    sink.record(build_audit_event(&client, "req2", AuditAction::Submit, None));
    sink.record(build_audit_event(&client, "req3", AuditAction::Finish, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].identifier, "req2");
    assert_eq!(events[1].action, AuditAction::Finish);
}

#[test]
fn test_build_audit_event() {
    let client = ClientId::global();
    let event = build_audit_event(&client, "site", AuditAction::Remove, None);
    assert!(event.event_id.contains("site"));
    assert!(event.event_id.contains(&AuditAction::Remove.to_string()));
    assert!(event.created_at_ms > 0);
    assert!(event.detail.is_none());
}
