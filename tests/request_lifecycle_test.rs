//! Integration tests for the request lifecycle.
//!
//! This test validates:
//! 1. Identifiers are unique per client and on the global queue
//! 2. Fully-durable requests survive a restart through the file store
//! 3. Removal cancels, frees, and deletes the stored record
//! 4. Connection handlers only hear about connection-scoped requests

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use prometheus_request_queue::core::{
    ConnectionHandler, NewRequest, Outcome, PersistenceClass, PriorityIndex, Request, RequestKind,
    RequestQueue, RequestState, RequestStore, SchedulerError, SuccessInfo, Transfer,
};
use prometheus_request_queue::infra::{FileRequestStore, InMemoryStore, InMemoryTransfer};
use prometheus_request_queue::util::serde::{ClientId, Durability, PriorityClass, RequestKey};

fn queue_over(store: Arc<dyn RequestStore>) -> RequestQueue {
    RequestQueue::new(Arc::new(PriorityIndex::default()), Some(store))
}

fn durable_factory(_: &Request) -> Result<Arc<dyn Transfer>, SchedulerError> {
    Ok(InMemoryTransfer::new(Durability::Durable, PriorityClass::default()))
}

fn get(identifier: &str) -> NewRequest {
    NewRequest::new(RequestKind::Get, RequestKey::new("CHK@x/file.iso"), identifier)
}

#[test]
fn test_second_request_with_same_identifier_rejected() {
    let queue = queue_over(Arc::new(InMemoryStore::new()));
    let client = ClientId::new("fcp-1");

    queue
        .start(
            Request::new(get("dup"), client.clone()),
            InMemoryTransfer::new(Durability::Transient, PriorityClass::default()),
        )
        .unwrap();
    let err = queue
        .start(
            Request::new(get("dup"), client.clone()),
            InMemoryTransfer::new(Durability::Transient, PriorityClass::default()),
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::IdentifierCollision(id) if id == "dup"));
    assert_eq!(queue.index().len(), 1);

    // Another client may reuse the identifier.
    queue
        .start(
            Request::new(get("dup"), ClientId::new("fcp-2")),
            InMemoryTransfer::new(Durability::Transient, PriorityClass::default()),
        )
        .unwrap();
}

#[test]
fn test_global_identifiers_shared_across_submitting_clients() {
    let queue = queue_over(Arc::new(InMemoryStore::new()));
    let first = Request::new(
        get("site").with_persistence(PersistenceClass::Reboot).on_global_queue(),
        ClientId::new("a"),
    );
    let second = Request::new(
        get("site").with_persistence(PersistenceClass::Reboot).on_global_queue(),
        ClientId::new("b"),
    );
    queue
        .start(first, InMemoryTransfer::new(Durability::Transient, PriorityClass::default()))
        .unwrap();
    let err = queue
        .start(second, InMemoryTransfer::new(Durability::Transient, PriorityClass::default()))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::IdentifierCollision(_)));
}

#[test]
fn test_durable_request_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requests.jsonl");
    let client = ClientId::new("fcp-1");

    {
        let store = Arc::new(FileRequestStore::open(&path).unwrap());
        let queue = queue_over(store);
        let running = Request::new(
            get("X")
                .with_persistence(PersistenceClass::Forever)
                .with_priority(PriorityClass::INTERACTIVE)
                .with_client_token("token-x"),
            client.clone(),
        );
        queue
            .start(running, InMemoryTransfer::new(Durability::Durable, PriorityClass::default()))
            .unwrap();

        let done = Request::new(
            get("Z").with_persistence(PersistenceClass::Forever),
            client.clone(),
        );
        queue
            .start(done, InMemoryTransfer::new(Durability::Durable, PriorityClass::default()))
            .unwrap();
        queue
            .finish_request(
                &client,
                "Z",
                Outcome::Succeeded(SuccessInfo {
                    result_key: RequestKey::new("CHK@x/file.iso"),
                    size: 700,
                }),
            )
            .unwrap();

        // Reboot-class requests are never written.
        let reboot = Request::new(get("R").with_persistence(PersistenceClass::Reboot), client.clone());
        queue
            .start(reboot, InMemoryTransfer::new(Durability::Transient, PriorityClass::default()))
            .unwrap();
    }

    let store = Arc::new(FileRequestStore::open(&path).unwrap());
    let queue = queue_over(store);
    let report = queue.reload(&durable_factory).unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.failed, 0);

    let x = queue.get_request(&client, "X").unwrap();
    assert_eq!(x.key(), &RequestKey::new("CHK@x/file.iso"));
    assert_eq!(x.priority_class(), PriorityClass::INTERACTIVE);
    assert_eq!(x.client_token().as_deref(), Some("token-x"));
    assert!(!x.has_finished());
    assert_eq!(x.transfer().unwrap().priority(), PriorityClass::INTERACTIVE);

    let z = queue.get_request(&client, "Z").unwrap();
    assert!(z.has_finished());
    assert_eq!(z.success().unwrap().size, 700);
    assert!(z.transfer().is_none());

    assert!(queue.get_request(&client, "R").is_none());
    assert_eq!(queue.index().len(), 1);
}

#[test]
fn test_priority_change_is_persisted() {
    let store = Arc::new(InMemoryStore::new());
    let client = ClientId::new("fcp-1");
    {
        let queue = queue_over(store.clone());
        queue
            .start(
                Request::new(get("p").with_persistence(PersistenceClass::Forever), client.clone()),
                InMemoryTransfer::new(Durability::Durable, PriorityClass::default()),
            )
            .unwrap();
        queue.change_priority(&client, "p", PriorityClass::MAXIMUM).unwrap();
    }
    let queue = queue_over(store);
    queue.reload(&durable_factory).unwrap();
    let request = queue.get_request(&client, "p").unwrap();
    assert_eq!(request.priority_class(), PriorityClass::MAXIMUM);
}

#[test]
fn test_cancelled_durable_request_stays_finished_after_restart() {
    let store = Arc::new(InMemoryStore::new());
    let client = ClientId::new("fcp-1");
    {
        let queue = queue_over(store.clone());
        let transfer = InMemoryTransfer::new(Durability::Durable, PriorityClass::default());
        queue
            .start(
                Request::new(get("X").with_persistence(PersistenceClass::Forever), client.clone()),
                transfer.clone(),
            )
            .unwrap();

        assert!(queue.cancel_request(&client, "X").unwrap());
        assert!(transfer.is_cancelled());
        assert!(queue.index().is_empty());
        // The transfer's own failure arrives after the cancel and is ignored.
        assert!(!queue
            .finish_request(&client, "X", Outcome::Failed("aborted".into()))
            .unwrap());
    }

    let queue = queue_over(store);
    let report = queue.reload(&durable_factory).unwrap();
    assert_eq!(report.loaded, 1);
    let x = queue.get_request(&client, "X").unwrap();
    assert!(x.has_finished());
    assert_eq!(x.failure_reason().as_deref(), Some("cancelled"));
    assert!(x.transfer().is_none());
    assert!(queue.index().is_empty());
}

#[test]
fn test_remove_cancels_and_deletes_record() {
    let store = Arc::new(InMemoryStore::new());
    let queue = queue_over(store.clone());
    let client = ClientId::new("fcp-1");
    let transfer = InMemoryTransfer::new(Durability::Durable, PriorityClass::default());
    queue
        .start(
            Request::new(get("gone").with_persistence(PersistenceClass::Forever), client.clone()),
            transfer.clone(),
        )
        .unwrap();
    assert_eq!(store.record_count(), 1);

    let removed = queue.remove_request(&client, "gone").unwrap();
    assert_eq!(removed.state(), RequestState::Dropped);
    assert!(transfer.is_cancelled());
    assert!(transfer.data_freed());
    assert_eq!(store.record_count(), 0);
    assert!(queue.index().is_empty());
    assert!(matches!(
        queue.remove_request(&client, "gone"),
        Err(SchedulerError::RequestNotFound(_))
    ));
}

#[test]
fn test_reload_skips_malformed_records() {
    let store = Arc::new(InMemoryStore::new());
    let client = ClientId::new("fcp-1");
    store.insert_raw(client.clone(), "bad-json", "{not json");
    store.insert_raw(
        client.clone(),
        "bad-type",
        r#"{"type":"DELETE","client_name":"fcp-1","key":"CHK@k","identifier":"bad-type","verbosity":0,"priority_class":4,"persistence":"forever","finished":false,"global":false}"#,
    );
    store.insert_raw(
        client.clone(),
        "ok",
        r#"{"type":"GET","client_name":"fcp-1","key":"CHK@k","identifier":"ok","verbosity":0,"priority_class":4,"persistence":"forever","finished":false,"global":false}"#,
    );

    let queue = queue_over(store);
    let report = queue.reload(&durable_factory).unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.failed, 2);
    assert!(queue.get_request(&client, "ok").is_some());
}

#[derive(Default)]
struct RecordingConnection {
    finished: Mutex<Vec<String>>,
}

impl ConnectionHandler for RecordingConnection {
    fn finished_request(&self, request: &Request) {
        self.finished.lock().push(request.identifier().to_string());
    }
}

#[test]
fn test_connection_handler_only_for_connection_requests() {
    let queue = queue_over(Arc::new(InMemoryStore::new()));
    let client = ClientId::new("fcp-1");
    let connection = Arc::new(RecordingConnection::default());
    let weak: Weak<dyn ConnectionHandler> = Arc::downgrade(&connection) as Weak<dyn ConnectionHandler>;

    let scoped = Request::new(get("scoped"), client.clone()).with_connection(weak.clone());
    let reboot = Request::new(get("reboot").with_persistence(PersistenceClass::Reboot), client.clone())
        .with_connection(weak);
    queue
        .start(scoped, InMemoryTransfer::new(Durability::Transient, PriorityClass::default()))
        .unwrap();
    queue
        .start(reboot, InMemoryTransfer::new(Durability::Transient, PriorityClass::default()))
        .unwrap();

    for id in ["scoped", "reboot"] {
        assert!(queue
            .finish_request(&client, id, Outcome::Failed("timeout".into()))
            .unwrap());
    }
    assert!(!queue
        .finish_request(&client, "scoped", Outcome::Cancelled)
        .unwrap());

    assert_eq!(*connection.finished.lock(), vec!["scoped".to_string()]);
    assert_eq!(
        queue.get_request(&client, "reboot").unwrap().failure_reason().as_deref(),
        Some("timeout")
    );
}
