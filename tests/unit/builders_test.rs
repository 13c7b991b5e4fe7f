//! Tests for builder modules

use std::sync::Arc;

use prometheus_request_queue::builders::build_queue;
use prometheus_request_queue::config::{QueueConfig, RequestStoreConfig};
use prometheus_request_queue::core::{
    Direction, EntryKind, NewRequest, Outcome, PersistenceClass, Request, RequestKind, SchedulerError, SuccessInfo,
    Transfer,
};
use prometheus_request_queue::infra::{CompletedListFiles, InMemoryAlertSink, InMemoryTransfer};
use prometheus_request_queue::runtime::TokioSpawner;
use prometheus_request_queue::util::serde::{ClientId, Durability, PriorityClass, RequestKey};

#[tokio::test]
async fn test_in_memory_build_wires_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = QueueConfig::new(dir.path());
    let alerts = Arc::new(InMemoryAlertSink::new());
    let handles = build_queue(&cfg, alerts, TokioSpawner::try_current().unwrap()).unwrap();

    assert!(handles.durable.is_some());
    assert_eq!(handles.downloads.direction(), Direction::Downloads);
    assert_eq!(handles.uploads.direction(), Direction::Uploads);
}

#[tokio::test]
async fn test_trackers_hear_global_completions() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = QueueConfig::new(dir.path());
    let alerts = Arc::new(InMemoryAlertSink::new());
    let handles = build_queue(&cfg, alerts.clone(), TokioSpawner::try_current().unwrap()).unwrap();

    let request = Request::new(
        NewRequest::new(RequestKind::Put, RequestKey::new("SSK@site/index.html"), "upload-1")
            .with_persistence(PersistenceClass::Reboot)
            .on_global_queue(),
        ClientId::new("fproxy"),
    );
    let transfer = InMemoryTransfer::new(Durability::Transient, PriorityClass::default());
    handles.queue.start(request, transfer).unwrap();
    handles
        .queue
        .finish_request(
            &ClientId::global(),
            "upload-1",
            Outcome::Succeeded(SuccessInfo {
                result_key: RequestKey::new("SSK@site/index.html"),
                size: 42,
            }),
        )
        .unwrap();

    assert!(handles.uploads.contains("upload-1"));
    assert!(!handles.downloads.contains("upload-1"));
    assert_eq!(alerts.alert(EntryKind::Put).unwrap().entries.len(), 1);
    handles.flush().unwrap();
}

fn resume(_: &Request) -> Result<Arc<dyn Transfer>, SchedulerError> {
    Ok(InMemoryTransfer::new(Durability::Durable, PriorityClass::default()))
}

#[tokio::test]
async fn test_completed_history_survives_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = QueueConfig::new(dir.path());
    cfg.request_store = RequestStoreConfig::File {
        path: dir.path().join("requests.jsonl"),
    };

    {
        let handles = build_queue(&cfg, Arc::new(InMemoryAlertSink::new()), TokioSpawner::try_current().unwrap()).unwrap();
        let startup = handles.start(&resume).unwrap();
        startup.downloads.await.unwrap().unwrap();
        startup.uploads.await.unwrap().unwrap();

        let request = Request::new(
            NewRequest::new(RequestKind::Get, RequestKey::new("CHK@y/movie.mkv"), "Y")
                .with_persistence(PersistenceClass::Forever)
                .on_global_queue(),
            ClientId::new("fproxy"),
        );
        let transfer = InMemoryTransfer::new(Durability::Durable, PriorityClass::default());
        handles.queue.start(request, transfer).unwrap();
        handles
            .queue
            .finish_request(
                &ClientId::global(),
                "Y",
                Outcome::Succeeded(SuccessInfo {
                    result_key: RequestKey::new("CHK@y/movie.mkv"),
                    size: 4096,
                }),
            )
            .unwrap();
        handles.flush().unwrap();
    }

    let alerts = Arc::new(InMemoryAlertSink::new());
    let handles = build_queue(&cfg, alerts.clone(), TokioSpawner::try_current().unwrap()).unwrap();
    let startup = handles.start(&resume).unwrap();
    assert_eq!(startup.reload.loaded, 1);
    let report = startup.downloads.await.unwrap().unwrap();
    assert_eq!((report.kept, report.dropped), (1, 0));
    assert!(handles.downloads.contains("Y"));
    assert_eq!(alerts.alert(EntryKind::Get).unwrap().entries.len(), 1);

    let files = CompletedListFiles::new(dir.path(), Direction::Downloads);
    assert_eq!(files.load().identifiers, vec!["Y"]);

    // A second start does not read the store again.
    let again = handles.start(&resume).unwrap();
    assert_eq!(again.reload.loaded, 0);
    assert_eq!(again.downloads.await.unwrap().unwrap().kept, 1);
}
