//! Integration tests for completion tracking across restarts.
//!
//! This test validates:
//! 1. The seen set survives a save and reload
//! 2. Identifiers without a matching global request are dropped on load
//! 3. Dismissed entries stay gone after a restart
//! 4. Legacy and backup lists are picked up

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use prometheus_request_queue::core::{
    CompletionListener, CompletionTracker, Direction, EntryKind, NewRequest, Outcome, PersistenceClass,
    PriorityIndex, Request, RequestKind, RequestLookup, RequestQueue, RequestStore, SchedulerError, Spawn,
    SuccessInfo, Transfer,
};
use prometheus_request_queue::infra::{CompletedListFiles, InMemoryAlertSink, InMemoryStore, InMemoryTransfer, ListSource};
use prometheus_request_queue::util::serde::{ClientId, Durability, PriorityClass, RequestKey};

/// Runs blocking jobs on the calling thread so saves and loads finish before
/// the call returns.
#[derive(Clone)]
struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn<F>(&self, _fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        unreachable!("tracker only spawns blocking jobs");
    }

    fn spawn_blocking<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        job();
    }
}

struct Node {
    queue: Arc<RequestQueue>,
    downloads: Arc<CompletionTracker<InlineSpawner>>,
    uploads: Arc<CompletionTracker<InlineSpawner>>,
    alerts: Arc<InMemoryAlertSink>,
}

fn boot(dir: &Path, store: &Arc<InMemoryStore>) -> Node {
    let queue = Arc::new(RequestQueue::new(
        Arc::new(PriorityIndex::default()),
        Some(Arc::clone(store) as Arc<dyn RequestStore>),
    ));
    let alerts = Arc::new(InMemoryAlertSink::new());
    let downloads = Arc::new(CompletionTracker::new(
        Direction::Downloads,
        dir,
        alerts.clone(),
        InlineSpawner,
    ));
    let uploads = Arc::new(CompletionTracker::new(Direction::Uploads, dir, alerts.clone(), InlineSpawner));
    queue.add_completion_listener(downloads.clone() as Arc<dyn CompletionListener>);
    queue.add_completion_listener(uploads.clone() as Arc<dyn CompletionListener>);
    Node {
        queue,
        downloads,
        uploads,
        alerts,
    }
}

fn no_transfer(_: &Request) -> Result<Arc<dyn Transfer>, SchedulerError> {
    Err(SchedulerError::Backend("finished requests need no transfer".into()))
}

fn restart(dir: &Path, store: &Arc<InMemoryStore>) -> Node {
    let node = boot(dir, store);
    node.queue.reload(&no_transfer).unwrap();
    node
}

fn complete(node: &Node, kind: RequestKind, identifier: &str, key: &str) {
    let request = Request::new(
        NewRequest::new(kind, RequestKey::new(key), identifier)
            .with_persistence(PersistenceClass::Forever)
            .on_global_queue(),
        ClientId::new("fproxy"),
    );
    node.queue
        .start(request, InMemoryTransfer::new(Durability::Durable, PriorityClass::default()))
        .unwrap();
    node.queue
        .finish_request(
            &ClientId::global(),
            identifier,
            Outcome::Succeeded(SuccessInfo {
                result_key: RequestKey::new(key),
                size: 2048,
            }),
        )
        .unwrap();
}

fn lookup(node: &Node) -> Arc<dyn RequestLookup> {
    Arc::clone(&node.queue) as Arc<dyn RequestLookup>
}

#[test]
fn test_seen_set_survives_restart_minus_vanished_requests() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());

    let node = boot(dir.path(), &store);
    complete(&node, RequestKind::Get, "keep", "CHK@a/keep.bin");
    complete(&node, RequestKind::Get, "vanish", "CHK@b/vanish.bin");
    complete(&node, RequestKind::Put, "insert", "CHK@c/insert.bin");
    assert_eq!(node.downloads.identifiers(), vec!["keep", "vanish"]);
    assert_eq!(node.uploads.identifiers(), vec!["insert"]);
    node.downloads.flush().unwrap();
    drop(node);

    store.delete(&ClientId::global(), "vanish").unwrap();

    let node = restart(dir.path(), &store);
    let report = node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(report.source, ListSource::Primary);
    assert_eq!(report.kept, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(node.downloads.identifiers(), vec!["keep"]);

    let alert = node.alerts.alert(EntryKind::Get).unwrap();
    assert_eq!(alert.title, "Download succeeded: keep.bin");
    assert_eq!(alert.entries[0].durability, Durability::Durable);

    let uploads = node.uploads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(uploads.kept, 1);
    assert!(node.uploads.contains("insert"));

    // The dropped identifier was written out, so a second restart agrees.
    let files = CompletedListFiles::new(dir.path(), Direction::Downloads);
    assert_eq!(files.load().identifiers, vec!["keep"]);
}

#[test]
fn test_dismissed_entry_gone_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());

    let node = boot(dir.path(), &store);
    complete(&node, RequestKind::Get, "Y", "CHK@y/movie.mkv");
    complete(&node, RequestKind::Get, "Q", "CHK@q/song.ogg");
    assert_eq!(node.downloads.pending(EntryKind::Get).len(), 2);

    node.downloads
        .dismiss_identifier("Y")
        .unwrap()
        .blocking_recv()
        .unwrap()
        .unwrap();
    assert!(!node.downloads.contains("Y"));
    assert!(node
        .downloads
        .pending(EntryKind::Get)
        .iter()
        .all(|entry| entry.identifier != "Y"));
    assert_eq!(node.alerts.alert(EntryKind::Get).unwrap().title, "Download succeeded: song.ogg");
    drop(node);

    let node = restart(dir.path(), &store);
    node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(node.downloads.identifiers(), vec!["Q"]);
}

#[test]
fn test_dismiss_kind_clears_group() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let node = boot(dir.path(), &store);
    complete(&node, RequestKind::PutDir { files: 3 }, "site", "USK@s/site/1");
    complete(&node, RequestKind::Put, "file", "CHK@f/file.txt");

    let alert = node.alerts.alert(EntryKind::PutDir).unwrap();
    assert_eq!(alert.entries[0].files, Some(3));

    node.uploads.dismiss(EntryKind::PutDir).blocking_recv().unwrap().unwrap();
    assert!(node.alerts.alert(EntryKind::PutDir).is_none());
    assert!(node.alerts.alert(EntryKind::Put).is_some());
    assert_eq!(node.uploads.identifiers(), vec!["file"]);
}

#[test]
fn test_removing_request_forgets_completion() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let node = boot(dir.path(), &store);
    complete(&node, RequestKind::Get, "r", "CHK@r/r.bin");

    node.queue.remove_request(&ClientId::global(), "r").unwrap();
    assert!(!node.downloads.contains("r"));
    assert!(node.alerts.alert(EntryKind::Get).is_none());
}

#[test]
fn test_direction_mismatch_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    {
        let node = boot(dir.path(), &store);
        complete(&node, RequestKind::Put, "upload", "CHK@u/u.bin");
    }
    // A fetch list that wrongly names an insert.
    CompletedListFiles::new(dir.path(), Direction::Downloads)
        .save(["upload"])
        .unwrap();

    let node = restart(dir.path(), &store);
    let report = node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!((report.kept, report.dropped), (0, 1));
    assert!(node.downloads.identifiers().is_empty());
}

#[test]
fn test_legacy_list_migrated_then_removed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    {
        let node = boot(dir.path(), &store);
        complete(&node, RequestKind::Get, "old", "CHK@o/old.bin");
    }
    let files = CompletedListFiles::new(dir.path(), Direction::Downloads);
    std::fs::remove_file(files.primary()).unwrap();
    std::fs::write(files.legacy(), "old\n").unwrap();

    let node = restart(dir.path(), &store);
    let report = node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(report.source, ListSource::Legacy);
    assert!(files.primary().exists());

    let node = restart(dir.path(), &store);
    let report = node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(report.source, ListSource::Primary);
    assert!(!files.legacy().exists());
    assert!(node.downloads.contains("old"));
}

#[test]
fn test_backup_used_when_primary_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    {
        let node = boot(dir.path(), &store);
        complete(&node, RequestKind::Get, "b", "CHK@b/b.bin");
    }
    let files = CompletedListFiles::new(dir.path(), Direction::Downloads);
    std::fs::rename(files.primary(), files.backup()).unwrap();

    let node = restart(dir.path(), &store);
    let report = node.downloads.load(lookup(&node)).blocking_recv().unwrap().unwrap();
    assert_eq!(report.source, ListSource::Backup);
    assert_eq!(report.kept, 1);
}
