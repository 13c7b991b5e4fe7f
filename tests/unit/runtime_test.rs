//! Tests for tokio spawner utilities

use prometheus_request_queue::core::Spawn;
use prometheus_request_queue::runtime::tokio_spawner::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_tokio_spawner_spawn_blocking() {
    let spawner = TokioSpawner::try_current().expect("inside runtime");

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn_blocking(move || {
        tx.send(std::thread::current().name().map(str::to_string)).unwrap();
    });

    assert!(rx.await.is_ok());
}
