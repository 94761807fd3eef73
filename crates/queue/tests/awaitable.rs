//! Cooperative (task-suspending) queue primitives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use vigil_queue::{Message, MessageType, MultiTypeQueue, QueueConfig, ShutdownSignal};

fn queue_in(dir: &TempDir, shutdown: ShutdownSignal) -> Arc<MultiTypeQueue> {
    let config = QueueConfig {
        queue_size: 1_000,
        status_refresh_timer_ms: 20,
        ..QueueConfig::with_data_path(dir.path())
    };
    Arc::new(MultiTypeQueue::new(config, shutdown).unwrap())
}

fn fill(queue: &MultiTypeQueue, kind: MessageType, n: usize) {
    let batch: Vec<serde_json::Value> = (0..n).map(|i| json!({"i": i})).collect();
    assert_eq!(
        queue.push(&Message::new(kind, json!(batch), "test"), false).unwrap(),
        n
    );
}

#[tokio::test]
async fn push_awaitable_resumes_when_space_frees_up() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir, ShutdownSignal::new());
    fill(&queue, MessageType::Command, 1_000);

    let pusher = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .push_awaitable(&Message::new(MessageType::Command, json!({"late": true}), "test"))
                .await
                .unwrap()
        })
    };

    // Give the pusher time to reach its suspension point, then drain
    // two slots.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pusher.is_finished());
    queue.pop_n(MessageType::Command, 2, "", "").unwrap();

    assert_eq!(pusher.await.unwrap(), 1);
    assert_eq!(queue.size_per_type(MessageType::Command).unwrap(), 999);
}

#[tokio::test]
async fn get_next_n_awaitable_waits_for_the_requested_quantity() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir, ShutdownSignal::new());

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .get_next_n_awaitable(MessageType::Stateful, 3, "", "")
                .await
                .unwrap()
        })
    };

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue
                    .push(&Message::new(MessageType::Stateful, json!({"seq": i}), "test"), false)
                    .unwrap();
            }
        })
    };

    let batch = consumer.await.unwrap();
    producer.await.unwrap();
    let seqs: Vec<i64> = batch.iter().map(|m| m.payload["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, [0, 1, 2]);
}

#[tokio::test]
async fn shutdown_releases_cooperative_waiters() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = ShutdownSignal::new();
    let queue = queue_in(&dir, shutdown.clone());
    fill(&queue, MessageType::Command, 1_000);

    let pusher = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .push_awaitable(&Message::new(MessageType::Command, json!({"x": 1}), "test"))
                .await
                .unwrap()
        })
    };
    let peeker = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .get_next_n_awaitable(MessageType::Stateless, 5, "", "")
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request();

    assert_eq!(pusher.await.unwrap(), 0);
    assert_eq!(peeker.await.unwrap(), vec![]);
}
