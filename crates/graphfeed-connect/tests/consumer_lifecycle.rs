//! Consumer loop against the in-memory broker and control API

use async_trait::async_trait;
use graphfeed_connect::memory::{MemoryBroker, MemoryControlApi};
use graphfeed_connect::{
    handler_fn, ConnectError, ConsumerPolicy, CurrentWork, JobStatus, MessageHandler,
    RetryPolicy, WorkConsumer, WorkItem,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const QUEUE: &str = "listen_c1";

fn consumer(
    broker: &MemoryBroker,
    api: &Arc<MemoryControlApi>,
    handler: impl MessageHandler,
) -> Arc<WorkConsumer> {
    Arc::new(
        WorkConsumer::new(
            QUEUE,
            Arc::new(broker.clone()),
            api.clone(),
            Arc::new(handler),
            CurrentWork::default(),
        )
        .with_policy(ConsumerPolicy {
            reconnect: RetryPolicy::forever(Duration::ZERO),
            ..Default::default()
        }),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Fails every item whose work id starts with "bad"
struct SelectiveHandler;

#[async_trait]
impl MessageHandler for SelectiveHandler {
    async fn handle(&self, item: WorkItem) -> anyhow::Result<Vec<String>> {
        if item.work_id.starts_with("bad") {
            anyhow::bail!("cannot process {}", item.work_id);
        }
        Ok(vec![format!("imported {}", item.work_id)])
    }
}

#[tokio::test]
async fn test_each_delivery_settled_exactly_once() {
    let broker = MemoryBroker::new();
    let api = Arc::new(MemoryControlApi::new());
    broker.enqueue(QUEUE, r#"{"job_id":"j1","work_id":"good-1"}"#);
    broker.enqueue(QUEUE, r#"{"job_id":"j2","work_id":"bad-1"}"#);
    broker.enqueue(QUEUE, "<xml/>");
    broker.enqueue(QUEUE, r#"{"job_id":"j3","work_id":"good-2"}"#);

    let consumer = consumer(&broker, &api, SelectiveHandler);
    let (tx, rx) = broadcast::channel(1);
    let task = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run(rx).await }
    });

    wait_until(|| broker.acked().len() + broker.rejected().len() == 4).await;
    tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    assert_eq!(broker.acked().len(), 3);
    assert_eq!(broker.rejected().len(), 1);
    assert_eq!(broker.pending(QUEUE), 0);

    let completes = api.updates_with(JobStatus::Complete);
    let errors = api.updates_with(JobStatus::Error);
    assert_eq!(completes.len(), 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].job_id.as_deref(), Some("j2"));
    assert_eq!(errors[0].messages, vec!["cannot process bad-1"]);
    assert!(completes.iter().all(|u| u.job_id.as_deref() != Some("j2")));
    assert_eq!(api.updates_with(JobStatus::Progress).len(), 3);
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let broker = MemoryBroker::new();
    let api = Arc::new(MemoryControlApi::new());
    broker.fail_next_subscribes(2);
    broker.fail_next_fetches(1);
    broker.enqueue(QUEUE, r#"{"work_id":"w1"}"#);

    let consumer = consumer(
        &broker,
        &api,
        handler_fn(|_item: WorkItem| async move { Ok(vec![]) }),
    );
    let (tx, rx) = broadcast::channel(1);
    let task = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run(rx).await }
    });

    wait_until(|| broker.acked().len() == 1).await;
    tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    // two refused subscribes, one subscription dropped by the fetch failure
    assert_eq!(broker.subscriptions_opened(), 2);
}

#[tokio::test]
async fn test_bounded_reconnect_gives_up() {
    let broker = MemoryBroker::new();
    let api = Arc::new(MemoryControlApi::new());
    broker.fail_next_subscribes(10);

    let consumer = WorkConsumer::new(
        QUEUE,
        Arc::new(broker.clone()),
        api.clone(),
        Arc::new(handler_fn(|_item: WorkItem| async move { Ok(vec![]) })),
        CurrentWork::default(),
    )
    .with_policy(ConsumerPolicy {
        reconnect: RetryPolicy::bounded(3, Duration::ZERO),
        ..Default::default()
    });

    let (_tx, rx) = broadcast::channel(1);
    let err = consumer.run(rx).await.unwrap_err();
    assert!(matches!(err, ConnectError::ConnectionLost(_)));
    assert_eq!(broker.subscriptions_opened(), 0);
}

/// Signals when it starts, then waits to be released
struct GatedHandler {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl MessageHandler for GatedHandler {
    async fn handle(&self, _item: WorkItem) -> anyhow::Result<Vec<String>> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(vec!["finished".to_string()])
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_handler() {
    let broker = MemoryBroker::new();
    let api = Arc::new(MemoryControlApi::new());
    broker.enqueue(QUEUE, r#"{"job_id":"j1","work_id":"w1"}"#);
    broker.enqueue(QUEUE, r#"{"job_id":"j2","work_id":"w2"}"#);

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let consumer = consumer(
        &broker,
        &api,
        GatedHandler {
            started: started.clone(),
            release: release.clone(),
        },
    );
    let (tx, rx) = broadcast::channel(1);
    let task = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run(rx).await }
    });

    started.notified().await;
    tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(broker.acked().is_empty());

    release.notify_one();
    task.await.unwrap().unwrap();

    assert_eq!(broker.acked().len(), 1);
    let completes = api.updates_with(JobStatus::Complete);
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].job_id.as_deref(), Some("j1"));
    assert_eq!(broker.pending(QUEUE), 1);
}
