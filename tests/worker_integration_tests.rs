//! End-to-end broker + worker behaviour on the in-memory backends

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use serde_json::json;
use tasker_broker::{
    BrokerError, HandlerError, MissingHandlerPolicy, TaskArgs, TaskStatus, WorkerSettings,
};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_addition_round_trip() {
    let name = unique_name("round-trip");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 1).with("y", 1))
        .await
        .unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Done);
    assert!(task.is_done());
    assert_eq!(task.result(), Some(&json!(2)));
    assert_eq!(task.name(), "addition");
    assert!(task.completed_at().is_some());

    broker.close().await.unwrap();
    worker.close().await.unwrap();
    assert_eq!(worker.stats().succeeded, 1);
}

#[tokio::test]
async fn test_missing_handler_writes_task_not_registered() {
    let name = unique_name("not-registered");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker.create_task("oops", TaskArgs::new()).await.unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    let message = "can not processed oops, no handler...";
    assert_eq!(
        task.result(),
        Some(&json!({"exception": {"class": "TaskNotRegistered", "args": [message], "str": message}}))
    );
    assert!(task.exception().unwrap().is_task_not_registered());

    // Terminal and acked: nothing left on the queue
    assert_eq!(broker.queue_stats().await.unwrap().message_count, 0);

    worker.close().await.unwrap();
    assert_eq!(worker.stats().not_registered, 1);
}

#[tokio::test]
async fn test_handler_error_is_data_and_worker_keeps_going() {
    let name = unique_name("handler-error");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker
        .register_handler(failing_handler("reject", "ValueError", "bad input"))
        .unwrap();
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let failed = broker.create_task("reject", TaskArgs::new()).await.unwrap();
    let succeeded = broker
        .create_task("addition", TaskArgs::new().with("x", 20).with("y", 22))
        .await
        .unwrap();

    let task = broker.wait_for_task(&failed, WAIT, None).await.unwrap();
    assert_eq!(
        task.result(),
        Some(&json!({"exception": {"class": "ValueError", "args": ["bad input"], "str": "bad input"}}))
    );

    let task = broker.wait_for_task(&succeeded, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(42)));

    worker.close().await.unwrap();
    let stats = worker.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_done_result_is_stable() {
    let name = unique_name("stable");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 2).with("y", 3))
        .await
        .unwrap();
    let first = broker.wait_for_task(&id, WAIT, None).await.unwrap();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let again = broker.get_task(&id).await.unwrap();
        assert!(again.is_done());
        assert_eq!(again.result(), first.result());
        assert_eq!(again.completed_at(), first.completed_at());
    }

    worker.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_id_is_task_not_found() {
    let name = unique_name("unknown");
    let broker = broker_for(&name).await;

    let err = broker
        .get_task(&tasker_broker::TaskId::from("no-such-task"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_redelivery_after_consumer_crash() {
    let name = unique_name("redelivery");
    let calls = Arc::new(AtomicUsize::new(0));

    let mut first = worker_for(&name, 200, WorkerSettings::default()).await;
    first
        .register_handler(sleeping_handler("work", Duration::ZERO, Arc::clone(&calls)))
        .unwrap();
    first
        .queue()
        .as_in_memory()
        .expect("dummy queue")
        .inject_receive_failures(1);
    first.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker.create_task("work", TaskArgs::new()).await.unwrap();

    // The first worker claims the message, fails mid-receipt, and stops
    let err = tokio::time::timeout(WAIT, first.join())
        .await
        .expect("first worker should stop")
        .unwrap_err();
    assert!(matches!(err, BrokerError::Messaging(_)));
    assert_eq!(broker.get_task(&id).await.unwrap().status(), TaskStatus::Pending);

    let mut second = worker_for(&name, 200, WorkerSettings::default()).await;
    second
        .register_handler(sleeping_handler("work", Duration::ZERO, Arc::clone(&calls)))
        .unwrap();
    second.start().unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    second.close().await.unwrap();
    first.close().await.unwrap();
    assert_eq!(first.stats().processed, 0);
    assert_eq!(second.stats().processed, 1);
}

#[tokio::test]
async fn test_same_worker_restarts_after_receive_failure() {
    let name = unique_name("restart");
    let mut worker = worker_for(&name, 200, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker
        .queue()
        .as_in_memory()
        .expect("dummy queue")
        .inject_receive_failures(1);
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 2).with("y", 3))
        .await
        .unwrap();

    let err = tokio::time::timeout(WAIT, worker.join())
        .await
        .expect("loop should stop on the receive failure")
        .unwrap_err();
    assert!(matches!(err, BrokerError::Messaging(_)));
    assert!(!worker.is_started());

    // Only this worker consumes the queue; it picks the message up again
    worker.start().unwrap();
    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(5)));

    worker.close().await.unwrap();
    assert_eq!(worker.stats().succeeded, 1);
}

#[tokio::test]
async fn test_transport_errors_back_off_and_keep_consuming() {
    let name = unique_name("transport-retry");
    let settings = WorkerSettings {
        receive_backoff_ms: 5,
        max_receive_backoff_ms: 20,
        ..WorkerSettings::default()
    };
    let mut worker = worker_for(&name, 30_000, settings).await;
    worker.register_handler(addition_handler()).unwrap();
    worker
        .queue()
        .as_in_memory()
        .expect("dummy queue")
        .inject_transport_errors(3);
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 1).with("y", 1))
        .await
        .unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(2)));
    assert!(worker.is_started());

    worker.close().await.unwrap();
    assert_eq!(worker.stats().succeeded, 1);
}

#[tokio::test]
async fn test_undecodable_message_is_discarded_and_worker_continues() {
    let name = unique_name("undecodable");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    broker
        .queue()
        .as_in_memory()
        .expect("dummy queue")
        .publish_raw(b"definitely not a task".to_vec())
        .unwrap();
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 20).with("y", 22))
        .await
        .unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(42)));
    assert!(worker.is_started());

    // The worker acks the task after writing its outcome
    let deadline = Instant::now() + WAIT;
    while broker.queue_stats().await.unwrap().message_count > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.queue_stats().await.unwrap().message_count, 0);

    worker.close().await.unwrap();
    let stats = worker.stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_two_workers_share_the_load() {
    let name = unique_name("load-balance");
    let unit = Duration::from_millis(400);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..2 {
        let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
        worker
            .register_handler(sleeping_handler("sleep", unit, Arc::clone(&calls)))
            .unwrap();
        worker.start().unwrap();
        workers.push(worker);
    }

    let broker = broker_for(&name).await;
    let started = Instant::now();
    let a = broker.create_task("sleep", TaskArgs::new()).await.unwrap();
    let b = broker.create_task("sleep", TaskArgs::new()).await.unwrap();

    broker.wait_for_task(&a, WAIT, Some(Duration::from_millis(10))).await.unwrap();
    broker.wait_for_task(&b, WAIT, Some(Duration::from_millis(10))).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < unit * 3 / 2,
        "two one-unit tasks on two workers took {elapsed:?}"
    );
    for worker in &workers {
        worker.close().await.unwrap();
        assert_eq!(worker.stats().processed, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_identical_creates_get_fresh_ids() {
    let name = unique_name("fresh-ids");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker.register_handler(addition_handler()).unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let args = TaskArgs::new().with("x", 1).with("y", 1);
    let first = broker.create_task("addition", args.clone()).await.unwrap();
    let second = broker.create_task("addition", args).await.unwrap();
    assert_ne!(first, second);

    for id in [&first, &second] {
        let task = broker.wait_for_task(id, WAIT, None).await.unwrap();
        assert_eq!(task.result(), Some(&json!(2)));
    }

    worker.close().await.unwrap();
    assert_eq!(worker.stats().processed, 2);
}

#[tokio::test]
async fn test_requeue_policy_hands_task_to_capable_worker() {
    let name = unique_name("requeue");
    let requeue = WorkerSettings {
        missing_handler_policy: MissingHandlerPolicy::Requeue,
        requeue_delay_ms: 20,
        ..WorkerSettings::default()
    };

    let bystander = worker_for(&name, 30_000, requeue).await;
    bystander.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker
        .create_task("addition", TaskArgs::new().with("x", 4).with("y", 5))
        .await
        .unwrap();

    let mut capable = worker_for(&name, 30_000, WorkerSettings::default()).await;
    capable.register_handler(addition_handler()).unwrap();
    capable.start().unwrap();

    let task = broker.wait_for_task(&id, WAIT, None).await.unwrap();
    assert_eq!(task.result(), Some(&json!(9)));

    bystander.close().await.unwrap();
    capable.close().await.unwrap();
    assert_eq!(bystander.stats().processed, 0);
    assert_eq!(capable.stats().succeeded, 1);
}

#[tokio::test]
async fn test_close_waits_for_in_flight_handler() {
    let name = unique_name("drain");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker
        .register_handler(sleeping_handler("sleep", Duration::from_millis(150), Arc::clone(&calls)))
        .unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let id = broker.create_task("sleep", TaskArgs::new()).await.unwrap();
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    worker.close().await.unwrap();
    assert!(broker.get_task(&id).await.unwrap().is_done());
}

#[tokio::test]
async fn test_concurrent_handlers_within_one_worker() {
    let name = unique_name("concurrency");
    let unit = Duration::from_millis(300);
    let calls = Arc::new(AtomicUsize::new(0));
    let settings = WorkerSettings {
        max_concurrent_handlers: 3,
        ..WorkerSettings::default()
    };
    let mut worker = worker_for(&name, 30_000, settings).await;
    worker
        .register_handler(sleeping_handler("sleep", unit, Arc::clone(&calls)))
        .unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let started = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(broker.create_task("sleep", TaskArgs::new()).await.unwrap());
    }
    for id in &ids {
        broker.wait_for_task(id, WAIT, Some(Duration::from_millis(10))).await.unwrap();
    }

    assert!(started.elapsed() < unit * 2);
    worker.close().await.unwrap();
    assert_eq!(worker.stats().processed, 3);
}

#[tokio::test]
async fn test_blocking_and_closure_registration() {
    let name = unique_name("closures");
    let mut worker = worker_for(&name, 30_000, WorkerSettings::default()).await;
    worker
        .register_blocking_fn("checksum", |args: TaskArgs| {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HandlerError::invalid_arguments("text is required"))?;
            Ok(json!(text.bytes().map(u64::from).sum::<u64>()))
        })
        .unwrap();
    worker
        .register_fn("echo", |args: TaskArgs| async move {
            Ok::<_, HandlerError>(args.into_value())
        })
        .unwrap();
    worker.start().unwrap();

    let broker = broker_for(&name).await;
    let sum = broker
        .create_task("checksum", TaskArgs::new().with("text", "ab"))
        .await
        .unwrap();
    let echo = broker
        .create_task("echo", TaskArgs::new().with("k", "v"))
        .await
        .unwrap();
    let invalid = broker.create_task("checksum", TaskArgs::new()).await.unwrap();

    assert_eq!(
        broker.wait_for_task(&sum, WAIT, None).await.unwrap().result(),
        Some(&json!(195))
    );
    assert_eq!(
        broker.wait_for_task(&echo, WAIT, None).await.unwrap().result(),
        Some(&json!({"k": "v"}))
    );
    let task = broker.wait_for_task(&invalid, WAIT, None).await.unwrap();
    assert_eq!(task.exception().unwrap().class, "InvalidArguments");

    worker.close().await.unwrap();
}
