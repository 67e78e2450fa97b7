//! Shared fixtures for integration tests
//!
//! Every test builds its backends under a unique `name`, so tests sharing the
//! process-wide in-memory channels never see each other's messages.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tasker_broker::{
    Broker, BrokerConfig, FnHandler, HandlerError, TaskArgs, TaskHandler, Worker, WorkerSettings,
};

/// Unique backend name for one test
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Config whose in-memory queue and cache are private to `name`
pub fn config_for(name: &str, visibility_timeout_ms: u64) -> BrokerConfig {
    BrokerConfig::new(
        "dummy",
        Some(json!({"name": name, "visibility_timeout_ms": visibility_timeout_ms})),
        "dummy",
        Some(json!({"name": name})),
    )
}

pub async fn broker_for(name: &str) -> Broker {
    Broker::from_config(&config_for(name, 30_000))
        .await
        .expect("broker should build on in-memory backends")
}

pub async fn worker_for(name: &str, visibility_timeout_ms: u64, settings: WorkerSettings) -> Worker {
    Worker::from_config(&config_for(name, visibility_timeout_ms).with_worker_settings(settings))
        .await
        .expect("worker should build on in-memory backends")
}

#[derive(Debug, Deserialize)]
struct AdditionArgs {
    x: i64,
    y: i64,
}

/// `addition(x, y) -> x + y`
pub fn addition_handler() -> Arc<dyn TaskHandler> {
    Arc::new(FnHandler::new("addition", |args: TaskArgs| async move {
        let input: AdditionArgs = args.parse()?;
        Ok::<Value, HandlerError>(json!(input.x + input.y))
    }))
}

/// Sleeps for `delay`, counts its invocations, and returns the count it observed
pub fn sleeping_handler(
    name: &str,
    delay: Duration,
    calls: Arc<AtomicUsize>,
) -> Arc<dyn TaskHandler> {
    Arc::new(FnHandler::new(name, move |_args: TaskArgs| {
        let calls = Arc::clone(&calls);
        async move {
            let seen = calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(delay).await;
            Ok::<Value, HandlerError>(json!(seen))
        }
    }))
}

/// Always fails with the given class and message
pub fn failing_handler(name: &str, class: &'static str, message: &'static str) -> Arc<dyn TaskHandler> {
    Arc::new(FnHandler::new(name, move |_args: TaskArgs| async move {
        Err::<Value, HandlerError>(HandlerError::new(class, message))
    }))
}
