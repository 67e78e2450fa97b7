//! Shipped configuration files and config-driven construction

mod common;

use std::path::PathBuf;

use serde_json::json;
use tasker_broker::{Broker, BrokerConfig, ConfigManager, MissingHandlerPolicy, TaskArgs};

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_shipped_development_config() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "development")
            .unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(config.queue.backend, "dummy");
    assert_eq!(config.cache.backend, "dummy");
    assert_eq!(config.key_prefix, "task:");
    assert_eq!(config.worker.max_concurrent_handlers, 1);
    assert_eq!(config.worker.missing_handler_policy, MissingHandlerPolicy::Terminalize);
    assert_eq!(config.worker.handler_timeout_ms, None);
    config.validate().unwrap();
}

#[test]
fn test_shipped_production_overrides() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production")
            .unwrap();
    let config = manager.config();

    assert_eq!(config.queue.backend, "redis");
    assert_eq!(config.cache.backend, "redis");
    assert_eq!(config.worker.max_concurrent_handlers, 8);
    assert_eq!(config.worker.handler_timeout_ms, Some(300_000));
    // Values not overridden come from broker.toml
    assert_eq!(config.worker.requeue_delay_ms, 1000);
}

#[test]
fn test_load_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(
        &path,
        r#"
        [queue]
        backend = "memory"
        options = { name = "custom" }

        [cache]
        backend = "file"
        options = { directory = "/var/tmp/tasker" }
        "#,
    )
    .unwrap();

    let config = ConfigManager::load_from_file(&path).unwrap();
    assert_eq!(config.queue.backend, "memory");
    assert_eq!(config.queue.options, Some(json!({"name": "custom"})));
    assert_eq!(config.cache.options, Some(json!({"directory": "/var/tmp/tasker"})));
}

#[tokio::test]
async fn test_broker_from_toml_config() {
    let name = common::unique_name("from-toml");
    let config = ConfigManager::from_toml_str(&format!(
        r#"
        key_prefix = "job:"
        [queue]
        backend = "dummy"
        options = {{ name = "{name}" }}
        [cache]
        backend = "dummy"
        options = {{ name = "{name}" }}
        "#
    ))
    .unwrap();

    let broker = Broker::from_config(&config).await.unwrap();
    let id = broker.create_task("addition", TaskArgs::new()).await.unwrap();
    assert!(!broker.get_task(&id).await.unwrap().is_done());

    let defaults = BrokerConfig::default();
    assert_ne!(config.key_prefix, defaults.key_prefix);
}
