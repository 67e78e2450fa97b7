//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources, lowest precedence first:
//!
//! 1. built-in defaults (`BrokerConfig::default()`, dummy backends)
//! 2. `<config_dir>/broker.toml`
//! 3. `<config_dir>/broker.<environment>.toml`
//! 4. environment variables prefixed `TASKER_BROKER`, nested with `__`
//!    (e.g. `TASKER_BROKER__QUEUE__BACKEND=redis`)

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::debug;

use super::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TASKER_BROKER";

/// Loaded configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: BrokerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> BrokerResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> BrokerResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for tests that must not depend on process environment.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> BrokerResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading broker configuration"
        );

        let settings = Config::builder()
            .add_source(File::from(config_directory.join("broker.toml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("broker.{environment}.toml")))
                    .required(false),
            )
            .add_source(Self::environment_source())
            .build()?;

        let config = Self::finish(settings)?;
        debug!(
            queue_backend = %config.queue.backend,
            cache_backend = %config.cache.backend,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load a single TOML file, with environment overrides on top
    pub fn load_from_file(path: impl AsRef<Path>) -> BrokerResult<BrokerConfig> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BrokerError::configuration(
                "config",
                format!("configuration file not found: {}", path.display()),
            ));
        }

        let settings = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Self::environment_source())
            .build()?;

        Self::finish(settings)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(toml: &str) -> BrokerResult<BrokerConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Self::finish(settings)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn finish(settings: Config) -> BrokerResult<BrokerConfig> {
        let config: BrokerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("TASKER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingHandlerPolicy;

    #[test]
    fn test_toml_sections() {
        let config = ConfigManager::from_toml_str(
            r#"
            key_prefix = "jobs:"

            [queue]
            backend = "dummy"
            options = { name = "orders", visibility_timeout_ms = 500 }

            [cache]
            backend = "file"
            options = { directory = "/tmp/tasker" }

            [worker]
            max_concurrent_handlers = 4
            missing_handler_policy = "requeue"
            "#,
        )
        .unwrap();

        assert_eq!(config.key_prefix, "jobs:");
        assert_eq!(config.queue.backend, "dummy");
        let options = config.queue.options.unwrap();
        assert_eq!(options["name"], "orders");
        assert_eq!(options["visibility_timeout_ms"], 500);
        assert_eq!(config.cache.backend, "file");
        assert_eq!(config.worker.max_concurrent_handlers, 4);
        assert_eq!(config.worker.missing_handler_policy, MissingHandlerPolicy::Requeue);
        assert_eq!(config.worker.shutdown_timeout_ms, 30_000);
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = ConfigManager::from_toml_str("").unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let err = ConfigManager::from_toml_str("[worker]\nmax_concurrent_handlers = 0\n").unwrap_err();
        assert!(err.is_configuration());

        let err = ConfigManager::from_toml_str("[worker]\nmissing_handler_policy = \"shrug\"\n")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = ConfigManager::load_from_file("/definitely/not/here/broker.toml").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_directory_layering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broker.toml"),
            "[queue]\nbackend = \"dummy\"\n[worker]\nmax_concurrent_handlers = 2\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("broker.test.toml"),
            "[worker]\nmax_concurrent_handlers = 3\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().worker.max_concurrent_handlers, 3);
        assert_eq!(manager.config().queue.backend, "dummy");
    }
}
