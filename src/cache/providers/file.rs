//! File cache provider
//!
//! One JSON document per key under a directory. Writes go to a temporary file
//! in the same directory and are renamed into place, so readers never observe
//! a partially written value. Handles in different processes pointed at the
//! same directory share state. No eviction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheService;

/// Options accepted by the file cache
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileCacheConfig {
    pub directory: PathBuf,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("tasker-broker-cache"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileCacheService {
    directory: PathBuf,
    closed: Arc<AtomicBool>,
}

impl FileCacheService {
    /// Create the service, creating the directory if needed
    pub async fn from_config(config: &FileCacheConfig) -> CacheResult<Self> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|e| {
                CacheError::ConnectionError(format!(
                    "cannot create cache directory {}: {e}",
                    config.directory.display()
                ))
            })?;
        debug!(directory = %config.directory.display(), "File cache service ready");
        Ok(Self {
            directory: config.directory.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed("file"))
        } else {
            Ok(())
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", encode_key(key)))
    }
}

/// Map an arbitrary key onto a portable file name
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

impl CacheService for FileCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> CacheResult<()> {
        self.ensure_open()?;
        let target = self.path_for(key);
        let temp = self.directory.join(format!(
            ".{}.{}.tmp",
            encode_key(key),
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&temp, value.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(false);
        }
        match tokio::fs::metadata(&self.directory).await {
            Ok(metadata) => Ok(metadata.is_dir() && !metadata.permissions().readonly()),
            Err(e) => Err(CacheError::ConnectionError(format!(
                "cache directory {} unavailable: {e}",
                self.directory.display()
            ))),
        }
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(directory = %self.directory.display(), "File cache handle closed");
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "file"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
