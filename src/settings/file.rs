//! JSON settings file provider.
//!
//! The file layout:
//!
//! ```json
//! {
//!   "worker": {
//!     "poolSize": 4,
//!     "queueSize": 100,
//!     "retry": { "maxAttempts": 3, "initialTimeout": 1, "maxTimeout": 30 }
//!   }
//! }
//! ```
//!
//! Timeouts are whole seconds. Other top-level sections are ignored, so the
//! pool can share a file with the rest of an application's configuration.

use super::SettingsProvider;
use crate::config::{PoolSettings, RetryPolicy};
use crate::error::{PoolError, PoolResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct SettingsDocument {
    worker: WorkerSection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerSection {
    pool_size: usize,
    queue_size: usize,
    retry: RetrySection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrySection {
    max_attempts: u32,
    initial_timeout: u64,
    max_timeout: u64,
}

impl From<WorkerSection> for PoolSettings {
    fn from(section: WorkerSection) -> Self {
        Self {
            worker_count: section.pool_size,
            queue_capacity: section.queue_size,
            retry: RetryPolicy {
                max_attempts: section.retry.max_attempts,
                initial_timeout: Duration::from_secs(section.retry.initial_timeout),
                max_timeout: Duration::from_secs(section.retry.max_timeout),
            },
        }
    }
}

/// Settings backed by a JSON file.
///
/// Reloading parses into a temporary and swaps it in only when it validates,
/// so a bad edit never reaches the pool.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    current: RwLock<PoolSettings>,
}

impl FileSettings {
    /// Read and validate the settings file.
    pub fn load(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref().to_path_buf();
        let settings = Self::read(&path)?;

        tracing::info!("Loaded pool settings from {}", path.display());
        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    /// Parse settings from a JSON document.
    pub fn parse(contents: &str) -> PoolResult<PoolSettings> {
        let document: SettingsDocument = serde_json::from_str(contents)?;
        let settings = PoolSettings::from(document.worker);
        settings
            .validate()
            .map_err(|errors| PoolError::InvalidSettings { errors })?;
        Ok(settings)
    }

    fn read(path: &Path) -> PoolResult<PoolSettings> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Re-read the file. Returns whether the settings changed.
    ///
    /// On error the previous settings stay in force.
    pub fn reload(&self) -> PoolResult<bool> {
        let fresh = Self::read(&self.path)?;

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if *current == fresh {
            return Ok(false);
        }

        tracing::info!(
            "Pool settings changed: workers {} -> {}, queue {} -> {}",
            current.worker_count,
            fresh.worker_count,
            current.queue_capacity,
            fresh.queue_capacity
        );
        *current = fresh;
        Ok(true)
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file every `every` until `shutdown` is cancelled.
    pub fn spawn_reload_loop(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.reload() {
                            tracing::error!(
                                "Failed to reload settings from {}: {}",
                                self.path.display(),
                                e
                            );
                        }
                    }
                }
            }

            tracing::debug!("Settings reload loop for {} stopped", self.path.display());
        })
    }
}

impl SettingsProvider for FileSettings {
    fn snapshot(&self) -> PoolSettings {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
