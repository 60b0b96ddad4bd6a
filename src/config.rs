//! Configuration types for anvilpool.
//!
//! [`PoolSettings`] is the snapshot a [`SettingsProvider`](crate::settings::SettingsProvider)
//! hands out: it may change while the pool runs and is re-read on every
//! reconciliation cycle. [`PoolOptions`] is fixed when the pool is built.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Desired shape of the pool and the retry policy applied to every job.
///
/// # Examples
///
/// ```rust
/// use anvilpool::config::{PoolSettings, RetryPolicy};
/// use std::time::Duration;
///
/// let settings = PoolSettings::with_workers(4)
///     .with_queue_capacity(64)
///     .with_retry(RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(8)));
///
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Number of workers in a generation
    pub worker_count: usize,

    /// Capacity of a generation's job queue
    pub queue_capacity: usize,

    /// Retry policy, read fresh for every job execution
    pub retry: RetryPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            queue_capacity: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolSettings {
    /// Create settings with a specific number of workers.
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Small, fast settings for tests.
    pub fn testing() -> Self {
        Self {
            worker_count: 1,
            queue_capacity: 10,
            retry: RetryPolicy::new(1, Duration::from_millis(100), Duration::from_millis(100)),
        }
    }

    /// Validate the settings and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker_count == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.queue_capacity == 0 {
            errors.push("Queue capacity must be greater than 0".to_string());
        }

        if let Err(retry_errors) = self.retry.validate() {
            errors.extend(retry_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Retry policy applied by the retry executor.
///
/// The same value drives both the per-attempt deadline and the pause before
/// the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Deadline of the first attempt
    pub initial_timeout: Duration,

    /// Upper bound for any deadline or backoff pause
    pub max_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, initial_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            max_attempts,
            initial_timeout,
            max_timeout,
        }
    }

    /// A single attempt with the given deadline.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, timeout, timeout)
    }

    /// Validate the policy and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_attempts == 0 {
            errors.push("Retry max attempts must be at least 1".to_string());
        }

        if self.initial_timeout.is_zero() {
            errors.push("Retry initial timeout must be greater than 0".to_string());
        }

        if self.max_timeout < self.initial_timeout {
            errors.push(
                "Retry max timeout must be greater than or equal to initial timeout".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Deadline for the attempt following `attempt`, given the deadline
    /// `current` that `attempt` ran under. Also the pause taken before it.
    ///
    /// The exponent is the cumulative attempt count, so the sequence
    /// compounds: `initial, initial, 2x, 8x, 64x, ...` until capped.
    pub fn next_timeout(&self, current: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        current.saturating_mul(factor).min(self.max_timeout)
    }
}

/// What happens to jobs still sitting in a generation's queue when that
/// generation is retired by a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DrainPolicy {
    /// Drop queued-but-unstarted jobs. They are logged and counted, never run.
    #[default]
    Discard,

    /// Move queued jobs into the next generation's queue, dropping whatever
    /// does not fit its capacity.
    Resubmit,
}

/// Options fixed for the lifetime of a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOptions {
    /// How often the reconciliation loop compares live state with the settings
    pub reconcile_interval: Duration,

    /// Fate of queued jobs when a resize retires a generation
    pub drain_policy: DrainPolicy,

    /// How long to wait for workers to exit when retiring a generation
    /// (None = wait until every in-flight job reaches a terminal state)
    pub shutdown_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            drain_policy: DrainPolicy::Discard,
            shutdown_timeout: None,
        }
    }
}

impl PoolOptions {
    /// Set the reconciliation interval.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the drain policy.
    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Validate the options and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.reconcile_interval.is_zero() {
            return Err(vec![
                "Reconcile interval must be greater than 0".to_string(),
            ]);
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `RUST_LOG` when set)
    pub level: LogLevel,

    /// Enable colored output
    pub colored: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colored: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}
