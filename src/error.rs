//! Error types for anvilpool operations.

use thiserror::Error;

/// Result type used throughout anvilpool.
pub type PoolResult<T> = Result<T, PoolError>;

/// Main error type for anvilpool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Settings failed validation (non-positive counts, malformed retry policy)
    #[error("Invalid pool settings: {}", errors.join("; "))]
    InvalidSettings {
        /// Every validation failure found
        errors: Vec<String>,
    },

    /// The current generation's queue is at capacity
    #[error("Job queue is full (capacity: {capacity})")]
    QueueFull {
        /// Capacity of the queue that rejected the job
        capacity: usize,
    },

    /// The pool has been shut down and accepts no more work
    #[error("Pool is stopped")]
    PoolStopped,

    /// A job action reported a failure
    #[error("Job failed: {message}")]
    JobFailed {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A single attempt ran past its deadline
    #[error("Attempt timed out after {timeout_ms}ms")]
    AttemptTimedOut {
        /// Deadline of the attempt in milliseconds
        timeout_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// Logging could not be initialised
    #[error("Logging error: {message}")]
    Logging {
        /// Error message
        message: String,
    },

    /// I/O error while reading a settings file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PoolError {
    /// Create a job failure without an underlying cause.
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self::JobFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a job failure wrapping the error that caused it.
    pub fn job_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::JobFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether the caller should retry the submission later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}
