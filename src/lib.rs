//! # anvilpool
//!
//! A bounded, hot-resizable async worker pool for tokio applications.
//!
//! ## Features
//!
//! - **Backpressure**: submission never waits; a full queue is rejected immediately
//! - **Retries**: every attempt runs under a deadline, with exponential backoff between attempts
//! - **Hot resize**: worker count and queue capacity follow a live settings provider
//! - **Graceful shutdown**: in-flight jobs finish their attempt loop before the pool stops
//! - **Observability**: `tracing` events and cumulative counters via [`Pool::stats`]
//!
//! ## Quick Start
//!
//! ```rust
//! use anvilpool::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone)]
//! struct Email {
//!     to: String,
//! }
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobAction<Email> for SendEmail {
//!     async fn process(&self, ctx: JobContext, email: Email) -> PoolResult<()> {
//!         tracing::info!("attempt {} sending to {}", ctx.attempt(), email.to);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> PoolResult<()> {
//!     let settings = PoolSettings::with_workers(4)
//!         .with_queue_capacity(128)
//!         .with_retry(RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30)));
//!     let pool = Pool::new(StaticSettings::new(settings))?;
//!
//!     let email = Email { to: "user@example.com".to_string() };
//!     match pool.submit(Job::with_generated_id(email, SendEmail)).await {
//!         Ok(()) => {}
//!         Err(e) if e.is_backpressure() => tracing::warn!("busy, try again later"),
//!         Err(e) => return Err(e),
//!     }
//!
//!     pool.shutdown().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod job;
pub mod logging;
pub mod settings;

pub mod prelude {
    pub use crate::config::{
        DrainPolicy, DurationExt, LogLevel, LoggingConfig, PoolOptions, PoolSettings, RetryPolicy,
    };
    pub use crate::core::{Pool, PoolStats};
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::job::{Job, JobAction, JobContext, JobId, JobOutcome};
    pub use crate::logging::init_logging;
    pub use crate::settings::{FileSettings, SettingsProvider, SharedSettings, StaticSettings};
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}

pub use crate::config::*;
pub use crate::core::{Pool, PoolStats};
pub use crate::error::{PoolError, PoolResult};
pub use crate::job::{Job, JobAction, JobContext, JobId, JobOutcome};
pub use crate::settings::{FileSettings, SettingsProvider, SharedSettings, StaticSettings};
pub use async_trait::async_trait;
