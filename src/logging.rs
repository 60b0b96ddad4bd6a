//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::{PoolError, PoolResult};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber for the pool's log events.
///
/// `RUST_LOG` takes precedence over `config.level` when set. Fails if a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> PoolResult<()> {
    let level = tracing::Level::from(config.level);
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_targets)
        .with_ansi(config.colored)
        .try_init()
        .map_err(|e| PoolError::Logging {
            message: e.to_string(),
        })
}
