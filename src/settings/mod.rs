//! Settings providers.
//!
//! A pool never owns its settings. It asks a [`SettingsProvider`] for a fresh
//! snapshot on every reconciliation cycle and for every job execution, so the
//! provider may change its answer at any time:
//! - **Static**: a fixed snapshot
//! - **Shared**: an in-process value the application updates directly
//! - **File**: a JSON settings file that can be reloaded from disk
//!
//! # Examples
//!
//! ```rust
//! use anvilpool::prelude::*;
//!
//! let shared = SharedSettings::new(PoolSettings::with_workers(2));
//! shared.update(|settings| settings.worker_count = 4);
//! assert_eq!(shared.snapshot().worker_count, 4);
//! ```

use crate::config::PoolSettings;
use std::sync::{Arc, RwLock};

pub mod file;
pub use file::FileSettings;

/// Source of the pool's desired settings.
///
/// Implementations must be cheap to call and safe to call concurrently from
/// the reconciliation loop, submitters and workers. The returned value is a
/// copy; callers never hold a lock on the provider.
pub trait SettingsProvider: Send + Sync {
    /// Current settings.
    fn snapshot(&self) -> PoolSettings;
}

impl<P: SettingsProvider + ?Sized> SettingsProvider for Arc<P> {
    fn snapshot(&self) -> PoolSettings {
        (**self).snapshot()
    }
}

/// A provider that always returns the same settings.
#[derive(Debug, Clone)]
pub struct StaticSettings(PoolSettings);

impl StaticSettings {
    /// Wrap a fixed snapshot.
    pub fn new(settings: PoolSettings) -> Self {
        Self(settings)
    }
}

impl SettingsProvider for StaticSettings {
    fn snapshot(&self) -> PoolSettings {
        self.0.clone()
    }
}

/// An updatable, shareable provider. Clones observe the same value.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<PoolSettings>>,
}

impl SharedSettings {
    /// Create a provider with initial settings.
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace the settings.
    pub fn set(&self, settings: PoolSettings) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = settings;
    }

    /// Modify the settings in place.
    pub fn update(&self, f: impl FnOnce(&mut PoolSettings)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> PoolSettings {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn test_static_settings() {
        let provider = StaticSettings::new(PoolSettings::testing());
        assert_eq!(provider.snapshot(), PoolSettings::testing());
    }

    #[test]
    fn test_shared_settings_clones_see_updates() {
        let provider = SharedSettings::new(PoolSettings::testing());
        let observer = provider.clone();

        provider.update(|settings| {
            settings.worker_count = 8;
            settings.retry = RetryPolicy::once(Duration::from_secs(2));
        });
        assert_eq!(observer.snapshot().worker_count, 8);
        assert_eq!(observer.snapshot().retry.max_attempts, 1);

        provider.set(PoolSettings::with_workers(3));
        assert_eq!(observer.snapshot().worker_count, 3);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let provider = SharedSettings::new(PoolSettings::testing());
        let mut snapshot = provider.snapshot();
        snapshot.worker_count = 99;
        assert_eq!(provider.snapshot().worker_count, 1);
    }

    #[test]
    fn test_arc_provider() {
        let provider: Arc<dyn SettingsProvider> =
            Arc::new(StaticSettings::new(PoolSettings::with_workers(5)));
        assert_eq!(provider.snapshot().worker_count, 5);
    }
}
