//! The worker pool.
//!
//! The [`Pool`] owns the current generation (queue, cancellation scope and
//! workers), accepts or rejects submissions, and keeps the generation in line
//! with whatever the [`SettingsProvider`] currently publishes.

use crate::config::{DrainPolicy, PoolOptions};
use crate::core::generation::Generation;
use crate::error::{PoolError, PoolResult};
use crate::job::Job;
use crate::settings::SettingsProvider;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

mod generation;
pub mod retry;
pub mod worker;

pub use retry::RetryExecutor;
pub use worker::{Worker, WorkerExit};

use worker::JobCounters;

/// Snapshot of the pool's state and cumulative job counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of the live generation (None once stopped)
    pub generation: Option<u64>,
    /// Workers in the live generation
    pub worker_count: usize,
    /// Capacity of the live generation's queue
    pub queue_capacity: usize,
    /// Jobs waiting in the live queue
    pub queued: usize,
    /// Workers whose loop is currently running
    pub active_workers: usize,
    /// Submissions accepted
    pub accepted: u64,
    /// Submissions rejected because the queue was full
    pub rejected: u64,
    /// Attempts started, across all jobs
    pub attempts: u64,
    /// Jobs that succeeded
    pub succeeded: u64,
    /// Jobs that ran out of attempts
    pub exhausted: u64,
    /// Queued jobs dropped by a resize or shutdown
    pub discarded: u64,
}

struct PoolState<T> {
    generation: Option<Generation<T>>,
    generations_started: u64,
}

struct PoolInner<T> {
    settings: Arc<dyn SettingsProvider>,
    options: PoolOptions,
    executor: Arc<RetryExecutor>,
    counters: Arc<JobCounters>,
    state: Mutex<PoolState<T>>,
    stopped: AtomicBool,
    lifetime: CancellationToken,
    reconciler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A resizable pool of workers draining a bounded job queue.
///
/// Cloning a pool is cheap; clones share the same generation and counters.
///
/// # Examples
///
/// ```rust
/// use anvilpool::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> PoolResult<()> {
///     let settings = SharedSettings::new(PoolSettings::with_workers(2));
///     let pool = Pool::new(settings.clone())?;
///
///     let job = Job::new("greet", "world".to_string(), |_ctx: JobContext, name: String| async move {
///         println!("hello {name}");
///         Ok::<(), PoolError>(())
///     });
///     pool.submit(job).await?;
///
///     // picked up on the next reconciliation cycle or submission
///     settings.update(|s| s.worker_count = 4);
///
///     pool.shutdown().await
/// }
/// ```
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Pool<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start a pool with default options.
    pub fn new<S>(settings: S) -> PoolResult<Self>
    where
        S: SettingsProvider + 'static,
    {
        Self::with_options(settings, PoolOptions::default())
    }

    /// Start a pool: validate the current snapshot, spawn generation 1 and
    /// the reconciliation loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_options<S>(settings: S, options: PoolOptions) -> PoolResult<Self>
    where
        S: SettingsProvider + 'static,
    {
        options
            .validate()
            .map_err(|errors| PoolError::InvalidSettings { errors })?;

        let settings: Arc<dyn SettingsProvider> = Arc::new(settings);
        let snapshot = settings.snapshot();
        snapshot
            .validate()
            .map_err(|errors| PoolError::InvalidSettings { errors })?;

        tokio::runtime::Handle::try_current()
            .map_err(|e| PoolError::config(format!("Pool requires a tokio runtime: {e}")))?;

        let counters = Arc::new(JobCounters::default());
        let executor = Arc::new(RetryExecutor::new(
            Arc::clone(&settings),
            Arc::clone(&counters),
        ));
        let generation = Generation::start(1, &snapshot, Arc::clone(&executor));

        let pool = Self {
            inner: Arc::new(PoolInner {
                settings,
                options,
                executor,
                counters,
                state: Mutex::new(PoolState {
                    generation: Some(generation),
                    generations_started: 1,
                }),
                stopped: AtomicBool::new(false),
                lifetime: CancellationToken::new(),
                reconciler: std::sync::Mutex::new(None),
            }),
        };
        pool.start_reconciler();

        tracing::info!(
            "🔨 Worker pool started with {} workers, reconciling every {:?}",
            snapshot.worker_count,
            pool.inner.options.reconcile_interval
        );
        Ok(pool)
    }

    /// Spawn the reconciliation loop unless one is already live.
    ///
    /// Returns whether a loop was spawned.
    pub(crate) fn start_reconciler(&self) -> bool {
        let mut slot = self
            .inner
            .reconciler
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }

        let inner = Arc::downgrade(&self.inner);
        let lifetime = self.inner.lifetime.clone();
        let every = self.inner.options.reconcile_interval;
        *slot = Some(tokio::spawn(reconcile_loop(inner, lifetime, every)));
        true
    }

    /// Offer a job to the current generation.
    ///
    /// Runs a reconciliation check first, so a submission may itself trigger
    /// a resize. Never waits for queue space: a full queue is reported as
    /// [`PoolError::QueueFull`] and the caller should retry later.
    ///
    /// A resize holds the pool lock until the old generation's busy workers
    /// finish. A job action that awaits `submit` on its own pool can
    /// therefore deadlock a resize; hand such follow-up jobs to a separate
    /// task instead of awaiting them inside the action.
    pub async fn submit(&self, job: Job<T>) -> PoolResult<()> {
        self.inner.reconcile().await;

        let (sender, capacity) = {
            let state = self.inner.state.lock().await;
            match state.generation.as_ref() {
                Some(generation) if !self.inner.is_stopped() => {
                    (generation.sender(), generation.queue_capacity())
                }
                _ => return Err(PoolError::PoolStopped),
            }
        };

        let job_id = job.id.clone();
        match sender.try_send(job) {
            Ok(()) => {
                JobCounters::bump(&self.inner.counters.accepted);
                tracing::debug!("Job {} accepted", job_id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                JobCounters::bump(&self.inner.counters.rejected);
                tracing::debug!("Job {} rejected: queue full ({})", job_id, capacity);
                Err(PoolError::QueueFull { capacity })
            }
            Err(TrySendError::Closed(_)) if self.inner.is_stopped() => {
                Err(PoolError::PoolStopped)
            }
            Err(TrySendError::Closed(_)) => {
                // the generation was retired between taking its sender and sending
                JobCounters::bump(&self.inner.counters.rejected);
                tracing::debug!("Job {} rejected: queue retired during resize", job_id);
                Err(PoolError::QueueFull { capacity })
            }
        }
    }

    /// Compare the live generation with the current settings and swap it if
    /// they drifted. Returns whether a new generation was started.
    pub async fn reconcile_now(&self) -> bool {
        self.inner.reconcile().await
    }

    /// Stop the pool.
    ///
    /// Cancels the live generation, waits for its workers to finish their
    /// in-flight jobs, then closes the queue and discards what is left in it.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> PoolResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            if self.inner.stopped.swap(true, Ordering::AcqRel) {
                tracing::debug!("Worker pool already stopped");
                return Ok(());
            }

            tracing::info!("🔨 Shutting down worker pool");
            self.inner.lifetime.cancel();

            if let Some(generation) = state.generation.take() {
                let leftover = generation.retire(self.inner.options.shutdown_timeout).await;
                for job in leftover {
                    self.inner.discard(&job, "pool shut down");
                }
            }
        }

        let reconciler = self
            .inner
            .reconciler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = reconciler {
            if let Err(e) = handle.await {
                tracing::error!("Reconciliation loop error: {}", e);
            }
        }

        tracing::info!("🔨 Worker pool stopped");
        Ok(())
    }

    /// Current state and counters.
    pub async fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().await;
        let counters = &self.inner.counters;

        let mut stats = PoolStats {
            accepted: JobCounters::read(&counters.accepted),
            rejected: JobCounters::read(&counters.rejected),
            attempts: JobCounters::read(&counters.attempts),
            succeeded: JobCounters::read(&counters.succeeded),
            exhausted: JobCounters::read(&counters.exhausted),
            discarded: JobCounters::read(&counters.discarded),
            ..Default::default()
        };

        if let Some(generation) = state.generation.as_ref() {
            stats.generation = Some(generation.number());
            stats.worker_count = generation.worker_count();
            stats.queue_capacity = generation.queue_capacity();
            stats.queued = generation.queued();
            stats.active_workers = generation.active_workers();
        }

        stats
    }

    /// Number of the live generation, None once the pool is stopped.
    pub async fn generation(&self) -> Option<u64> {
        let state = self.inner.state.lock().await;
        state.generation.as_ref().map(|generation| generation.number())
    }

    /// Whether the pool still accepts jobs.
    pub fn is_running(&self) -> bool {
        !self.inner.is_stopped()
    }
}

impl<T> PoolInner<T> {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn discard(&self, job: &Job<T>, reason: &str) {
        JobCounters::bump(&self.counters.discarded);
        tracing::warn!("Discarding queued job {} ({})", job.id, reason);
    }
}

impl<T> PoolInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn reconcile(&self) -> bool {
        let mut state = self.state.lock().await;
        if self.is_stopped() {
            return false;
        }

        let desired = self.settings.snapshot();
        let (number, workers, capacity) = match state.generation.as_ref() {
            Some(live) if live.matches(&desired) => return false,
            Some(live) => (live.number(), live.worker_count(), live.queue_capacity()),
            None => return false,
        };

        if let Err(errors) = desired.validate() {
            tracing::warn!(
                "Ignoring invalid pool settings, keeping generation {}: {}",
                number,
                errors.join("; ")
            );
            return false;
        }

        tracing::info!(
            "🔨 Resizing worker pool from {} to {} workers (queue capacity {} -> {})",
            workers,
            desired.worker_count,
            capacity,
            desired.queue_capacity
        );

        let leftover = match state.generation.take() {
            Some(old) => old.retire(self.options.shutdown_timeout).await,
            None => Vec::new(),
        };

        state.generations_started += 1;
        let next = Generation::start(
            state.generations_started,
            &desired,
            Arc::clone(&self.executor),
        );
        self.drain_into(leftover, &next);
        state.generation = Some(next);
        true
    }

    fn drain_into(&self, leftover: Vec<Job<T>>, next: &Generation<T>) {
        if leftover.is_empty() {
            return;
        }

        match self.options.drain_policy {
            DrainPolicy::Discard => {
                for job in leftover {
                    self.discard(&job, "pool resized");
                }
            }
            DrainPolicy::Resubmit => {
                let sender = next.sender();
                for job in leftover {
                    match sender.try_send(job) {
                        Ok(()) => {}
                        Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                            self.discard(&job, "no room in resized queue");
                        }
                    }
                }
                tracing::info!(
                    "Moved {} queued jobs into generation {}",
                    next.queued(),
                    next.number()
                );
            }
        }
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        if self.is_stopped() {
            return;
        }

        // Can't retire asynchronously here; stop the workers and let them go.
        self.lifetime.cancel();
        if let Some(generation) = self.state.get_mut().generation.as_ref() {
            generation.cancel();
        }
        tracing::warn!(
            "🔨 Worker pool dropped without shutdown. Call shutdown() explicitly to wait for in-flight jobs."
        );
    }
}

async fn reconcile_loop<T>(
    inner: Weak<PoolInner<T>>,
    lifetime: CancellationToken,
    every: std::time::Duration,
) where
    T: Clone + Send + Sync + 'static,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.reconcile().await;
            }
        }
    }

    tracing::debug!("Reconciliation loop stopped");
}
