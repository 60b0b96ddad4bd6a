//! A generation: one queue, one cancellation scope and the workers bound to
//! them.
//!
//! Queue capacity and worker count never change during a generation's
//! lifetime. Resizing the pool retires the whole generation and starts a new
//! one.

use crate::config::PoolSettings;
use crate::core::retry::RetryExecutor;
use crate::core::worker::{SharedReceiver, Worker, WorkerExit};
use crate::job::Job;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct Generation<T> {
    number: u64,
    worker_count: usize,
    queue_capacity: usize,
    sender: mpsc::Sender<Job<T>>,
    receiver: SharedReceiver<T>,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<WorkerExit>>,
    active_workers: Arc<AtomicUsize>,
}

impl<T> Generation<T> {
    /// Stop the workers from taking further jobs without waiting for them.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl<T> Generation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create the queue and spawn `settings.worker_count` workers.
    ///
    /// `settings` must already be validated.
    pub fn start(number: u64, settings: &PoolSettings, executor: Arc<RetryExecutor>) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancellation = CancellationToken::new();
        let active_workers = Arc::new(AtomicUsize::new(0));

        let handles = (0..settings.worker_count)
            .map(|worker_id| {
                let worker = Worker::new(
                    worker_id,
                    number,
                    Arc::clone(&receiver),
                    cancellation.clone(),
                    Arc::clone(&executor),
                    Arc::clone(&active_workers),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(
            "🔨 Started generation {} with {} workers and queue capacity {}",
            number,
            settings.worker_count,
            settings.queue_capacity
        );

        Self {
            number,
            worker_count: settings.worker_count,
            queue_capacity: settings.queue_capacity,
            sender,
            receiver,
            cancellation,
            handles,
            active_workers,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn sender(&self) -> mpsc::Sender<Job<T>> {
        self.sender.clone()
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Whether `settings` can be served by this generation.
    pub fn matches(&self, settings: &PoolSettings) -> bool {
        self.worker_count == settings.worker_count && self.queue_capacity == settings.queue_capacity
    }

    /// Cancel the workers, close the queue, then wait for the workers to exit.
    ///
    /// Returns the jobs that were still queued. Workers busy with a job finish
    /// its attempt loop first; with a `shutdown_timeout` they are left
    /// detached once it elapses. Sends on this generation fail from the
    /// moment the queue is closed, even while workers are still busy.
    pub async fn retire(self, shutdown_timeout: Option<Duration>) -> Vec<Job<T>> {
        tracing::info!(
            "🔨 Retiring generation {} ({} workers)",
            self.number,
            self.handles.len()
        );
        self.cancel();
        // idle workers drop the receiver lock as soon as they see the cancel
        self.receiver.lock().await.close();

        let workers = join_all(self.handles);
        let exits = match shutdown_timeout {
            Some(limit) => match tokio::time::timeout(limit, workers).await {
                Ok(exits) => exits,
                Err(_) => {
                    tracing::warn!(
                        "Generation {}: {} workers still busy after {:?}, leaving them detached",
                        self.number,
                        self.active_workers.load(Ordering::Relaxed),
                        limit
                    );
                    Vec::new()
                }
            },
            None => workers.await,
        };

        for (worker_id, exit) in exits.into_iter().enumerate() {
            match exit {
                Ok(cause) => {
                    tracing::debug!(
                        "Generation {} worker {} shut down cleanly ({:?})",
                        self.number,
                        worker_id,
                        cause
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Generation {} worker {} error: {}",
                        self.number,
                        worker_id,
                        e
                    );
                }
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut leftover = Vec::new();
        while let Ok(job) = receiver.try_recv() {
            leftover.push(job);
        }

        tracing::info!(
            "Generation {} retired with {} jobs left in its queue",
            self.number,
            leftover.len()
        );
        leftover
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::core::worker::JobCounters;
    use crate::error::{PoolError, PoolResult};
    use crate::job::JobContext;
    use crate::settings::StaticSettings;
    use tokio::sync::Semaphore;

    fn settings(workers: usize, capacity: usize) -> PoolSettings {
        PoolSettings::with_workers(workers)
            .with_queue_capacity(capacity)
            .with_retry(RetryPolicy::once(Duration::from_secs(60)))
    }

    fn executor(settings: &PoolSettings) -> Arc<RetryExecutor> {
        Arc::new(RetryExecutor::new(
            Arc::new(StaticSettings::new(settings.clone())),
            Arc::new(JobCounters::default()),
        ))
    }

    fn gated_job(
        id: &str,
        started: mpsc::UnboundedSender<String>,
        gate: Arc<Semaphore>,
    ) -> Job<String> {
        Job::new(id, id.to_string(), move |_ctx: JobContext, payload: String| {
            let started = started.clone();
            let gate = Arc::clone(&gate);
            async move {
                let _ = started.send(payload);
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| PoolError::job_failed_with("gate closed", e))?;
                PoolResult::Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_spawns_configured_workers() {
        let settings = settings(3, 4);
        let generation: Generation<String> = Generation::start(7, &settings, executor(&settings));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(generation.number(), 7);
        assert_eq!(generation.worker_count(), 3);
        assert_eq!(generation.queue_capacity(), 4);
        assert_eq!(generation.active_workers(), 3);
        assert!(generation.matches(&settings));
        assert!(!generation.matches(&settings.clone().with_queue_capacity(5)));

        let leftover = generation.retire(None).await;
        assert!(leftover.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_returns_unstarted_jobs() {
        let settings = settings(1, 4);
        let generation = Generation::start(1, &settings, executor(&settings));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));

        let sender = generation.sender();
        sender
            .try_send(gated_job("busy", started_tx.clone(), Arc::clone(&gate)))
            .unwrap();
        assert_eq!(started_rx.recv().await.unwrap(), "busy");

        sender
            .try_send(gated_job("queued-1", started_tx.clone(), Arc::clone(&gate)))
            .unwrap();
        sender
            .try_send(gated_job("queued-2", started_tx.clone(), Arc::clone(&gate)))
            .unwrap();
        assert_eq!(generation.queued(), 2);

        let retiring = tokio::spawn(generation.retire(None));
        tokio::time::sleep(Duration::from_millis(1)).await;

        // closed while "busy" is still running
        let late = gated_job("late", started_tx, Arc::clone(&gate));
        assert!(matches!(
            sender.try_send(late),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
        assert!(!retiring.is_finished());

        gate.add_permits(1);

        let leftover = retiring.await.unwrap();
        let ids: Vec<_> = leftover.iter().map(|job| job.id.as_str()).collect();
        assert_eq!(ids, vec!["queued-1", "queued-2"]);
        assert!(started_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_timeout_detaches_busy_workers() {
        let settings = settings(1, 1);
        let generation = Generation::start(1, &settings, executor(&settings));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));

        generation
            .sender()
            .try_send(gated_job("stuck", started_tx, Arc::clone(&gate)))
            .unwrap();
        started_rx.recv().await.unwrap();

        let leftover = generation.retire(Some(Duration::from_secs(2))).await;
        assert!(leftover.is_empty());
    }
}
