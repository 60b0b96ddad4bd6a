//! Worker implementation for anvilpool.
//!
//! A worker drains its generation's queue one job at a time, handing each job
//! to the [`RetryExecutor`]. Workers never talk to each other; the queue is
//! the only thing they share.

use crate::core::retry::RetryExecutor;
use crate::job::Job;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Receiving end of a generation's queue, shared by all of its workers.
pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<Job<T>>>>;

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The generation was cancelled
    Cancelled,
    /// The queue was closed and empty
    QueueClosed,
}

/// Cumulative job counters, shared by every generation of a pool.
#[derive(Debug, Default)]
pub(crate) struct JobCounters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub attempts: AtomicU64,
    pub succeeded: AtomicU64,
    pub exhausted: AtomicU64,
    pub discarded: AtomicU64,
}

impl JobCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Individual worker that processes jobs
pub struct Worker<T> {
    id: usize,
    generation: u64,
    queue: SharedReceiver<T>,
    cancellation: CancellationToken,
    executor: Arc<RetryExecutor>,
    active_workers: Arc<AtomicUsize>,
}

impl<T> Worker<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: usize,
        generation: u64,
        queue: SharedReceiver<T>,
        cancellation: CancellationToken,
        executor: Arc<RetryExecutor>,
        active_workers: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            generation,
            queue,
            cancellation,
            executor,
            active_workers,
        }
    }

    /// Run the worker loop until the generation is cancelled or its queue
    /// closes.
    ///
    /// Cancellation is only observed between jobs: a job already handed to
    /// the executor runs its attempt loop to a terminal state.
    pub async fn run(self) -> WorkerExit {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Worker {} of generation {} started",
            self.id,
            self.generation
        );

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break WorkerExit::Cancelled,
                job = Self::next_job(&self.queue) => job,
            };

            match next {
                Some(job) => {
                    self.executor.execute(self.id, job).await;
                }
                None => break WorkerExit::QueueClosed,
            }
        };

        self.active_workers.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(
            "Worker {} of generation {} finished: {:?}",
            self.id,
            self.generation,
            exit
        );
        exit
    }

    async fn next_job(queue: &SharedReceiver<T>) -> Option<Job<T>> {
        let mut receiver = queue.lock().await;
        receiver.recv().await
    }
}
