//! Job definition and execution traits.

use crate::error::PoolResult;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifier of a job. Used for logging and tracing only; the pool does not
/// require ids to be unique.
pub type JobId = String;

/// Context handed to a job action for one attempt.
///
/// The cancellation token fires when the attempt's deadline elapses.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    max_attempts: u32,
    timeout: Duration,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        attempt: u32,
        max_attempts: u32,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            attempt,
            max_attempts,
            timeout,
            cancellation,
        }
    }

    /// Id of the job being processed.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 1-based number of this attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempts allowed by the retry policy in force when the job started.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deadline this attempt runs under.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the attempt's deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the attempt's deadline has passed.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// The attempt-scoped cancellation token, for handing to child tasks.
    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// The work a job performs.
///
/// Implementations SHOULD observe cancellation promptly (via
/// [`JobContext::cancelled`] or [`JobContext::is_cancelled`]). An attempt that
/// outlives its deadline is not aborted: the retry executor moves on and the
/// action keeps running detached until it returns on its own, which leaks a
/// concurrent task for as long as it ignores the token.
///
/// Actions must not await [`Pool::submit`](crate::Pool::submit) on the pool
/// running them: a resize waits for the action while the submit waits for
/// the resize.
///
/// Any `Fn(JobContext, T) -> impl Future<Output = PoolResult<()>>` closure is an
/// action.
#[async_trait]
pub trait JobAction<T>: Send + Sync {
    /// Run one attempt against the payload.
    async fn process(&self, ctx: JobContext, payload: T) -> PoolResult<()>;
}

#[async_trait]
impl<T, F, Fut> JobAction<T> for F
where
    T: Send + 'static,
    F: Fn(JobContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = PoolResult<()>> + Send + 'static,
{
    async fn process(&self, ctx: JobContext, payload: T) -> PoolResult<()> {
        (self)(ctx, payload).await
    }
}

/// A unit of work: an id, a payload and the action that processes it.
///
/// Every attempt receives its own clone of the payload.
pub struct Job<T> {
    /// Job identifier
    pub id: JobId,
    /// Data handed to the action
    pub payload: T,
    action: Arc<dyn JobAction<T>>,
}

impl<T> Job<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a job.
    pub fn new<A>(id: impl Into<JobId>, payload: T, action: A) -> Self
    where
        A: JobAction<T> + 'static,
    {
        Self::with_shared_action(id, payload, Arc::new(action))
    }

    /// Create a job with a random (uuid v4) id.
    pub fn with_generated_id<A>(payload: T, action: A) -> Self
    where
        A: JobAction<T> + 'static,
    {
        Self::new(uuid::Uuid::new_v4().to_string(), payload, action)
    }

    /// Create a job that shares its action with other jobs.
    pub fn with_shared_action(
        id: impl Into<JobId>,
        payload: T,
        action: Arc<dyn JobAction<T>>,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            action,
        }
    }

    pub(crate) fn action(&self) -> Arc<dyn JobAction<T>> {
        Arc::clone(&self.action)
    }
}

impl<T: Clone> Clone for Job<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            payload: self.payload.clone(),
            action: Arc::clone(&self.action),
        }
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// An attempt succeeded before its deadline
    Succeeded {
        /// Attempts run, including the successful one
        attempts: u32,
    },
    /// Every allowed attempt failed or timed out
    Exhausted {
        /// Attempts run
        attempts: u32,
    },
}

impl JobOutcome {
    /// Number of attempts that ran.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Whether the job succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}
