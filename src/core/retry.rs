//! Retry executor: runs one job through its attempt loop.
//!
//! Each attempt is spawned on its own task with an attempt-scoped
//! cancellation token and raced against the attempt's deadline. Between
//! attempts the executor pauses; the pause only occupies the worker that owns
//! this job.

use crate::config::RetryPolicy;
use crate::core::worker::JobCounters;
use crate::error::{PoolError, PoolResult};
use crate::job::{Job, JobAction, JobContext, JobOutcome};
use crate::settings::SettingsProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Executes jobs under the retry policy currently published by the settings
/// provider.
pub struct RetryExecutor {
    settings: Arc<dyn SettingsProvider>,
    counters: Arc<JobCounters>,
}

impl RetryExecutor {
    pub(crate) fn new(settings: Arc<dyn SettingsProvider>, counters: Arc<JobCounters>) -> Self {
        Self { settings, counters }
    }

    /// The retry policy for the next job, patched up if the provider hands
    /// out something unusable.
    fn current_policy(&self) -> RetryPolicy {
        let mut policy = self.settings.snapshot().retry;

        if let Err(errors) = policy.validate() {
            tracing::warn!("Invalid retry policy ({}), normalizing", errors.join("; "));
            policy.max_attempts = policy.max_attempts.max(1);
            policy.max_timeout = policy.max_timeout.max(policy.initial_timeout);
        }

        policy
    }

    /// Run `job` until it succeeds or runs out of attempts.
    ///
    /// The outcome is logged and counted; nothing is reported back to whoever
    /// submitted the job.
    pub async fn execute<T>(&self, worker_id: usize, job: Job<T>) -> JobOutcome
    where
        T: Clone + Send + Sync + 'static,
    {
        let policy = self.current_policy();
        let max_attempts = policy.max_attempts;
        let action = job.action();
        let mut timeout = policy.initial_timeout;
        let mut attempt = 0;

        loop {
            attempt += 1;
            JobCounters::bump(&self.counters.attempts);
            tracing::info!(
                "Worker {} processing job {} (attempt {}/{}, timeout {:?})",
                worker_id,
                job.id,
                attempt,
                max_attempts,
                timeout
            );

            let ctx = JobContext::new(
                job.id.clone(),
                attempt,
                max_attempts,
                timeout,
                CancellationToken::new(),
            );

            match run_attempt(Arc::clone(&action), ctx, job.payload.clone(), timeout).await {
                Ok(()) => {
                    JobCounters::bump(&self.counters.succeeded);
                    tracing::info!(
                        "Worker {} successfully completed job {} on attempt {}",
                        worker_id,
                        job.id,
                        attempt
                    );
                    return JobOutcome::Succeeded { attempts: attempt };
                }
                Err(PoolError::AttemptTimedOut { timeout_ms }) => {
                    tracing::warn!(
                        "Worker {} job {} exceeded its {}ms deadline (attempt {}/{}); the action keeps running in the background",
                        worker_id,
                        job.id,
                        timeout_ms,
                        attempt,
                        max_attempts
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Worker {} failed job {} (attempt {}/{}): {}",
                        worker_id,
                        job.id,
                        attempt,
                        max_attempts,
                        e
                    );
                }
            }

            timeout = policy.next_timeout(timeout, attempt);

            if attempt >= max_attempts {
                JobCounters::bump(&self.counters.exhausted);
                tracing::error!(
                    "Worker {} gave up on job {} after {} attempts",
                    worker_id,
                    job.id,
                    attempt
                );
                return JobOutcome::Exhausted { attempts: attempt };
            }

            tracing::debug!(
                "Worker {} backing off {:?} before retrying job {}",
                worker_id,
                timeout,
                job.id
            );
            sleep(timeout).await;
        }
    }
}

/// Run one attempt, racing it against `timeout`.
///
/// On timeout the attempt's token is cancelled and its task detached, not
/// aborted.
async fn run_attempt<T>(
    action: Arc<dyn JobAction<T>>,
    ctx: JobContext,
    payload: T,
    timeout: Duration,
) -> PoolResult<()>
where
    T: Send + 'static,
{
    let token = ctx.token().clone();
    let mut handle = tokio::spawn(async move { action.process(ctx, payload).await });

    let result = tokio::select! {
        biased;
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(join_error) => Err(PoolError::job_failed_with("Job action panicked", join_error)),
        },
        _ = sleep(timeout) => Err(timed_out(timeout)),
    };

    token.cancel();
    result
}

fn timed_out(timeout: Duration) -> PoolError {
    PoolError::AttemptTimedOut {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::settings::{SharedSettings, StaticSettings};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::Instant;

    fn executor_with(policy: RetryPolicy) -> (RetryExecutor, Arc<JobCounters>) {
        let counters = Arc::new(JobCounters::default());
        let settings = StaticSettings::new(PoolSettings::testing().with_retry(policy));
        (
            RetryExecutor::new(Arc::new(settings), Arc::clone(&counters)),
            counters,
        )
    }

    /// Records when each attempt started and which deadline it ran under.
    #[derive(Default)]
    struct AttemptLog {
        entries: Mutex<Vec<(Duration, Duration)>>,
    }

    impl AttemptLog {
        fn record(&self, origin: Instant, ctx: &JobContext) {
            self.entries
                .lock()
                .unwrap()
                .push((origin.elapsed(), ctx.timeout()));
        }

        fn starts(&self) -> Vec<Duration> {
            self.entries.lock().unwrap().iter().map(|e| e.0).collect()
        }

        fn deadlines(&self) -> Vec<Duration> {
            self.entries.lock().unwrap().iter().map(|e| e.1).collect()
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn close_to(actual: Duration, expected: Duration) -> bool {
        actual >= expected && actual < expected + Duration::from_millis(20)
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_job_uses_every_attempt() {
        let (executor, counters) = executor_with(RetryPolicy::new(4, secs(1), secs(100)));
        let log = Arc::new(AttemptLog::default());
        let origin = Instant::now();

        let job = Job::new("fails", (), {
            let log = Arc::clone(&log);
            move |ctx: JobContext, _: ()| {
                log.record(origin, &ctx);
                async { Err::<(), _>(PoolError::job_failed("boom")) }
            }
        });

        let outcome = executor.execute(0, job).await;

        assert_eq!(outcome, JobOutcome::Exhausted { attempts: 4 });
        assert_eq!(log.deadlines(), vec![secs(1), secs(1), secs(2), secs(8)]);

        // pauses of 1s, 2s and 8s between the attempts, none after the last
        let starts = log.starts();
        assert!(close_to(starts[0], secs(0)));
        assert!(close_to(starts[1], secs(1)));
        assert!(close_to(starts[2], secs(3)));
        assert!(close_to(starts[3], secs(11)));
        assert!(close_to(origin.elapsed(), secs(11)));

        assert_eq!(JobCounters::read(&counters.attempts), 4);
        assert_eq!(JobCounters::read(&counters.exhausted), 1);
        assert_eq!(JobCounters::read(&counters.succeeded), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying_without_backoff() {
        let (executor, counters) = executor_with(RetryPolicy::new(5, secs(1), secs(10)));
        let calls = Arc::new(AtomicU32::new(0));
        let origin = Instant::now();

        let job = Job::new("second-time-lucky", (), {
            let calls = Arc::clone(&calls);
            move |ctx: JobContext, _: ()| {
                calls.fetch_add(1, Ordering::SeqCst);
                let attempt = ctx.attempt();
                async move {
                    if attempt < 2 {
                        Err(PoolError::job_failed("not yet"))
                    } else {
                        Ok(())
                    }
                }
            }
        });

        let outcome = executor.execute(0, job).await;

        assert_eq!(outcome, JobOutcome::Succeeded { attempts: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // one backoff pause between the attempts, none after the success
        assert!(close_to(origin.elapsed(), secs(1)));
        assert_eq!(JobCounters::read(&counters.succeeded), 1);
        assert_eq!(JobCounters::read(&counters.exhausted), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let (executor, counters) = executor_with(RetryPolicy::default());
        let job = Job::new("ok", 1u8, |_ctx: JobContext, _: u8| async { Ok::<(), PoolError>(()) });

        assert_eq!(
            executor.execute(0, job).await,
            JobOutcome::Succeeded { attempts: 1 }
        );
        assert_eq!(JobCounters::read(&counters.attempts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_job_times_out_with_capped_backoff() {
        let (executor, _counters) = executor_with(RetryPolicy::new(3, secs(1), secs(2)));
        let log = Arc::new(AttemptLog::default());
        let origin = Instant::now();

        let job = Job::new("hangs", (), {
            let log = Arc::clone(&log);
            move |ctx: JobContext, _: ()| {
                log.record(origin, &ctx);
                async {
                    std::future::pending::<()>().await;
                    Ok::<(), PoolError>(())
                }
            }
        });

        let outcome = executor.execute(0, job).await;

        assert_eq!(outcome, JobOutcome::Exhausted { attempts: 3 });
        assert_eq!(log.deadlines(), vec![secs(1), secs(1), secs(2)]);
        // 1s deadline + 1s pause + 1s deadline + 2s pause + 2s deadline
        assert!(close_to(origin.elapsed(), secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_attempt_token() {
        let (executor, _counters) = executor_with(RetryPolicy::once(secs(1)));
        let observed = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let job = Job::new("cooperative", (), {
            let observed = Arc::clone(&observed);
            move |ctx: JobContext, _: ()| {
                let observed = Arc::clone(&observed);
                let done_tx = Arc::clone(&done_tx);
                async move {
                    ctx.cancelled().await;
                    observed.store(true, Ordering::SeqCst);
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                    Err::<(), _>(PoolError::job_failed("cancelled"))
                }
            }
        });

        let outcome = executor.execute(0, job).await;
        assert_eq!(outcome, JobOutcome::Exhausted { attempts: 1 });

        done_rx.await.unwrap();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_counts_as_failed_attempt() {
        let (executor, counters) = executor_with(RetryPolicy::new(2, secs(1), secs(1)));
        let job = Job::new("panics", (), |_ctx: JobContext, _: ()| async {
            if true {
                panic!("action blew up");
            }
            Ok::<(), PoolError>(())
        });

        let outcome = executor.execute(0, job).await;
        assert_eq!(outcome, JobOutcome::Exhausted { attempts: 2 });
        assert_eq!(JobCounters::read(&counters.attempts), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_is_read_per_execution() {
        let settings = SharedSettings::new(
            PoolSettings::testing().with_retry(RetryPolicy::new(1, secs(1), secs(1))),
        );
        let counters = Arc::new(JobCounters::default());
        let executor = RetryExecutor::new(Arc::new(settings.clone()), Arc::clone(&counters));
        let failing = |_ctx: JobContext, _: ()| async { Err::<(), _>(PoolError::job_failed("no")) };

        let first = executor.execute(0, Job::new("a", (), failing)).await;
        assert_eq!(first.attempts(), 1);

        settings.update(|s| s.retry = RetryPolicy::new(4, secs(1), secs(1)));
        let second = executor.execute(0, Job::new("b", (), failing)).await;
        assert_eq!(second.attempts(), 4);
    }

    #[test]
    fn test_timed_out_saturates_millis() {
        assert!(matches!(
            timed_out(Duration::from_millis(1500)),
            PoolError::AttemptTimedOut { timeout_ms: 1500 }
        ));
        assert!(matches!(
            timed_out(Duration::MAX),
            PoolError::AttemptTimedOut { timeout_ms: u64::MAX }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_policy_still_runs_once() {
        let (executor, _counters) = executor_with(RetryPolicy::new(0, secs(1), secs(1)));
        let job = Job::new("zero", (), |_ctx: JobContext, _: ()| async { Ok::<(), PoolError>(()) });

        assert_eq!(
            executor.execute(0, job).await,
            JobOutcome::Succeeded { attempts: 1 }
        );
    }
}
