use anvilpool::prelude::*;
use std::time::Duration;
use tokio::signal;

#[derive(Debug, Clone)]
struct Subscription {
    consumer_id: String,
    topics: Vec<String>,
    delivery_url: String,
}

/// Pushes a subscription to the downstream service.
struct RegisterSubscription {
    latency: Duration,
}

#[async_trait]
impl JobAction<Subscription> for RegisterSubscription {
    async fn process(&self, ctx: JobContext, sub: Subscription) -> PoolResult<()> {
        tokio::select! {
            _ = ctx.cancelled() => Err(PoolError::job_failed("delivery abandoned")),
            _ = tokio::time::sleep(self.latency) => {
                tracing::info!(
                    "Registered {} for {:?} at {} (attempt {}/{})",
                    sub.consumer_id,
                    sub.topics,
                    sub.delivery_url,
                    ctx.attempt(),
                    ctx.max_attempts()
                );
                Ok(())
            }
        }
    }
}

fn subscription(n: usize) -> Subscription {
    Subscription {
        consumer_id: format!("consumer-{n}"),
        topics: vec!["shipments".to_string(), "returns".to_string()],
        delivery_url: format!("https://hooks.example.com/{n}"),
    }
}

#[tokio::main]
async fn main() -> PoolResult<()> {
    init_logging(&LoggingConfig::default())?;

    let settings = SharedSettings::new(
        PoolSettings::with_workers(2)
            .with_queue_capacity(4)
            .with_retry(RetryPolicy::new(3, 1u64.secs(), 4u64.secs())),
    );
    let options = PoolOptions::default().with_reconcile_interval(1u64.secs());
    let pool = Pool::with_options(settings.clone(), options)?;

    let action: std::sync::Arc<dyn JobAction<Subscription>> =
        std::sync::Arc::new(RegisterSubscription {
            latency: 300u64.millis(),
        });

    let producer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            for n in 0..60 {
                let sub = subscription(n);
                let job = Job::with_shared_action(sub.consumer_id.clone(), sub, action.clone());
                match pool.submit(job).await {
                    Ok(()) => {}
                    Err(e) if e.is_backpressure() => {
                        tracing::warn!("consumer-{} rejected, server is busy", n)
                    }
                    Err(e) => {
                        tracing::error!("Producer stopping: {}", e);
                        break;
                    }
                }
                tokio::time::sleep(50u64.millis()).await;
            }
        })
    };

    // scale up once the queue starts overflowing
    tokio::time::sleep(1u64.secs()).await;
    settings.update(|s| {
        s.worker_count = 6;
        s.queue_capacity = 16;
    });

    println!("Pool is running! Press Ctrl+C to stop early...");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        result = producer => {
            if let Err(e) = result {
                tracing::error!("Producer task failed: {}", e);
            }
        }
    }

    pool.shutdown().await?;
    println!("{:#?}", pool.stats().await);
    Ok(())
}
