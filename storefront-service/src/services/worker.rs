use backoff::future::retry;
use backoff::ExponentialBackoff;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache::{Cache, CacheKeyPattern};
use super::queue::{Delivery, FailOutcome, Job, QueueClient};
use crate::config::QueueConfig;

const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { removed: u64 },
    Retrying { attempts: u32 },
    DeadLettered,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Retrying { .. } => "retrying",
            JobOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Drains the invalidation queue at a bounded rate.
pub struct InvalidationWorker {
    queue: Arc<dyn QueueClient>,
    cache: Arc<dyn Cache>,
    limiter: DefaultDirectRateLimiter,
    poll_timeout: Duration,
    retry_window: Duration,
    shutdown: CancellationToken,
}

impl InvalidationWorker {
    pub fn new(queue: Arc<dyn QueueClient>, cache: Arc<dyn Cache>, config: &QueueConfig) -> Self {
        let per_second = NonZeroU32::new(config.jobs_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            queue,
            cache,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            poll_timeout: Duration::from_secs(config.poll_timeout_seconds.max(1)),
            retry_window: DEFAULT_RETRY_WINDOW,
            shutdown: CancellationToken::new(),
        }
    }

    /// How long transient cache failures are retried before the delivery
    /// is failed back to the queue.
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        match self.queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(moved) => tracing::warn!(jobs = moved, "Re-queued unacknowledged jobs"),
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight jobs"),
        }

        tracing::info!("Cache invalidation worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Cache invalidation worker shutting down");
                    break;
                }
                result = self.run_once() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Queue receive failed");
                        tokio::time::sleep(self.poll_timeout).await;
                    }
                }
            }
        }
    }

    /// Waits for the rate limiter, reserves at most one job and handles it.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, anyhow::Error> {
        self.limiter.until_ready().await;

        match self.queue.receive(self.poll_timeout).await? {
            Some(delivery) => Ok(Some(self.process(delivery).await)),
            None => Ok(None),
        }
    }

    pub async fn process(&self, delivery: Delivery) -> JobOutcome {
        let job_id = delivery.envelope.id.clone();
        let outcome = match &delivery.envelope.job {
            Job::ClearCache { cache_key } => self.clear_cache(&delivery, cache_key).await,
        };

        metrics::counter!("cache_invalidation_jobs_total", "outcome" => outcome.label())
            .increment(1);
        tracing::debug!(job_id = %job_id, outcome = outcome.label(), "Job processed");
        outcome
    }

    async fn clear_cache(&self, delivery: &Delivery, cache_key: &str) -> JobOutcome {
        let pattern = match CacheKeyPattern::parse(cache_key) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::error!(job_id = %delivery.envelope.id, error = %e, "Rejecting cache invalidation job");
                if let Err(e) = self.queue.dead_letter(delivery).await {
                    tracing::error!(error = %e, "Failed to dead-letter job");
                }
                return JobOutcome::DeadLettered;
            }
        };

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.cache
                .delete(&pattern)
                .await
                .map_err(backoff::Error::transient)
        })
        .await;

        match result {
            Ok(removed) => {
                if let Err(e) = self.queue.ack(delivery).await {
                    // Left in processing; recovery redelivers it and deletion is idempotent.
                    tracing::error!(job_id = %delivery.envelope.id, error = %e, "Failed to acknowledge job");
                }
                tracing::info!(cache_key = %cache_key, removed, "Cache invalidated");
                JobOutcome::Completed { removed }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %delivery.envelope.id,
                    cache_key = %cache_key,
                    attempts = delivery.envelope.attempts + 1,
                    error = %e,
                    "Cache invalidation failed"
                );
                match self.queue.fail(delivery).await {
                    Ok(FailOutcome::Requeued { attempts }) => JobOutcome::Retrying { attempts },
                    Ok(FailOutcome::DeadLettered) => JobOutcome::DeadLettered,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to return job to queue");
                        JobOutcome::Retrying {
                            attempts: delivery.envelope.attempts + 1,
                        }
                    }
                }
            }
        }
    }
}
