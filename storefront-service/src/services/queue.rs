//! Durable background jobs.
//!
//! Jobs travel as JSON envelopes through three lists per queue: `pending`,
//! `processing` (reserved by a worker, not yet acknowledged) and `failed`
//! (dead letters). A reserved job that is never acknowledged is moved back to
//! `pending` by `recover_in_flight`, so a crashed worker's job is redelivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::{QueueConfig, RedisConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Job {
    ClearCache {
        #[serde(rename = "cacheKey")]
        cache_key: String,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ClearCache { .. } => "clearCache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    pub job: Job,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// A reserved job. `raw` is the exact payload held in the processing list.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: JobEnvelope,
    raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued { attempts: u32 },
    DeadLettered,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Appends a job; returns the envelope id.
    async fn enqueue(&self, job: Job) -> Result<String, anyhow::Error>;

    /// Reserves the oldest pending job, waiting up to `timeout`.
    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, anyhow::Error>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), anyhow::Error>;

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, anyhow::Error>;

    /// Moves a job that can never succeed straight to the failed list.
    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), anyhow::Error>;

    /// Returns reserved jobs to `pending`. Returns how many were moved.
    async fn recover_in_flight(&self) -> Result<u64, anyhow::Error>;

    async fn pending_len(&self) -> Result<u64, anyhow::Error>;
}

fn encode(envelope: &JobEnvelope) -> Result<String, anyhow::Error> {
    serde_json::to_string(envelope).map_err(|e| anyhow::anyhow!("Failed to encode job: {}", e))
}

fn retried(delivery: &Delivery, max_attempts: u32) -> Result<Option<String>, anyhow::Error> {
    let attempts = delivery.envelope.attempts + 1;
    if attempts >= max_attempts {
        return Ok(None);
    }
    let envelope = JobEnvelope {
        attempts,
        ..delivery.envelope.clone()
    };
    encode(&envelope).map(Some)
}

/// Logs instead of failing: a lost invalidation only leaves a stale entry
/// until its TTL runs out.
pub async fn enqueue_invalidation(queue: &dyn QueueClient, cache_key: String) {
    match queue
        .enqueue(Job::ClearCache {
            cache_key: cache_key.clone(),
        })
        .await
    {
        Ok(job_id) => {
            tracing::debug!(job_id = %job_id, cache_key = %cache_key, "Cache invalidation enqueued");
        }
        Err(e) => {
            metrics::counter!("cache_invalidation_enqueue_failures_total").increment(1);
            tracing::warn!(cache_key = %cache_key, error = %e, "Failed to enqueue cache invalidation");
        }
    }
}

#[derive(Clone)]
pub struct RedisQueue {
    _client: Client,
    producer: ConnectionManager,
    // BRPOPLPUSH blocks its connection; keep it off the producer's.
    consumer: ConnectionManager,
    pending_key: String,
    processing_key: String,
    failed_key: String,
    max_attempts: u32,
}

impl RedisQueue {
    pub async fn new(redis: &RedisConfig, queue: &QueueConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(queue = %queue.name, "Connecting job queue to Redis");
        let client = Client::open(redis.url.clone())?;

        let producer = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;
        let consumer = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open queue consumer connection: {}", e))?;

        Ok(Self {
            _client: client,
            producer,
            consumer,
            pending_key: format!("queue:{}:pending", queue.name),
            processing_key: format!("queue:{}:processing", queue.name),
            failed_key: format!("queue:{}:failed", queue.name),
            max_attempts: queue.max_attempts,
        })
    }

    async fn dead_letter_raw(&self, raw: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.producer.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.failed_key)
            .arg(raw)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to dead-letter job: {}", e))
    }
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn enqueue(&self, job: Job) -> Result<String, anyhow::Error> {
        let envelope = JobEnvelope::new(job);
        let raw = encode(&envelope)?;
        let mut conn = self.producer.clone();
        let _: u64 = redis::cmd("LPUSH")
            .arg(&self.pending_key)
            .arg(&raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to enqueue job: {}", e))?;
        Ok(envelope.id)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, anyhow::Error> {
        let mut conn = self.consumer.clone();
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.pending_key)
            .arg(&self.processing_key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reserve job: {}", e))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<JobEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Delivery { envelope, raw })),
            Err(e) => {
                tracing::error!(error = %e, "Discarding malformed job payload");
                self.dead_letter_raw(&raw).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), anyhow::Error> {
        let mut conn = self.producer.clone();
        let _: u64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&delivery.raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to acknowledge job: {}", e))?;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, anyhow::Error> {
        let Some(next) = retried(delivery, self.max_attempts)? else {
            self.dead_letter_raw(&delivery.raw).await?;
            return Ok(FailOutcome::DeadLettered);
        };

        let mut conn = self.producer.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&delivery.raw)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.pending_key)
            .arg(&next)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to requeue job: {}", e))?;

        Ok(FailOutcome::Requeued {
            attempts: delivery.envelope.attempts + 1,
        })
    }

    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), anyhow::Error> {
        self.dead_letter_raw(&delivery.raw).await
    }

    async fn recover_in_flight(&self) -> Result<u64, anyhow::Error> {
        let mut conn = self.producer.clone();
        let mut moved = 0;
        loop {
            let raw: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(&self.processing_key)
                .arg(&self.pending_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to recover in-flight jobs: {}", e))?;
            if raw.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn pending_len(&self) -> Result<u64, anyhow::Error> {
        let mut conn = self.producer.clone();
        redis::cmd("LLEN")
            .arg(&self.pending_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read queue length: {}", e))
    }
}

#[derive(Default)]
struct MemoryLists {
    // Front is newest, like LPUSH.
    pending: VecDeque<String>,
    processing: Vec<String>,
    failed: Vec<String>,
}

/// Same list semantics as `RedisQueue`, kept in process.
pub struct MemoryQueue {
    lists: Mutex<MemoryLists>,
    notify: Notify,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            lists: Mutex::new(MemoryLists::default()),
            notify: Notify::new(),
            max_attempts,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryLists>, anyhow::Error> {
        self.lists
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory queue mutex poisoned: {}", e))
    }

    pub fn processing_len(&self) -> usize {
        self.lock().map(|l| l.processing.len()).unwrap_or(0)
    }

    pub fn failed_len(&self) -> usize {
        self.lock().map(|l| l.failed.len()).unwrap_or(0)
    }

    /// Jobs still pending, oldest first.
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.lock()
            .map(|l| {
                l.pending
                    .iter()
                    .rev()
                    .filter_map(|raw| serde_json::from_str::<JobEnvelope>(raw).ok())
                    .map(|e| e.job)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_pending(&self, raw: String) -> Result<(), anyhow::Error> {
        self.lock()?.pending.push_front(raw);
        self.notify.notify_one();
        Ok(())
    }

    fn reserve(&self) -> Result<Option<Delivery>, anyhow::Error> {
        let mut lists = self.lock()?;
        while let Some(raw) = lists.pending.pop_back() {
            match serde_json::from_str::<JobEnvelope>(&raw) {
                Ok(envelope) => {
                    lists.processing.push(raw.clone());
                    return Ok(Some(Delivery { envelope, raw }));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Discarding malformed job payload");
                    lists.failed.push(raw);
                }
            }
        }
        Ok(None)
    }

    fn remove_processing(lists: &mut MemoryLists, raw: &str) {
        if let Some(pos) = lists.processing.iter().position(|r| r == raw) {
            lists.processing.remove(pos);
        }
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<String, anyhow::Error> {
        let envelope = JobEnvelope::new(job);
        self.push_pending(encode(&envelope)?)?;
        Ok(envelope.id)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.reserve()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), anyhow::Error> {
        let mut lists = self.lock()?;
        Self::remove_processing(&mut lists, &delivery.raw);
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery) -> Result<FailOutcome, anyhow::Error> {
        let next = retried(delivery, self.max_attempts)?;
        let mut lists = self.lock()?;
        Self::remove_processing(&mut lists, &delivery.raw);
        match next {
            Some(raw) => {
                lists.pending.push_front(raw);
                drop(lists);
                self.notify.notify_one();
                Ok(FailOutcome::Requeued {
                    attempts: delivery.envelope.attempts + 1,
                })
            }
            None => {
                lists.failed.push(delivery.raw.clone());
                Ok(FailOutcome::DeadLettered)
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), anyhow::Error> {
        let mut lists = self.lock()?;
        Self::remove_processing(&mut lists, &delivery.raw);
        lists.failed.push(delivery.raw.clone());
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, anyhow::Error> {
        let mut lists = self.lock()?;
        let in_flight = std::mem::take(&mut lists.processing);
        let moved = in_flight.len() as u64;
        // Oldest reservation goes back to the consuming end first.
        for raw in in_flight {
            lists.pending.push_back(raw);
        }
        drop(lists);
        if moved > 0 {
            self.notify.notify_one();
        }
        Ok(moved)
    }

    async fn pending_len(&self) -> Result<u64, anyhow::Error> {
        Ok(self.lock()?.pending.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear(key: &str) -> Job {
        Job::ClearCache {
            cache_key: key.to_string(),
        }
    }

    #[test]
    fn job_wire_format() {
        let json = serde_json::to_value(clear("user:1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "clearCache", "cacheKey": "user:1"})
        );
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let queue = MemoryQueue::new(3);
        queue.enqueue(clear("user:1")).await.unwrap();
        queue.enqueue(clear("user:2")).await.unwrap();

        let first = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.envelope.job, clear("user:1"));
        assert_eq!(queue.processing_len(), 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.processing_len(), 0);
        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn receive_times_out_when_empty() {
        let queue = MemoryQueue::new(3);
        assert!(queue
            .receive(Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failures_requeue_then_dead_letter() {
        let queue = MemoryQueue::new(2);
        queue.enqueue(clear("user:1")).await.unwrap();

        let delivery = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&delivery).await.unwrap(),
            FailOutcome::Requeued { attempts: 1 }
        );

        let retry = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(retry.envelope.attempts, 1);
        assert_eq!(retry.envelope.id, delivery.envelope.id);
        assert_eq!(queue.fail(&retry).await.unwrap(), FailOutcome::DeadLettered);

        assert_eq!(queue.pending_len().await.unwrap(), 0);
        assert_eq!(queue.processing_len(), 0);
        assert_eq!(queue.failed_len(), 1);
    }

    #[tokio::test]
    async fn unacknowledged_jobs_are_recovered() {
        let queue = MemoryQueue::new(3);
        queue.enqueue(clear("user:1")).await.unwrap();
        let lost = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);
        let again = queue.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.envelope, lost.envelope);
    }

    #[tokio::test]
    async fn waiting_receiver_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::new(3));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(clear("user:9")).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.envelope.job, clear("user:9"));
    }
}
