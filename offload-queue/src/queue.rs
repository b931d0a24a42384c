//! Producer and status-consumer facade over the queue components.

use crate::backend::Backend;
use crate::config::{QueueConfig, RedisConfig};
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobSnapshot, Metadata};
use crate::lease::LeaseSet;
use crate::pending::PendingQueue;
use crate::redis_backend::RedisBackend;
use crate::schedule::RetrySchedule;
use crate::store::JobStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Depth of each index structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Ids ready to run
    pub pending: usize,
    /// Ids waiting out a backoff delay
    pub scheduled: usize,
    /// Ids held under a lease
    pub leased: usize,
}

/// Analysis job queue.
///
/// Cloning is cheap and shares the backend.
#[derive(Clone)]
pub struct Queue {
    backend: Arc<dyn Backend>,
    config: QueueConfig,
    store: JobStore,
    pending: PendingQueue,
    retries: RetrySchedule,
    leases: LeaseSet,
}

impl Queue {
    /// Create a queue over an existing backend.
    ///
    /// The config is taken as given; call [`QueueConfig::validate`] first
    /// when it comes from user input. [`Queue::connect`] does so itself.
    pub fn new(backend: Arc<dyn Backend>, config: QueueConfig) -> Self {
        Self {
            store: JobStore::new(backend.clone(), &config),
            pending: PendingQueue::new(backend.clone(), &config),
            retries: RetrySchedule::new(backend.clone(), &config),
            leases: LeaseSet::new(backend.clone(), &config),
            backend,
            config,
        }
    }

    /// Validate `config` and connect a Redis-backed queue.
    pub async fn connect(redis: &RedisConfig, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        info!("Initializing job queue: {}", config.queue_name);
        debug!(
            prefix = %config.key_prefix,
            max_attempts = config.max_attempts,
            ttl_secs = config.job_ttl.as_secs(),
            "Queue config"
        );

        let backend = RedisBackend::connect(redis).await?;
        info!("Job queue '{}' ready", config.queue_name);
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn retries(&self) -> &RetrySchedule {
        &self.retries
    }

    pub fn leases(&self) -> &LeaseSet {
        &self.leases
    }

    /// Submit work by reference.
    ///
    /// Returns `None` when the backing store is unavailable. Callers should
    /// treat that as "async path disabled" rather than retrying hard.
    pub async fn submit(
        &self,
        correlation_hash: impl Into<String>,
        input_length: u64,
        metadata: Option<Metadata>,
    ) -> Option<JobId> {
        let job = Job::new(correlation_hash, input_length)
            .with_max_attempts(self.config.max_attempts)
            .with_metadata_map(metadata.unwrap_or_default());
        self.submit_job(job).await
    }

    /// Submit a pre-built job, e.g. one with its own attempt ceiling.
    pub async fn submit_job(&self, job: Job) -> Option<JobId> {
        match self.enqueue(job).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Job submission failed; async path unavailable");
                None
            }
        }
    }

    /// Persist `job` and make it runnable.
    ///
    /// The record is written before the id is queued, so a queued id always
    /// has a record behind it. A job that allows no attempts is rejected.
    pub async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        if job.max_attempts == 0 {
            return Err(QueueError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        self.store.create(&job).await?;
        self.pending.push(job.id).await?;
        debug!(job_id = %job.id, queue = %self.config.queue_name, "Job enqueued");
        Ok(job.id)
    }

    /// Poll a job's status.
    ///
    /// `None` covers unknown, expired and malformed ids alike, as well as an
    /// unreachable store.
    pub async fn get_status(&self, job_id: &str) -> Option<JobSnapshot> {
        let id: JobId = job_id.parse().ok()?;
        match self.store.get(id).await {
            Ok(job) => job.map(|job| job.snapshot()),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Status lookup failed");
                None
            }
        }
    }

    /// Load the full job record.
    pub async fn job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Current depth of the pending queue, retry schedule and lease set.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            pending: self.pending.len().await?,
            scheduled: self.retries.len().await?,
            leased: self.leases.len().await?,
        })
    }

    /// Check that the backing store is reachable.
    pub async fn health_check(&self) -> QueueResult<()> {
        self.backend.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn queue() -> (MemoryBackend, Queue) {
        let backend = MemoryBackend::new();
        let queue = Queue::new(Arc::new(backend.clone()), QueueConfig::new("test"));
        (backend, queue)
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job() {
        let (_, queue) = queue();
        let id = queue.submit("abc123", 50, None).await.unwrap();

        let snapshot = queue.get_status(&id.to_string()).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.attempts, 0);
        assert_eq!(snapshot.max_attempts, 3);

        assert_eq!(queue.stats().await.unwrap().pending, 1);
        assert_eq!(queue.pending().pop().await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_submit_uses_configured_max_attempts() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Queue::new(backend, QueueConfig::new("test").with_max_attempts(7));

        let id = queue.submit("h", 1, None).await.unwrap();
        assert_eq!(queue.job(id).await.unwrap().unwrap().max_attempts, 7);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_is_rejected() {
        let (backend, queue) = queue();

        let err = queue
            .enqueue(Job::new("h", 1).with_max_attempts(0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));

        assert!(queue
            .submit_job(Job::new("h", 1).with_max_attempts(0))
            .await
            .is_none());
        assert_eq!(queue.stats().await.unwrap().pending, 0);
        assert_eq!(backend.value_count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_keeps_metadata() {
        let (_, queue) = queue();
        let mut metadata = Metadata::new();
        metadata.insert("client".to_string(), json!("web"));

        let id = queue.submit("h", 1, Some(metadata.clone())).await.unwrap();
        assert_eq!(queue.job(id).await.unwrap().unwrap().metadata, metadata);
    }

    #[tokio::test]
    async fn test_submit_job_with_custom_ceiling() {
        let (_, queue) = queue();
        let id = queue
            .submit_job(Job::new("h", 1).with_max_attempts(1))
            .await
            .unwrap();
        assert_eq!(queue.get_status(&id.to_string()).await.unwrap().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_none() {
        let (backend, queue) = queue();
        let id = queue.submit("h", 1, None).await.unwrap();

        backend.set_available(false);
        assert!(queue.submit("h", 1, None).await.is_none());
        assert!(queue.get_status(&id.to_string()).await.is_none());
        assert!(queue.health_check().await.is_err());

        backend.set_available(true);
        assert!(queue.get_status(&id.to_string()).await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_none() {
        let (_, queue) = queue();
        assert!(queue.get_status(&JobId::new_v4().to_string()).await.is_none());
        assert!(queue.get_status("definitely-not-a-job").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_start_empty() {
        let (_, queue) = queue();
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }
}
