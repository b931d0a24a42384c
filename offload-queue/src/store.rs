//! Job record storage with expiry.

use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobUpdate};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Keyed job records that expire `ttl` after their latest write.
///
/// An expired record reads exactly like one that never existed.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn Backend>,
    key_prefix: String,
    ttl: Duration,
}

impl JobStore {
    /// Create a store over `backend`, using the config's key prefix and TTL.
    pub fn new(backend: Arc<dyn Backend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            key_prefix: config.key("job"),
            ttl: config.job_ttl,
        }
    }

    /// Record lifetime applied on every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, id: JobId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    /// Insert a record with a full TTL window.
    pub async fn create(&self, job: &Job) -> QueueResult<()> {
        let json =
            serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.backend.set_json(&self.key(job.id), json, self.ttl).await?;
        debug!(job_id = %job.id, "Job record created");
        Ok(())
    }

    /// Load a record. Missing and expired records are both `None`.
    pub async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        match self.backend.get_json(&self.key(id)).await? {
            Some(json) => {
                let job = serde_json::from_str(&json)
                    .map_err(|e| QueueError::Deserialization(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Merge `update` into an existing record and reset its TTL.
    ///
    /// Returns `false` if the record does not exist. A record that expires
    /// between the read and the write is not recreated.
    pub async fn update(&self, id: JobId, update: &JobUpdate) -> QueueResult<bool> {
        let Some(mut job) = self.get(id).await? else {
            return Ok(false);
        };
        job.apply(update);

        let json =
            serde_json::to_string(&job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.backend.replace_json(&self.key(id), json, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn store_with_ttl(ttl: Duration) -> (MemoryBackend, JobStore) {
        let backend = MemoryBackend::new();
        let config = QueueConfig::new("test").with_job_ttl(ttl);
        let store = JobStore::new(Arc::new(backend.clone()), &config);
        (backend, store)
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let (_, store) = store_with_ttl(Duration::from_secs(60));
        let job = Job::new("abc123", 50)
            .with_max_attempts(4)
            .with_metadata("source", "chat")
            .with_metadata("nested", json!({"a": [1, 2]}));

        store.create(&job).await.unwrap();
        let loaded = store.get(job.id).await.unwrap().unwrap();

        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let (_, store) = store_with_ttl(Duration::from_secs(60));
        assert!(store.get(JobId::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let (_, store) = store_with_ttl(Duration::from_secs(60));
        let job = Job::new("h", 10).with_metadata("k", "v");
        store.create(&job).await.unwrap();

        let updated = store
            .update(job.id, &JobUpdate::new().status(JobStatus::Processing).attempts(1))
            .await
            .unwrap();
        assert!(updated);

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.correlation_hash, "h");
        assert_eq!(loaded.metadata, job.metadata);
    }

    #[tokio::test]
    async fn test_update_missing_returns_false() {
        let (backend, store) = store_with_ttl(Duration::from_secs(60));
        let updated = store
            .update(JobId::new_v4(), &JobUpdate::new().attempts(1))
            .await
            .unwrap();

        assert!(!updated);
        assert_eq!(backend.value_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_without_delete() {
        let (_, store) = store_with_ttl(Duration::from_millis(50));
        let job = Job::new("h", 1);
        store.create(&job).await.unwrap();

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(store.get(job.id).await.unwrap().is_none());
        assert!(!store.update(job.id, &JobUpdate::new().attempts(1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refreshes_ttl() {
        let (_, store) = store_with_ttl(Duration::from_millis(100));
        let job = Job::new("h", 1);
        store.create(&job).await.unwrap();

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(store.update(job.id, &JobUpdate::new().attempts(1)).await.unwrap());

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(store.get(job.id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(store.get(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend_surfaces_error() {
        let (backend, store) = store_with_ttl(Duration::from_secs(60));
        backend.set_available(false);

        let err = store.create(&Job::new("h", 1)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.get(JobId::new_v4()).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_deserialization_error() {
        let (backend, store) = store_with_ttl(Duration::from_secs(60));
        let id = JobId::new_v4();
        backend
            .set_json(&format!("offload:test:job:{}", id), "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, QueueError::Deserialization(_)));
    }
}
