//! Time-ordered schedule of jobs waiting out a backoff delay.

use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::job::JobId;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds `delay` from now, saturating.
pub(crate) fn millis_after(delay: Duration) -> i64 {
    let delay = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(delay)
}

/// Job ids keyed by the time they become runnable again.
#[derive(Clone)]
pub struct RetrySchedule {
    backend: Arc<dyn Backend>,
    key: String,
    pending_key: String,
}

impl RetrySchedule {
    /// Create a retry schedule that releases into the config's pending queue.
    pub fn new(backend: Arc<dyn Backend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            key: config.key("retry"),
            pending_key: config.key("pending"),
        }
    }

    /// Park `id` until `delay` from now.
    pub async fn schedule(&self, id: JobId, delay: Duration) -> QueueResult<()> {
        self.backend
            .set_add(&self.key, &id.to_string(), millis_after(delay))
            .await
    }

    /// Move every entry that is due onto the pending queue.
    ///
    /// Removal and push happen as one atomic step, so concurrent callers
    /// never release the same entry twice. Returns how many were released.
    pub async fn release_due(&self) -> QueueResult<usize> {
        let released = self
            .backend
            .move_due(&self.key, &self.pending_key, now_millis())
            .await?;
        if released > 0 {
            debug!(released, "Released due retries");
        }
        Ok(released)
    }

    /// Number of parked entries.
    pub async fn len(&self) -> QueueResult<usize> {
        self.backend.set_len(&self.key).await
    }

    /// Whether nothing is parked.
    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}
