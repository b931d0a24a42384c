//! Visibility-timeout leases for popped jobs.

use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::job::JobId;
use crate::pending::parse_id;
use crate::schedule::{millis_after, now_millis};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Ids a worker has popped but not yet finished, with a deadline.
///
/// A job whose lease runs out (its worker crashed or stalled) is pushed
/// back onto the pending queue by [`LeaseSet::reclaim_expired`].
#[derive(Clone)]
pub struct LeaseSet {
    backend: Arc<dyn Backend>,
    key: String,
    pending_key: String,
}

impl LeaseSet {
    /// Create a lease set paired with the config's pending queue.
    pub fn new(backend: Arc<dyn Backend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            key: config.key("leased"),
            pending_key: config.key("pending"),
        }
    }

    /// Pop the next pending id and lease it for `timeout`, atomically.
    ///
    /// Malformed entries are dropped from both structures and skipped.
    pub async fn claim(&self, timeout: Duration) -> QueueResult<Option<JobId>> {
        while let Some(raw) = self
            .backend
            .pop_into(&self.pending_key, &self.key, millis_after(timeout))
            .await?
        {
            match parse_id(&raw) {
                Some(id) => return Ok(Some(id)),
                None => {
                    self.backend.set_remove(&self.key, &raw).await?;
                }
            }
        }
        Ok(None)
    }

    /// Drop the lease on `id`. Returns whether one was held.
    pub async fn release(&self, id: JobId) -> QueueResult<bool> {
        self.backend.set_remove(&self.key, &id.to_string()).await
    }

    /// Push every job with an expired lease back onto the pending queue.
    pub async fn reclaim_expired(&self) -> QueueResult<usize> {
        let reclaimed = self
            .backend
            .move_due(&self.key, &self.pending_key, now_millis())
            .await?;
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed jobs with expired leases");
        }
        Ok(reclaimed)
    }

    /// Number of outstanding leases.
    pub async fn len(&self) -> QueueResult<usize> {
        self.backend.set_len(&self.key).await
    }
}
