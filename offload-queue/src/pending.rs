//! Queue of job ids ready for immediate processing.

use crate::backend::Backend;
use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::job::JobId;
use std::sync::Arc;
use tracing::warn;

/// Roughly-FIFO list of runnable job ids.
///
/// `pop` is atomic: concurrent callers never receive the same id from one
/// push.
#[derive(Clone)]
pub struct PendingQueue {
    backend: Arc<dyn Backend>,
    key: String,
}

impl PendingQueue {
    /// Create a pending queue over `backend`.
    pub fn new(backend: Arc<dyn Backend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            key: config.key("pending"),
        }
    }

    /// Backend key holding the ids.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append an id.
    pub async fn push(&self, id: JobId) -> QueueResult<()> {
        self.backend.push(&self.key, &id.to_string()).await
    }

    /// Remove and return the next id, or `None` when empty.
    ///
    /// Malformed entries are discarded on the way.
    pub async fn pop(&self) -> QueueResult<Option<JobId>> {
        while let Some(raw) = self.backend.pop(&self.key).await? {
            if let Some(id) = parse_id(&raw) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Number of waiting ids.
    pub async fn len(&self) -> QueueResult<usize> {
        self.backend.list_len(&self.key).await
    }

    /// Whether no ids are waiting.
    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Parse a stored id, dropping entries that are not job ids.
pub(crate) fn parse_id(raw: &str) -> Option<JobId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(entry = raw, "Discarding malformed job id");
            None
        }
    }
}
