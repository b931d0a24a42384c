//! Monitoring hook notified by the worker.

use crate::job::JobId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Lifecycle points the worker reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// An attempt is about to run
    PickedUp { id: JobId, attempt: u32 },
    /// Analysis succeeded
    Completed { id: JobId, attempts: u32 },
    /// Attempt failed and the job was parked for a retry
    Retried {
        id: JobId,
        attempt: u32,
        delay: Duration,
    },
    /// Attempts exhausted
    DeadLettered { id: JobId, attempts: u32 },
}

impl JobEvent {
    /// Job the event is about.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::PickedUp { id, .. }
            | Self::Completed { id, .. }
            | Self::Retried { id, .. }
            | Self::DeadLettered { id, .. } => *id,
        }
    }

    /// Short event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PickedUp { .. } => "picked_up",
            Self::Completed { .. } => "completed",
            Self::Retried { .. } => "retried",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Receives worker events without knowing what monitoring sits behind it.
///
/// Implementations must be cheap and must not block; they run inline in
/// the worker loop.
pub trait Observer: Send + Sync {
    /// Record a lifecycle event.
    fn record_event(&self, event: &JobEvent);

    /// Record a failed analysis attempt.
    fn record_failure(&self, id: JobId, attempt: u32, error: &str);
}

impl<T: Observer + ?Sized> Observer for Arc<T> {
    fn record_event(&self, event: &JobEvent) {
        (**self).record_event(event)
    }

    fn record_failure(&self, id: JobId, attempt: u32, error: &str) {
        (**self).record_failure(id, attempt, error)
    }
}

/// Observer that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record_event(&self, _event: &JobEvent) {}

    fn record_failure(&self, _id: JobId, _attempt: u32, _error: &str) {}
}

/// Observer that reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn record_event(&self, event: &JobEvent) {
        match event {
            JobEvent::PickedUp { id, attempt } => {
                info!(job_id = %id, attempt, "Job picked up");
            }
            JobEvent::Completed { id, attempts } => {
                info!(job_id = %id, attempts, "Job completed");
            }
            JobEvent::Retried { id, attempt, delay } => {
                warn!(
                    job_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Job scheduled for retry"
                );
            }
            JobEvent::DeadLettered { id, attempts } => {
                error!(job_id = %id, attempts, "Job dead-lettered");
            }
        }
    }

    fn record_failure(&self, id: JobId, attempt: u32, error: &str) {
        warn!(job_id = %id, attempt, error, "Analysis attempt failed");
    }
}
