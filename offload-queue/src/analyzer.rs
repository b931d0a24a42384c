//! The pluggable analysis function the worker runs for each job.

use crate::error::AnalysisError;
use crate::job::{JobId, Metadata};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Result of one analysis attempt.
pub type AnalysisResult = Result<Value, AnalysisError>;

/// Input handed to an analyzer.
///
/// Only the fingerprint and metadata travel through the queue; the raw
/// input never does.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Job being processed
    pub job_id: JobId,
    /// Fingerprint of the original input
    pub correlation_hash: String,
    /// Caller metadata
    pub metadata: Metadata,
    /// Which attempt this is, starting at 1
    pub attempt: u32,
}

/// External analysis invoked by the worker.
///
/// Any `Err` counts as a failed attempt and is retried until the job runs
/// out of attempts. Closures returning a future implement this trait:
///
/// ```
/// use offload_queue::{AnalysisError, AnalysisRequest};
///
/// let analyzer = |request: AnalysisRequest| async move {
///     if request.correlation_hash.is_empty() {
///         return Err(AnalysisError::new("empty hash"));
///     }
///     Ok(serde_json::json!({ "verdict": "clean" }))
/// };
/// # fn takes<A: offload_queue::Analyzer>(_: A) {}
/// # takes(analyzer);
/// ```
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Run one analysis attempt.
    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult;
}

#[async_trait]
impl<F, Fut> Analyzer for F
where
    F: Fn(AnalysisRequest) -> Fut + Send + Sync,
    Fut: Future<Output = AnalysisResult> + Send + 'static,
{
    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        (self)(request).await
    }
}
