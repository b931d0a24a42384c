//! Stand-in analyzer used by the worker binary until a real scanner is wired in.

use async_trait::async_trait;
use chrono::Utc;
use offload_queue::{AnalysisRequest, AnalysisResult, Analyzer};
use serde_json::json;

/// Echoes what it was asked to analyze back as an `"unscanned"` verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAnalyzer;

#[async_trait]
impl Analyzer for EchoAnalyzer {
    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        Ok(json!({
            "verdict": "unscanned",
            "correlationHash": request.correlation_hash,
            "metadata": request.metadata,
            "attempt": request.attempt,
            "analyzedAt": Utc::now().to_rfc3339(),
        }))
    }
}
