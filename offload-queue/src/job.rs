//! Job definition and state management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Free-form caller metadata, opaque to the queue.
pub type Metadata = serde_json::Map<String, Value>;

/// Default ceiling on execution attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending queue or the retry schedule
    Pending,
    /// An attempt is in flight
    Processing,
    /// Analysis succeeded
    Completed,
    /// Attempts exhausted (dead letter)
    Failed,
}

impl JobStatus {
    /// Whether the worker will never touch a job in this status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred analysis work.
///
/// The job carries a fingerprint of its input, never the input itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Fingerprint of the original input, for traceability only
    pub correlation_hash: String,

    /// Length of the original input (informational)
    pub input_length: u64,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// Current status
    pub status: JobStatus,

    /// Attempts started so far
    pub attempts: u32,

    /// Ceiling on attempts, fixed at creation
    pub max_attempts: u32,

    /// When the latest attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Message of the latest failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Analysis output, set once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Final error, set once failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Caller metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Job {
    /// Create a new pending job.
    pub fn new(correlation_hash: impl Into<String>, input_length: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_hash: correlation_hash.into(),
            input_length,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_attempt_at: None,
            last_error: None,
            result: None,
            error: None,
            metadata: Metadata::new(),
        }
    }

    /// Set max attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the metadata map.
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check if another attempt may be started.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Check if the job reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update into this record.
    pub fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(attempts) = update.attempts {
            self.attempts = attempts;
        }
        if let Some(at) = update.last_attempt_at {
            self.last_attempt_at = Some(at);
        }
        if let Some(last_error) = &update.last_error {
            self.last_error = last_error.clone();
        }
        if let Some(result) = &update.result {
            self.result = result.clone();
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
    }

    /// Consumer-facing view of this job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::from(self)
    }
}

/// Partial update merged into an existing job record.
///
/// `None` leaves a field alone. For optional fields, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub attempts: Option<u32>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
    pub result: Option<Option<Value>>,
    pub error: Option<Option<String>>,
}

impl JobUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn last_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_attempt_at = Some(at);
        self
    }

    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(Some(result));
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn clear_result(mut self) -> Self {
        self.result = Some(None);
        self
    }

    /// Checkpoint written before an attempt runs.
    ///
    /// Clears the terminal fields left by any earlier run; `last_error`
    /// is kept until the next failure overwrites it.
    pub fn processing(attempt: u32, at: DateTime<Utc>) -> Self {
        Self::new()
            .status(JobStatus::Processing)
            .attempts(attempt)
            .last_attempt_at(at)
            .clear_error()
            .clear_result()
    }

    /// Successful attempt.
    pub fn completed(result: Value) -> Self {
        Self::new().status(JobStatus::Completed).result(result)
    }

    /// Failed attempt with attempts left.
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new().status(JobStatus::Pending).last_error(message)
    }

    /// Failed final attempt.
    pub fn dead(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new()
            .status(JobStatus::Failed)
            .last_error(message.clone())
            .error(message)
    }
}

/// What a status poller sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Only present when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Only present when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_attempt_at: job.last_attempt_at,
            last_error: job.last_error.clone(),
            result: match job.status {
                JobStatus::Completed => job.result.clone(),
                _ => None,
            },
            error: match job.status {
                JobStatus::Failed => job.error.clone(),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_creation() {
        let job = Job::new("abc123", 50);

        assert_eq!(job.correlation_hash, "abc123");
        assert_eq!(job.input_length, 50);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.last_error.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_job_builder() {
        let job = Job::new("h", 1)
            .with_max_attempts(5)
            .with_metadata("source", "chat")
            .with_metadata("turn", 7);

        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.metadata.get("source"), Some(&json!("chat")));
        assert_eq!(job.metadata.get("turn"), Some(&json!(7)));
    }

    #[test]
    fn test_job_id_uniqueness() {
        assert_ne!(Job::new("h", 1).id, Job::new("h", 1).id);
    }

    #[test]
    fn test_job_timestamps() {
        let before = Utc::now();
        let job = Job::new("h", 1);
        let after = Utc::now();

        assert!(job.created_at >= before);
        assert!(job.created_at <= after);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let value = serde_json::to_value(JobStatus::Processing).unwrap();
        assert_eq!(value, json!("processing"));
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job::new("abc123", 50);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["correlationHash"], json!("abc123"));
        assert_eq!(value["inputLength"], json!(50));
        assert_eq!(value["maxAttempts"], json!(3));
        assert!(value.get("lastError").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_processing_checkpoint_clears_stale_fields() {
        let mut job = Job::new("h", 1);
        job.error = Some("old".to_string());
        job.last_error = Some("previous attempt".to_string());
        let now = Utc::now();

        job.apply(&JobUpdate::processing(2, now));

        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_attempt_at, Some(now));
        assert!(job.error.is_none());
        assert_eq!(job.last_error.as_deref(), Some("previous attempt"));
    }

    #[test]
    fn test_retry_update_keeps_attempts() {
        let mut job = Job::new("h", 1);
        job.apply(&JobUpdate::processing(1, Utc::now()));
        job.apply(&JobUpdate::retry("timeout"));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_dead_update_sets_both_errors() {
        let mut job = Job::new("h", 1);
        job.apply(&JobUpdate::dead("gave up"));

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("gave up"));
        assert_eq!(job.last_error.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_empty_update_is_noop() {
        let job = Job::new("h", 1).with_metadata("k", "v");
        let mut updated = job.clone();
        updated.apply(&JobUpdate::new());
        assert_eq!(job, updated);
    }

    #[test]
    fn test_can_retry() {
        let mut job = Job::new("h", 1).with_max_attempts(2);
        assert!(job.can_retry());
        job.attempts = 2;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_snapshot_hides_result_unless_completed() {
        let mut job = Job::new("h", 1);
        job.result = Some(json!({"stale": true}));
        assert!(job.snapshot().result.is_none());

        job.apply(&JobUpdate::completed(json!({"verdict": "clean"})));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.result, Some(json!({"verdict": "clean"})));
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_snapshot_of_failed_job() {
        let mut job = Job::new("h", 1).with_max_attempts(1);
        job.attempts = 1;
        job.apply(&JobUpdate::dead("boom"));

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.max_attempts, 1);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
        assert!(snapshot.result.is_none());
    }
}
