//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Backing store unreachable or refused the command
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Worker not running
    #[error("Worker not running")]
    WorkerNotRunning,

    /// Worker already running
    #[error("Worker already running")]
    WorkerAlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Whether this error means the backing store could not be reached.
    ///
    /// Callers treat this as "feature degraded" rather than a hard failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failure reported by an analyzer.
///
/// The display form is exactly the message, so it can be stored verbatim
/// as a job's `last_error` or terminal `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AnalysisError {
    message: String,
}

impl AnalysisError {
    /// Create an analysis error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for AnalysisError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for AnalysisError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
