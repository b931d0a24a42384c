//! Durable job queue and retry engine for offloading slow analysis work.
//!
//! A request handler submits a job by reference (a fingerprint of its input
//! plus metadata) and returns immediately. A worker loop later pops the job,
//! runs an [`Analyzer`] on it and records the outcome. Failed attempts are
//! retried with capped exponential backoff until the job runs out of
//! attempts, at which point it is dead-lettered as `failed`.
//!
//! Provides:
//! - Redis-backed persistence, with an in-memory backend for tests
//! - Job records that expire a fixed time after their latest write
//! - Capped exponential backoff with optional jitter
//! - Atomic release of due retries, safe under concurrent workers
//! - Optional visibility-timeout leases for crash recovery
//! - Pluggable monitoring through [`Observer`]
//!
//! ## Backoff
//!
//! ```
//! use offload_queue::compute_backoff;
//!
//! assert_eq!(compute_backoff(1, 1_000, 30_000), 1_000);
//! assert_eq!(compute_backoff(4, 1_000, 30_000), 8_000);
//! assert_eq!(compute_backoff(10, 1_000, 30_000), 30_000);
//! ```
//!
//! ## Submitting and Processing
//!
//! ```
//! use offload_queue::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = Queue::new(Arc::new(MemoryBackend::new()), QueueConfig::new("scans"));
//!
//! let id = queue.submit("abc123", 50, None).await.unwrap();
//! assert_eq!(
//!     queue.get_status(&id.to_string()).await.unwrap().status,
//!     JobStatus::Pending
//! );
//!
//! let worker = Worker::new(queue.clone(), |request: AnalysisRequest| async move {
//!     Ok(serde_json::json!({ "hash": request.correlation_hash, "verdict": "clean" }))
//! });
//! worker.tick().await;
//!
//! let snapshot = queue.get_status(&id.to_string()).await.unwrap();
//! assert_eq!(snapshot.status, JobStatus::Completed);
//! assert_eq!(snapshot.attempts, 1);
//! assert!(snapshot.result.is_some());
//! # }
//! ```
//!
//! ## Redis
//!
//! ```no_run
//! use offload_queue::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let queue = Queue::connect(&RedisConfig::from_env()?, QueueConfig::from_env()?).await?;
//!
//!     let mut worker = Worker::new(queue, |_request: AnalysisRequest| async move {
//!         Ok(serde_json::json!({ "verdict": "clean" }))
//!     })
//!     .with_config(WorkerConfig::from_env()?)
//!     .with_observer(LogObserver);
//!
//!     worker.start().await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     worker.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod backend;
pub mod backoff;
pub mod config;
pub mod error;
pub mod job;
pub mod lease;
pub mod memory;
pub mod observer;
pub mod pending;
pub mod queue;
pub mod redis_backend;
pub mod schedule;
pub mod store;
pub mod worker;

pub use analyzer::{AnalysisRequest, AnalysisResult, Analyzer};
pub use backend::Backend;
pub use backoff::{BackoffPolicy, compute_backoff};
pub use config::{QueueConfig, RedisConfig};
pub use error::{AnalysisError, QueueError, QueueResult};
pub use job::{Job, JobId, JobSnapshot, JobStatus, JobUpdate, Metadata};
pub use lease::LeaseSet;
pub use memory::MemoryBackend;
pub use observer::{JobEvent, LogObserver, NoopObserver, Observer};
pub use pending::PendingQueue;
pub use queue::{Queue, QueueStats};
pub use redis_backend::RedisBackend;
pub use schedule::RetrySchedule;
pub use store::JobStore;
pub use worker::{TickOutcome, Worker, WorkerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analyzer::{AnalysisRequest, AnalysisResult, Analyzer};
    pub use crate::error::{AnalysisError, QueueError, QueueResult};
    pub use crate::job::{Job, JobId, JobSnapshot, JobStatus, Metadata};
    pub use crate::observer::{JobEvent, LogObserver, Observer};
    pub use crate::queue::{Queue, QueueStats};
    pub use crate::worker::{TickOutcome, Worker, WorkerConfig};
    pub use crate::{MemoryBackend, QueueConfig, RedisConfig};
}
