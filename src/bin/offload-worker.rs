//! Offload worker - drains the analysis job queue.
//!
//! Configuration comes entirely from the environment:
//!
//! - `OFFLOAD_REDIS_URL` (or `REDIS_URL`) - backing store
//! - `OFFLOAD_QUEUE_NAME`, `OFFLOAD_KEY_PREFIX`, `OFFLOAD_MAX_ATTEMPTS`,
//!   `OFFLOAD_JOB_TTL_SECONDS` - queue settings
//! - `OFFLOAD_BACKOFF_BASE_MS`, `OFFLOAD_BACKOFF_CAP_MS`,
//!   `OFFLOAD_BACKOFF_JITTER` - retry delays
//! - `OFFLOAD_CONCURRENCY`, `OFFLOAD_IDLE_POLL_DELAY_MS`,
//!   `OFFLOAD_JOB_TIMEOUT_MS`, `OFFLOAD_LEASE_TIMEOUT_MS`,
//!   `OFFLOAD_SHUTDOWN_GRACE_MS` - worker settings
//! - `OFFLOAD_DEBUG`, `OFFLOAD_LOG_LEVEL`, `OFFLOAD_LOG_FORMAT` - logging

use offload::logging::{self, LogConfig};
use offload::{
    EchoAnalyzer, LogObserver, Queue, QueueConfig, QueueResult, RedisConfig, Worker, WorkerConfig,
};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init(&LogConfig::from_env()) {
        eprintln!("failed to initialize logging: {}", e);
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> QueueResult<()> {
    let redis = RedisConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;

    let queue = Queue::connect(&redis, queue_config).await?;
    let mut worker = Worker::new(queue, EchoAnalyzer)
        .with_config(worker_config)
        .with_observer(LogObserver);

    worker.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    worker.stop().await
}
