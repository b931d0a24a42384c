//! Worker loop that drains the queue and drives jobs through their lifecycle.

use crate::analyzer::{AnalysisRequest, AnalysisResult, Analyzer};
use crate::config::parse_var;
use crate::error::{AnalysisError, QueueError, QueueResult};
use crate::job::{Job, JobId, JobUpdate};
use crate::observer::{JobEvent, NoopObserver, Observer};
use crate::queue::Queue;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error recorded when a reclaimed job has no attempts left to run.
pub const EXHAUSTED_MESSAGE: &str = "attempts exhausted before completion";

/// Worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Number of independent loops `start` spawns
    pub concurrency: usize,

    /// Sleep after an idle or degraded tick
    pub idle_poll_delay: Duration,

    /// Limit on one analysis call; `None` waits indefinitely
    pub job_timeout: Option<Duration>,

    /// Visibility timeout for popped jobs; `None` disables leasing
    pub lease_timeout: Option<Duration>,

    /// How long `stop` waits for in-flight ticks before aborting them
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_poll_delay: Duration::from_secs(1),
            job_timeout: None,
            lease_timeout: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_idle_poll_delay(mut self, delay: Duration) -> Self {
        self.idle_poll_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Load from `OFFLOAD_*` environment variables, falling back to defaults.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::default();

        if let Some(concurrency) = parse_var(&lookup, "OFFLOAD_CONCURRENCY")? {
            config.concurrency = concurrency;
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_IDLE_POLL_DELAY_MS")? {
            config.idle_poll_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_JOB_TIMEOUT_MS")? {
            config.job_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_LEASE_TIMEOUT_MS")? {
            config.lease_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var(&lookup, "OFFLOAD_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker cannot honor.
    pub fn validate(&self) -> QueueResult<()> {
        if self.concurrency == 0 {
            return Err(QueueError::Config("concurrency must be at least 1".to_string()));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::Config("job_timeout must be non-zero".to_string()));
        }
        if self.lease_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::Config("lease_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// What a single worker iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was runnable
    Idle,
    /// A popped id had no record behind it (expired or never written)
    Missing(JobId),
    /// A popped job was already terminal and was left untouched
    Skipped(JobId),
    /// Analysis succeeded
    Completed { id: JobId, attempts: u32 },
    /// Analysis failed and the job was parked for another attempt
    Retrying {
        id: JobId,
        attempt: u32,
        delay: Duration,
    },
    /// Attempts exhausted; the job is now failed
    DeadLettered { id: JobId, attempts: u32 },
    /// The backing store failed and the iteration was abandoned
    Degraded(String),
}

impl TickOutcome {
    /// Job the iteration dealt with, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle | Self::Degraded(_) => None,
            Self::Missing(id)
            | Self::Skipped(id)
            | Self::Completed { id, .. }
            | Self::Retrying { id, .. }
            | Self::DeadLettered { id, .. } => Some(*id),
        }
    }

    /// Whether the caller should back off before the next tick.
    pub fn should_pause(&self) -> bool {
        matches!(self, Self::Idle | Self::Degraded(_))
    }
}

/// Worker for processing analysis jobs from a queue.
///
/// Each loop is sequential; concurrent loops, in this process or others,
/// coordinate only through the atomic pop and release primitives.
pub struct Worker {
    queue: Queue,
    analyzer: Arc<dyn Analyzer>,
    observer: Arc<dyn Observer>,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Create a worker with the default configuration and no observer.
    ///
    /// # Examples
    ///
    /// ```
    /// use offload_queue::*;
    /// use std::sync::Arc;
    ///
    /// # async fn example() {
    /// let queue = Queue::new(Arc::new(MemoryBackend::new()), QueueConfig::default());
    /// let worker = Worker::new(queue.clone(), |request: AnalysisRequest| async move {
    ///     Ok(serde_json::json!({ "hash": request.correlation_hash }))
    /// });
    ///
    /// let id = queue.submit("abc123", 50, None).await.unwrap();
    /// assert_eq!(
    ///     worker.tick().await,
    ///     TickOutcome::Completed { id, attempts: 1 }
    /// );
    /// # }
    /// ```
    pub fn new(queue: Queue, analyzer: impl Analyzer + 'static) -> Self {
        Self::with_shared_analyzer(queue, Arc::new(analyzer))
    }

    /// Create a worker around an analyzer that is shared elsewhere.
    pub fn with_shared_analyzer(queue: Queue, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            queue,
            analyzer,
            observer: Arc::new(NoopObserver),
            config: WorkerConfig::default(),
            running: Arc::new(RwLock::new(false)),
            shutdown: None,
            handles: Vec::new(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a monitoring observer.
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Run one iteration of the loop.
    ///
    /// Never fails: a backing-store error abandons the iteration and is
    /// reported as [`TickOutcome::Degraded`].
    pub async fn tick(&self) -> TickOutcome {
        match self.try_tick().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Worker iteration abandoned");
                TickOutcome::Degraded(e.to_string())
            }
        }
    }

    async fn try_tick(&self) -> QueueResult<TickOutcome> {
        self.queue.retries().release_due().await?;

        let popped = match self.config.lease_timeout {
            Some(timeout) => {
                self.queue.leases().reclaim_expired().await?;
                self.queue.leases().claim(timeout).await?
            }
            None => self.queue.pending().pop().await?,
        };
        let Some(id) = popped else {
            return Ok(TickOutcome::Idle);
        };
        debug!(job_id = %id, "Popped job");

        let outcome = self.process(id).await?;

        // Degraded iterations keep their lease so the job is reclaimed later.
        if self.config.lease_timeout.is_some() {
            self.queue.leases().release(id).await?;
        }
        Ok(outcome)
    }

    async fn process(&self, id: JobId) -> QueueResult<TickOutcome> {
        let store = self.queue.store();

        let job = match store.get(id).await {
            Ok(job) => job,
            Err(QueueError::Deserialization(e)) => {
                warn!(job_id = %id, error = %e, "Discarding unreadable job record");
                return Ok(TickOutcome::Missing(id));
            }
            Err(e) => return Err(e),
        };
        let Some(job) = job else {
            debug!(job_id = %id, "Popped job has no record");
            return Ok(TickOutcome::Missing(id));
        };

        if job.is_terminal() {
            debug!(job_id = %id, status = %job.status, "Skipping terminal job");
            return Ok(TickOutcome::Skipped(id));
        }

        if job.attempts >= job.max_attempts {
            return self.dead_letter(&job, job.attempts, EXHAUSTED_MESSAGE).await;
        }

        let attempt = job.attempts + 1;
        if !store
            .update(id, &JobUpdate::processing(attempt, Utc::now()))
            .await?
        {
            return Ok(TickOutcome::Missing(id));
        }
        self.observer
            .record_event(&JobEvent::PickedUp { id, attempt });

        let request = AnalysisRequest {
            job_id: id,
            correlation_hash: job.correlation_hash.clone(),
            metadata: job.metadata.clone(),
            attempt,
        };

        match self.analyze(request).await {
            Ok(result) => {
                if !store.update(id, &JobUpdate::completed(result)).await? {
                    return Ok(TickOutcome::Missing(id));
                }
                self.observer.record_event(&JobEvent::Completed {
                    id,
                    attempts: attempt,
                });
                Ok(TickOutcome::Completed {
                    id,
                    attempts: attempt,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.observer.record_failure(id, attempt, &message);

                if attempt >= job.max_attempts {
                    return self.dead_letter(&job, attempt, &message).await;
                }

                if !store.update(id, &JobUpdate::retry(message)).await? {
                    return Ok(TickOutcome::Missing(id));
                }
                let delay = self.queue.config().backoff.delay_for(attempt);
                self.queue.retries().schedule(id, delay).await?;

                self.observer
                    .record_event(&JobEvent::Retried { id, attempt, delay });
                Ok(TickOutcome::Retrying { id, attempt, delay })
            }
        }
    }

    async fn dead_letter(&self, job: &Job, attempts: u32, message: &str) -> QueueResult<TickOutcome> {
        let id = job.id;
        if !self.queue.store().update(id, &JobUpdate::dead(message)).await? {
            return Ok(TickOutcome::Missing(id));
        }
        self.observer
            .record_event(&JobEvent::DeadLettered { id, attempts });
        Ok(TickOutcome::DeadLettered { id, attempts })
    }

    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        let Some(limit) = self.config.job_timeout else {
            return self.analyzer.analyze(request).await;
        };

        match tokio::time::timeout(limit, self.analyzer.analyze(request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::new(format!(
                "analysis timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Loop over [`Worker::tick`] until `shutdown` turns true or its
    /// sender is dropped.
    ///
    /// The signal is observed between iterations and while sleeping, never
    /// during an analysis call.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let outcome = self.tick().await;
            if !outcome.should_pause() {
                continue;
            }

            let closed = tokio::select! {
                _ = tokio::time::sleep(self.config.idle_poll_delay) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if closed {
                break;
            }
        }
    }

    /// Spawn `concurrency` loops in the background.
    pub async fn start(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        *running = true;
        drop(running);

        info!(
            queue = %self.queue.config().queue_name,
            concurrency = self.config.concurrency,
            leasing = self.config.lease_timeout.is_some(),
            "Starting worker"
        );

        let (tx, rx) = watch::channel(false);
        for index in 0..self.config.concurrency {
            let worker = self.loop_handle();
            let shutdown = rx.clone();
            self.handles.push(tokio::spawn(async move {
                worker.run(shutdown).await;
                debug!(worker = index, "Worker loop stopped");
            }));
        }
        self.shutdown = Some(tx);

        Ok(())
    }

    /// Signal every loop to stop and wait for them.
    ///
    /// Loops still busy after the configured grace period are aborted.
    pub async fn stop(&mut self) -> QueueResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(QueueError::WorkerNotRunning);
        }
        *running = false;
        drop(running);

        info!("Stopping worker...");
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for mut handle in self.handles.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!("Worker loop did not finish in time; aborting");
                handle.abort();
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Check if the worker is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn loop_handle(&self) -> Worker {
        Worker {
            queue: self.queue.clone(),
            analyzer: self.analyzer.clone(),
            observer: self.observer.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            shutdown: None,
            handles: Vec::new(),
        }
    }
}
