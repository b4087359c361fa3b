//! Worker pool draining the SQLite job queue.
//!
//! Jobs are fetched in batches and run concurrently up to the configured
//! limit. Failed deliveries are retried by the queue with backoff; when an
//! episode job is dead-lettered its Episode is marked FAILED so the Run can
//! still aggregate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use ux_config::UxConfig;
use ux_core::{Job, QueueError};

use crate::aggregator::Aggregator;
use crate::engine::StepEngine;
use crate::work_queue::{FailOutcome, QueuedJob, SqliteJobQueue};

/// Events that can be sent to a spawned pool.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Process a batch now instead of waiting for the next tick.
    Poke,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            concurrency: 4,
            batch_size: 32,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &UxConfig) -> Self {
        WorkerConfig {
            concurrency: config.concurrency(),
            batch_size: config.batch_size(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Handle to a spawned pool.
pub struct WorkerHandle {
    sender: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    pub async fn send(&self, event: WorkerEvent) -> Result<(), QueueError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to send worker event: {}", e)))
    }

    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.send(WorkerEvent::Shutdown).await
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<SqliteJobQueue>,
    engine: Arc<StepEngine>,
    aggregator: Arc<Aggregator>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<SqliteJobQueue>,
        engine: Arc<StepEngine>,
        aggregator: Arc<Aggregator>,
        config: WorkerConfig,
    ) -> Self {
        WorkerPool {
            queue,
            engine,
            aggregator,
            config,
        }
    }

    /// Spawn the pool as a background task.
    ///
    /// Jobs left in "processing" by a previous process are recovered first.
    pub fn spawn(self, buffer_size: usize) -> (WorkerHandle, tokio::task::JoinHandle<()>) {
        match self.queue.recover_stuck() {
            Ok(n) if n > 0 => info!("Recovered {} stuck jobs from previous run", n),
            Ok(_) => {}
            Err(e) => warn!("Failed to recover stuck jobs: {}", e),
        }

        let (tx, rx) = mpsc::channel(buffer_size);
        let handle = tokio::spawn(self.run(rx));
        (WorkerHandle { sender: tx }, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<WorkerEvent>) {
        info!(concurrency = self.config.concurrency, "Worker pool started");

        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(WorkerEvent::Poke) => {
                            self.process_batch().await;
                        }
                        Some(WorkerEvent::Shutdown) | None => {
                            info!("Worker pool shutting down");
                            self.process_batch().await;
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.process_batch().await;
                }
            }
        }

        info!("Worker pool stopped");
    }

    /// Process batches until the queue is empty.
    ///
    /// Jobs waiting on a retry backoff are waited for, one poll interval at a
    /// time. Returns the number of deliveries made.
    pub async fn run_until_idle(&self) -> Result<usize, QueueError> {
        let mut delivered = 0;
        loop {
            let processed = self.process_batch().await;
            delivered += processed;
            if self.queue.queue_size()? == 0 {
                break;
            }
            if processed == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
        debug!(delivered, "Queue drained");
        Ok(delivered)
    }

    /// Fetch one batch and run it to completion. Returns the batch size.
    pub async fn process_batch(&self) -> usize {
        let jobs = match self.queue.fetch_ready(self.config.batch_size) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to fetch ready jobs: {}", e);
                return 0;
            }
        };
        let count = jobs.len();

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for queued in jobs {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let pool = self.clone();
            tasks.spawn(async move {
                pool.deliver(queued).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task panicked: {}", e);
            }
        }
        count
    }

    async fn deliver(&self, queued: QueuedJob) {
        let queue = queued.job.queue().as_str();
        debug!(job_id = queued.id, queue, attempt = queued.attempts + 1, "Delivering job");

        let result = match &queued.job {
            Job::SimulateEpisode { .. } | Job::SimulateAgentEpisode { .. } => self
                .engine
                .run_episode(&queued.job)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Job::AggregateReport { run_id } => self
                .aggregator
                .aggregate(*run_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(queued.id) {
                    error!(job_id = queued.id, "Failed to complete job: {}", e);
                }
            }
            Err(message) => {
                warn!(job_id = queued.id, queue, error = %message, "Job failed");
                match self.queue.fail(queued.id, &message) {
                    Ok(FailOutcome::DeadLettered { attempts }) => {
                        self.on_dead_letter(&queued.job, attempts).await;
                    }
                    Ok(FailOutcome::Retrying { .. }) => {}
                    Err(e) => error!(job_id = queued.id, "Failed to mark job failed: {}", e),
                }
            }
        }
    }

    async fn on_dead_letter(&self, job: &Job, attempts: u32) {
        match job.episode_id() {
            Some(episode_id) => {
                warn!(%episode_id, attempts, "Episode job dead-lettered, failing episode");
                if let Err(e) = self.engine.fail_episode(episode_id).await {
                    error!(%episode_id, "Failed to mark episode failed: {}", e);
                }
            }
            None => {
                // Run stays SIMULATING until aggregation is retried by hand.
                error!(run_id = %job.run_id(), attempts, "Aggregation dead-lettered");
            }
        }
    }
}
