//! Bounded worker pool draining the harvest queue
//!
//! Each worker claims one job at a time and runs it to completion; shutdown is
//! only observed between jobs, so in-flight harvests finish before the pool
//! exits. While a job runs its worker heartbeats the row, and a separate task
//! returns jobs whose heartbeat stopped to the queue. A worker that loses its
//! job to that task abandons it without settling it. Panicked workers are
//! replaced.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::jobs::{FailureOutcome, HarvestJob};
use super::queue::HarvestQueue;
use super::HarvestError;
use crate::config::HarvestConfig;

/// Runs one claimed job
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &HarvestJob, progress: &ProgressReporter) -> Result<(), HarvestError>;
}

/// Lets a handler publish 0-100 progress for its job
#[derive(Clone)]
pub struct ProgressReporter {
    queue: Arc<dyn HarvestQueue>,
    job_id: Uuid,
    worker_id: String,
}

impl ProgressReporter {
    pub fn new(queue: Arc<dyn HarvestQueue>, job_id: Uuid, worker_id: impl Into<String>) -> Self {
        Self {
            queue,
            job_id,
            worker_id: worker_id.into(),
        }
    }

    /// Best effort; a lost progress update never fails the job
    pub async fn report(&self, progress: i32) {
        if let Err(e) = self.queue.report_progress(self.job_id, &self.worker_id, progress).await {
            tracing::warn!(job_id = %self.job_id, progress, error = %e, "Failed to record job progress");
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub stale_job_timeout: Duration,
}

impl From<&HarvestConfig> for WorkerPoolConfig {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            workers: config.workers,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            stale_job_timeout: Duration::from_secs(config.stale_job_timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn HarvestQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    hostname: String,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn HarvestQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    fn worker_id(&self, index: usize) -> String {
        format!("{}:worker-{}", self.hostname, index)
    }

    /// Claim and run one due job; returns whether a job was found
    pub async fn run_once(&self, worker_id: &str) -> Result<bool, super::QueueError> {
        let Some(job) = self.queue.claim(worker_id).await? else {
            return Ok(false);
        };
        self.process(job, worker_id).await;
        Ok(true)
    }

    /// Run jobs until none is due; returns how many ran
    pub async fn drain(&self) -> Result<usize, super::QueueError> {
        let worker_id = self.worker_id(0);
        let mut ran = 0;
        while self.run_once(&worker_id).await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Heartbeats land well inside the stale timeout
    fn heartbeat_period(&self) -> Duration {
        (self.config.stale_job_timeout / 3).max(Duration::from_millis(10))
    }

    /// Run the handler while keeping the job row alive; `None` when the job
    /// was reclaimed from this worker before the handler finished
    async fn run_with_heartbeat(
        &self,
        job: &HarvestJob,
        worker_id: &str,
        reporter: &ProgressReporter,
    ) -> Option<Result<(), HarvestError>> {
        let work = self.handler.handle(job, reporter);
        tokio::pin!(work);

        let period = self.heartbeat_period();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => return Some(result),
                _ = heartbeat.tick() => match self.queue.heartbeat(job.id, worker_id).await {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => tracing::warn!(error = %e, "Failed to record job heartbeat"),
                },
            }
        }
    }

    async fn process(&self, job: HarvestJob, worker_id: &str) {
        let span = tracing::info_span!(
            "harvest_job",
            job_id = %job.id,
            subject = %job.subject,
            kind = %job.kind,
            attempt = job.attempts
        );

        async {
            tracing::info!("Harvest job started");
            let reporter = ProgressReporter::new(self.queue.clone(), job.id, worker_id);

            match self.run_with_heartbeat(&job, worker_id, &reporter).await {
                None => tracing::warn!("Harvest job was reclaimed from this worker, abandoning it"),
                Some(Ok(())) => match self.queue.complete(job.id, worker_id).await {
                    Ok(()) => tracing::info!("Harvest job completed"),
                    Err(e) => tracing::error!(error = %e, "Failed to mark job completed"),
                },
                Some(Err(err)) => {
                    let retryable = err.is_retryable();
                    match self.queue.fail(job.id, worker_id, &err.to_string(), retryable).await {
                        Ok(FailureOutcome::Retrying { .. }) | Ok(FailureOutcome::Failed { .. }) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to record job failure"),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_worker(self, index: usize, shutdown: CancellationToken) {
        let worker_id = self.worker_id(index);
        tracing::debug!(worker = %worker_id, "Harvest worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.run_once(&worker_id).await {
                Ok(found) => !found,
                Err(e) => {
                    tracing::error!(worker = %worker_id, error = %e, "Failed to claim harvest job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::debug!(worker = %worker_id, "Harvest worker stopped");
    }

    /// Keep worker `index` running, replacing it if it panics
    async fn supervise_worker(self, index: usize, shutdown: CancellationToken) {
        loop {
            let worker = tokio::spawn(self.clone().run_worker(index, shutdown.clone()));
            match worker.await {
                Ok(()) => break,
                Err(e) if e.is_panic() && !shutdown.is_cancelled() => {
                    tracing::error!(worker = %self.worker_id(index), error = %e, "Harvest worker panicked, restarting it");
                }
                Err(e) => {
                    tracing::error!(worker = %self.worker_id(index), error = %e, "Harvest worker stopped abnormally");
                    break;
                }
            }
        }
    }

    async fn run_reclaimer(self, shutdown: CancellationToken) {
        let period = (self.config.stale_job_timeout / 4).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.reclaim_stale(self.config.stale_job_timeout).await {
                        tracing::error!(error = %e, "Failed to reclaim stale harvest jobs");
                    }
                }
            }
        }
    }

    /// Start the workers and the reclaimer; the handle resolves once all of
    /// them have stopped after `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for index in 0..self.config.workers {
                tasks.spawn(self.clone().supervise_worker(index, shutdown.clone()));
            }
            tasks.spawn(self.clone().run_reclaimer(shutdown.clone()));

            tracing::info!(workers = self.config.workers, "Harvest worker pool started");

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Harvest worker task panicked");
                }
            }

            tracing::info!("Harvest worker pool stopped");
        })
    }
}
