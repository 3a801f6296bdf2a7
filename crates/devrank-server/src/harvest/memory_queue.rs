//! In-process [`HarvestQueue`] with the same semantics as the Postgres one

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::jobs::{retry_delay, EnqueueOutcome, FailureOutcome, HarvestJob, JobStatus, QueueMetrics};
use super::queue::{HarvestQueue, QueueError};
use devrank_common::HarvestRequest;

#[derive(Clone)]
pub struct MemoryHarvestQueue {
    jobs: Arc<Mutex<Vec<HarvestJob>>>,
    max_attempts: i32,
    retry_base: Duration,
}

impl MemoryHarvestQueue {
    pub fn new(max_attempts: i32, retry_base: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            max_attempts,
            retry_base,
        }
    }

    /// Snapshot of every job, oldest first
    pub async fn jobs(&self) -> Vec<HarvestJob> {
        self.jobs.lock().await.clone()
    }
}

/// The job if it is active and held by `worker_id`
fn owned<'a>(jobs: &'a mut [HarvestJob], job_id: Uuid, worker_id: &str) -> Option<&'a mut HarvestJob> {
    jobs.iter_mut().find(|job| {
        job.id == job_id
            && job.status == JobStatus::Active
            && job.locked_by.as_deref() == Some(worker_id)
    })
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[async_trait]
impl HarvestQueue for MemoryHarvestQueue {
    async fn enqueue(&self, request: &HarvestRequest) -> Result<EnqueueOutcome, QueueError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(open) = jobs.iter().find(|job| {
            job.subject == request.subject
                && matches!(job.status, JobStatus::Queued | JobStatus::Active)
        }) {
            return Ok(EnqueueOutcome {
                job_id: open.id,
                duplicate: true,
            });
        }

        let now = Utc::now();
        let job = HarvestJob {
            id: Uuid::new_v4(),
            subject: request.subject.clone(),
            kind: request.kind,
            idempotency_key: request.idempotency_key(),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: self.max_attempts,
            progress: 0,
            run_at: now,
            locked_by: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let job_id = job.id;
        jobs.push(job);

        Ok(EnqueueOutcome {
            job_id,
            duplicate: false,
        })
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<HarvestJob>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let next = jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Queued && job.run_at <= now)
            .min_by_key(|job| (job.run_at, job.created_at));

        Ok(next.map(|job| {
            job.status = JobStatus::Active;
            job.attempts += 1;
            job.progress = 0;
            job.locked_by = Some(worker_id.to_string());
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.lock().await;
        match owned(&mut jobs, job_id, worker_id) {
            Some(job) => {
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn report_progress(&self, job_id: Uuid, worker_id: &str, progress: i32) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = owned(&mut jobs, job_id, worker_id) {
            job.progress = progress.clamp(0, 100);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = owned(&mut jobs, job_id, worker_id).ok_or(QueueError::NotActive(job_id))?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.locked_by = None;
        job.last_error = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = owned(&mut jobs, job_id, worker_id).ok_or(QueueError::NotActive(job_id))?;

        let now = Utc::now();
        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.updated_at = now;

        if retryable && job.attempts < job.max_attempts {
            job.status = JobStatus::Queued;
            job.run_at = now + chrono_delay(retry_delay(self.retry_base, job.attempts));
            Ok(FailureOutcome::Retrying {
                attempt: job.attempts,
                run_at: job.run_at,
            })
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            Ok(FailureOutcome::Failed {
                attempt: job.attempts,
            })
        }
    }

    async fn reclaim_stale(&self, timeout: Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = now - chrono_delay(timeout);
        let mut jobs = self.jobs.lock().await;
        let mut reclaimed = 0;

        for job in jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Active && job.updated_at <= cutoff)
        {
            job.status = if job.attempts >= job.max_attempts {
                job.completed_at = Some(now);
                JobStatus::Failed
            } else {
                JobStatus::Queued
            };
            job.last_error = Some("worker timed out".to_string());
            job.locked_by = None;
            job.updated_at = now;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<HarvestJob>, QueueError> {
        Ok(self.jobs.lock().await.iter().find(|job| job.id == job_id).cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<HarvestJob>, QueueError> {
        let jobs = self.jobs.lock().await;
        let mut selected: Vec<HarvestJob> = jobs
            .iter()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        selected.truncate(limit.max(0) as usize);
        Ok(selected)
    }

    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let now = Utc::now();
        let jobs = self.jobs.lock().await;
        let mut metrics = QueueMetrics::default();

        for job in jobs.iter() {
            match job.status {
                JobStatus::Queued if job.run_at > now => metrics.delayed += 1,
                JobStatus::Queued => metrics.queued += 1,
                JobStatus::Active => metrics.active += 1,
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
            }
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devrank_common::JobKind;

    fn request(subject: &str, kind: JobKind) -> HarvestRequest {
        HarvestRequest::new(subject.parse().unwrap(), kind)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_per_subject() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);

        let first = queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();
        let second = queue.enqueue(&request("Octocat", JobKind::Full)).await.unwrap();
        let refresh = queue.enqueue(&request("octocat", JobKind::Refresh)).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate && refresh.duplicate);
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(queue.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_job_allowed_after_completion() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
        let first = queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();

        let job = queue.claim("host:worker-0").await.unwrap().unwrap();
        // Still open while active
        assert!(queue.enqueue(&request("octocat", JobKind::Refresh)).await.unwrap().duplicate);
        queue.complete(job.id, "host:worker-0").await.unwrap();

        let next = queue.enqueue(&request("octocat", JobKind::Refresh)).await.unwrap();
        assert!(!next.duplicate);
        assert_ne!(next.job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_retry_until_ceiling() {
        let queue = MemoryHarvestQueue::new(2, Duration::ZERO);
        queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();

        let job = queue.claim("w").await.unwrap().unwrap();
        let first = queue.fail(job.id, "w", "502", true).await.unwrap();
        assert!(matches!(first, FailureOutcome::Retrying { attempt: 1, .. }));

        let job = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        let second = queue.fail(job.id, "w", "502", true).await.unwrap();
        assert_eq!(second, FailureOutcome::Failed { attempt: 2 });

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("502"));
        assert_eq!(queue.metrics().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_skips_retries() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
        queue.enqueue(&request("ghost", JobKind::Full)).await.unwrap();
        let job = queue.claim("w").await.unwrap().unwrap();

        let outcome = queue.fail(job.id, "w", "not found", false).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Failed { attempt: 1 });
        assert!(queue.claim("w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backoff_delays_retry() {
        let queue = MemoryHarvestQueue::new(3, Duration::from_secs(60));
        queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();
        let job = queue.claim("w").await.unwrap().unwrap();
        queue.fail(job.id, "w", "timeout", true).await.unwrap();

        assert!(queue.claim("w").await.unwrap().is_none());
        let metrics = queue.metrics().await.unwrap();
        assert_eq!((metrics.queued, metrics.delayed), (0, 1));
    }

    #[tokio::test]
    async fn test_reclaim_stale_active_jobs() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
        queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();
        queue.claim("w").await.unwrap().unwrap();

        assert_eq!(queue.reclaim_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.reclaim_stale(Duration::ZERO).await.unwrap(), 1);
        assert!(queue.claim("w").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaimed_job_belongs_to_new_worker() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
        queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();

        let first = queue.claim("host:worker-0").await.unwrap().unwrap();
        queue.reclaim_stale(Duration::ZERO).await.unwrap();
        let second = queue.claim("host:worker-1").await.unwrap().unwrap();
        assert_eq!((second.id, second.attempts), (first.id, 2));

        // The original worker has lost the job and cannot settle it
        assert!(!queue.heartbeat(first.id, "host:worker-0").await.unwrap());
        queue.report_progress(first.id, "host:worker-0", 90).await.unwrap();
        assert!(matches!(
            queue.complete(first.id, "host:worker-0").await,
            Err(QueueError::NotActive(_))
        ));
        assert!(matches!(
            queue.fail(first.id, "host:worker-0", "late", true).await,
            Err(QueueError::NotActive(_))
        ));

        let job = queue.get(first.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, 0);
        assert_eq!(job.locked_by.as_deref(), Some("host:worker-1"));

        queue.complete(first.id, "host:worker-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_job_from_reclaim() {
        let queue = MemoryHarvestQueue::new(3, Duration::ZERO);
        queue.enqueue(&request("octocat", JobKind::Full)).await.unwrap();
        let job = queue.claim("w").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(queue.heartbeat(job.id, "w").await.unwrap());
        assert_eq!(queue.reclaim_stale(Duration::from_millis(50)).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.reclaim_stale(Duration::from_millis(50)).await.unwrap(), 1);
    }
}
