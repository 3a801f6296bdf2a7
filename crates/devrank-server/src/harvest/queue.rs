//! Durable harvest queue on Postgres
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of workers across any
//! number of instances can poll the same table. A unique partial index keeps
//! at most one queued-or-active job per subject.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::jobs::{
    EnqueueOutcome, FailureOutcome, HarvestJob, HarvestJobRow, JobStatus, QueueMetrics,
};
use devrank_common::{DevrankError, HarvestRequest};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(#[from] DevrankError),

    #[error("Harvest job {0} is not active for this worker")]
    NotActive(Uuid),
}

#[async_trait]
pub trait HarvestQueue: Send + Sync {
    /// Add a job unless one is already open for the subject
    async fn enqueue(&self, request: &HarvestRequest) -> Result<EnqueueOutcome, QueueError>;

    /// Take the oldest due job, marking it active for `worker_id`
    async fn claim(&self, worker_id: &str) -> Result<Option<HarvestJob>, QueueError>;

    /// Mark a running job alive; returns false once `worker_id` no longer
    /// holds it
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool, QueueError>;

    async fn report_progress(&self, job_id: Uuid, worker_id: &str, progress: i32) -> Result<(), QueueError>;

    async fn complete(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    /// Record a failed attempt; retryable failures under the attempt ceiling
    /// go back to `queued` behind an exponential delay
    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, QueueError>;

    /// Return jobs `active` with no heartbeat or progress for longer than
    /// `timeout` to the queue
    async fn reclaim_stale(&self, timeout: Duration) -> Result<u64, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<HarvestJob>, QueueError>;

    /// Most recent jobs, optionally filtered by status
    async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<HarvestJob>, QueueError>;

    async fn metrics(&self) -> Result<QueueMetrics, QueueError>;
}

const JOB_COLUMNS: &str = "id, subject_key, kind, idempotency_key, status, attempts, max_attempts, \
     progress, run_at, locked_by, last_error, created_at, updated_at, completed_at";

/// Enqueue can race a job finishing between the conflicting insert and the
/// lookup; retry a few times before giving up
const ENQUEUE_RETRIES: usize = 3;

#[derive(Clone)]
pub struct PgHarvestQueue {
    pool: PgPool,
    max_attempts: i32,
    retry_base: Duration,
}

impl PgHarvestQueue {
    pub fn new(pool: PgPool, max_attempts: i32, retry_base: Duration) -> Self {
        Self {
            pool,
            max_attempts,
            retry_base,
        }
    }
}

#[async_trait]
impl HarvestQueue for PgHarvestQueue {
    async fn enqueue(&self, request: &HarvestRequest) -> Result<EnqueueOutcome, QueueError> {
        for _ in 0..ENQUEUE_RETRIES {
            let inserted: Option<(Uuid,)> = sqlx::query_as(
                r#"
                INSERT INTO harvest_jobs (id, subject_key, kind, idempotency_key, max_attempts)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (subject_key) WHERE status IN ('queued', 'active') DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(request.subject.as_str())
            .bind(request.kind.as_str())
            .bind(request.idempotency_key())
            .bind(self.max_attempts)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((job_id,)) = inserted {
                tracing::info!(job_id = %job_id, subject = %request.subject, kind = %request.kind, "Harvest job enqueued");
                return Ok(EnqueueOutcome {
                    job_id,
                    duplicate: false,
                });
            }

            let existing: Option<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM harvest_jobs
                WHERE subject_key = $1 AND status IN ('queued', 'active')
                "#,
            )
            .bind(request.subject.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some((job_id,)) = existing {
                tracing::debug!(job_id = %job_id, subject = %request.subject, "Harvest already pending");
                return Ok(EnqueueOutcome {
                    job_id,
                    duplicate: true,
                });
            }
        }

        Err(QueueError::Database(sqlx::Error::Protocol(format!(
            "could not enqueue or find an open job for '{}'",
            request.subject
        ))))
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<HarvestJob>, QueueError> {
        let row: Option<HarvestJobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE harvest_jobs
            SET status = 'active',
                attempts = attempts + 1,
                progress = 0,
                locked_by = $1,
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM harvest_jobs
                WHERE status = 'queued' AND run_at <= NOW()
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HarvestJob::try_from).transpose()?)
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn report_progress(&self, job_id: Uuid, worker_id: &str, progress: i32) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET progress = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(progress.clamp(0, 100))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = 'completed',
                progress = 100,
                locked_by = NULL,
                locked_at = NULL,
                last_error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotActive(job_id));
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, QueueError> {
        let row: Option<(String, i32, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            r#"
            UPDATE harvest_jobs
            SET status = CASE
                    WHEN $4 AND attempts < max_attempts THEN 'queued'
                    ELSE 'failed'
                END,
                run_at = CASE
                    WHEN $4 AND attempts < max_attempts
                        THEN NOW() + make_interval(secs => $5 * power(2, attempts - 1))
                    ELSE run_at
                END,
                completed_at = CASE
                    WHEN $4 AND attempts < max_attempts THEN NULL
                    ELSE NOW()
                END,
                last_error = $3,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND locked_by = $2
            RETURNING status, attempts, run_at
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .bind(retryable)
        .bind(self.retry_base.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let (status, attempt, run_at) = row.ok_or(QueueError::NotActive(job_id))?;

        if status == JobStatus::Queued.as_str() {
            tracing::warn!(job_id = %job_id, attempt, retry_at = %run_at, error, "Harvest attempt failed, will retry");
            Ok(FailureOutcome::Retrying { attempt, run_at })
        } else {
            tracing::error!(job_id = %job_id, attempt, error, "Harvest job failed");
            Ok(FailureOutcome::Failed { attempt })
        }
    }

    async fn reclaim_stale(&self, timeout: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE harvest_jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END,
                completed_at = CASE WHEN attempts >= max_attempts THEN NOW() ELSE NULL END,
                last_error = 'worker timed out',
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE status = 'active'
              AND updated_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Reclaimed stale harvest jobs");
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<HarvestJob>, QueueError> {
        let row: Option<HarvestJobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM harvest_jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(HarvestJob::try_from).transpose()?)
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<HarvestJob>, QueueError> {
        let rows: Vec<HarvestJobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM harvest_jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY updated_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| HarvestJob::try_from(row).map_err(QueueError::from))
            .collect()
    }

    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let metrics: QueueMetrics = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued' AND run_at <= NOW()) AS queued,
                COUNT(*) FILTER (WHERE status = 'active') AS active,
                COUNT(*) FILTER (WHERE status = 'queued' AND run_at > NOW()) AS delayed,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM harvest_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(metrics)
    }
}
