//! Harvest job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use devrank_common::{DevrankError, JobKind, SubjectKey};

/// Queue lifecycle: `queued -> active -> completed | failed`, with retryable
/// failures going back to `queued` behind a backoff delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DevrankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DevrankError::Parse(format!("unknown job status '{}'", other))),
        }
    }
}

/// Raw `harvest_jobs` row
#[derive(Debug, Clone, FromRow)]
pub struct HarvestJobRow {
    pub id: Uuid,
    pub subject_key: String,
    pub kind: String,
    pub idempotency_key: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub progress: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub subject: SubjectKey,
    pub kind: JobKind,
    pub idempotency_key: String,
    pub status: JobStatus,
    /// Attempts started so far, including the running one
    pub attempts: i32,
    pub max_attempts: i32,
    pub progress: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<HarvestJobRow> for HarvestJob {
    type Error = DevrankError;

    fn try_from(row: HarvestJobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            subject: SubjectKey::parse(&row.subject_key)?,
            kind: row.kind.parse()?,
            idempotency_key: row.idempotency_key,
            status: row.status.parse()?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            progress: row.progress,
            run_at: row.run_at,
            locked_by: row.locked_by,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub job_id: Uuid,
    /// An open job for the subject already existed and was returned instead
    pub duplicate: bool,
}

/// Job counts by state; `delayed` are queued jobs whose `run_at` is in the future
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QueueMetrics {
    pub queued: i64,
    pub active: i64,
    pub delayed: i64,
    pub completed: i64,
    pub failed: i64,
}

/// What a failed attempt turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { attempt: i32, run_at: DateTime<Utc> },
    Failed { attempt: i32 },
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
pub fn retry_delay(base: std::time::Duration, attempt: i32) -> std::time::Duration {
    let exponent = (attempt.max(1) - 1).min(16) as u32;
    base.saturating_mul(1u32 << exponent)
}
