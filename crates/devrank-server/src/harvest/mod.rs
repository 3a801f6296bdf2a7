//! Harvest pipeline
//!
//! Turns harvest requests into paced upstream calls and persisted, ranked
//! subjects:
//!
//! - [`credentials`]: token rotation and cooldown bookkeeping
//! - [`client`]: the rate-limited upstream client
//! - [`normalize`]: payload to row conversion
//! - [`queue`] / [`memory_queue`]: durable job queue and its in-process twin
//! - [`worker`]: bounded worker pool draining the queue
//! - [`pipeline`]: the per-subject job handler

pub mod client;
pub mod credentials;
pub mod github;
pub mod jobs;
pub mod memory_queue;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod worker;

use thiserror::Error;

pub use client::{GithubClient, UpstreamError};
pub use credentials::{BackoffPolicy, Credential, CredentialPool};
pub use jobs::{EnqueueOutcome, HarvestJob, JobStatus, QueueMetrics};
pub use memory_queue::MemoryHarvestQueue;
pub use pipeline::HarvestPipeline;
pub use queue::{HarvestQueue, PgHarvestQueue, QueueError};
pub use worker::{JobHandler, ProgressReporter, WorkerPool, WorkerPoolConfig};

use crate::db::DbError;
use crate::ranking::RankingError;

/// Failure of one harvest job step
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Ranking(#[from] RankingError),

    #[error("Invalid upstream payload: {0}")]
    InvalidPayload(String),
}

impl HarvestError {
    /// Whether the queue should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::Upstream(e) => e.is_retryable(),
            HarvestError::Database(e) => !e.is_not_found(),
            HarvestError::Ranking(e) => e.is_retryable(),
            HarvestError::InvalidPayload(_) => false,
        }
    }
}
