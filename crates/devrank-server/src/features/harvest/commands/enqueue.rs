//! Enqueue harvest command
//!
//! Requests a harvest for one subject. A second request while a job for the
//! same subject is queued or active returns that job flagged as a duplicate.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::harvest::{HarvestQueue, QueueError};
use devrank_common::{DevrankError, HarvestRequest, JobKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueHarvestCommand {
    pub username: String,
    /// `full` (default) or `refresh`
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnqueueHarvestResponse {
    pub job_id: Uuid,
    pub duplicate: bool,
    pub subject: String,
    pub kind: JobKind,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueHarvestError {
    #[error(transparent)]
    Validation(#[from] DevrankError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Request<Result<EnqueueHarvestResponse, EnqueueHarvestError>> for EnqueueHarvestCommand {}

impl EnqueueHarvestCommand {
    pub fn validate(&self) -> Result<HarvestRequest, EnqueueHarvestError> {
        let kind = self.kind.as_deref().unwrap_or(JobKind::Full.as_str());
        Ok(HarvestRequest::parse(&self.username, kind)?)
    }
}

pub async fn handle(
    queue: Arc<dyn HarvestQueue>,
    command: EnqueueHarvestCommand,
) -> Result<EnqueueHarvestResponse, EnqueueHarvestError> {
    let request = command.validate()?;
    let outcome = queue.enqueue(&request).await?;

    Ok(EnqueueHarvestResponse {
        job_id: outcome.job_id,
        duplicate: outcome.duplicate,
        subject: request.subject.to_string(),
        kind: request.kind,
    })
}

impl From<EnqueueHarvestError> for AppError {
    fn from(err: EnqueueHarvestError) -> Self {
        match err {
            EnqueueHarvestError::Validation(e) => AppError::from(e),
            EnqueueHarvestError::Queue(e) => AppError::from(e),
        }
    }
}
