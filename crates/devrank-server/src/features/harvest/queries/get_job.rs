//! Get harvest job query

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::harvest::{HarvestJob, HarvestQueue, QueueError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHarvestJobQuery {
    pub job_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetHarvestJobError {
    #[error("Harvest job '{0}' not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Request<Result<HarvestJob, GetHarvestJobError>> for GetHarvestJobQuery {}

pub async fn handle(
    queue: Arc<dyn HarvestQueue>,
    query: GetHarvestJobQuery,
) -> Result<HarvestJob, GetHarvestJobError> {
    queue
        .get(query.job_id)
        .await?
        .ok_or(GetHarvestJobError::NotFound(query.job_id))
}

impl From<GetHarvestJobError> for AppError {
    fn from(err: GetHarvestJobError) -> Self {
        match err {
            GetHarvestJobError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetHarvestJobError::Queue(e) => AppError::from(e),
        }
    }
}
