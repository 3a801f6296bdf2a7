//! Queue metrics query
//!
//! Counts per state; `delayed` are queued jobs waiting out a retry backoff.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::harvest::{HarvestQueue, QueueError, QueueMetrics};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetQueueMetricsQuery {}

#[derive(Debug, thiserror::Error)]
pub enum GetQueueMetricsError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Request<Result<QueueMetrics, GetQueueMetricsError>> for GetQueueMetricsQuery {}

pub async fn handle(
    queue: Arc<dyn HarvestQueue>,
    _query: GetQueueMetricsQuery,
) -> Result<QueueMetrics, GetQueueMetricsError> {
    Ok(queue.metrics().await?)
}

impl From<GetQueueMetricsError> for AppError {
    fn from(err: GetQueueMetricsError) -> Self {
        match err {
            GetQueueMetricsError::Queue(e) => AppError::from(e),
        }
    }
}
