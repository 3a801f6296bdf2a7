//! List harvest jobs query
//!
//! Most recently updated first, optionally filtered by status. Failed jobs
//! stay listed with their last error.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::harvest::{HarvestJob, HarvestQueue, JobStatus, QueueError};
use devrank_common::DevrankError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListHarvestJobsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListHarvestJobsError {
    #[error(transparent)]
    InvalidStatus(#[from] DevrankError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Request<Result<Vec<HarvestJob>, ListHarvestJobsError>> for ListHarvestJobsQuery {}

pub async fn handle(
    queue: Arc<dyn HarvestQueue>,
    query: ListHarvestJobsQuery,
) -> Result<Vec<HarvestJob>, ListHarvestJobsError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    Ok(queue.list(status, limit).await?)
}

impl From<ListHarvestJobsError> for AppError {
    fn from(err: ListHarvestJobsError) -> Self {
        match err {
            ListHarvestJobsError::InvalidStatus(e) => AppError::from(e),
            ListHarvestJobsError::Queue(e) => AppError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::MemoryHarvestQueue;
    use devrank_common::{HarvestRequest, JobKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_filters_by_status() {
        let queue: Arc<dyn HarvestQueue> = Arc::new(MemoryHarvestQueue::new(3, Duration::ZERO));
        for login in ["alice", "bob"] {
            queue
                .enqueue(&HarvestRequest::new(login.parse().unwrap(), JobKind::Full))
                .await
                .unwrap();
        }
        let claimed = queue.claim("w").await.unwrap().unwrap();
        queue.fail(claimed.id, "w", "not found", false).await.unwrap();

        let failed = handle(
            queue.clone(),
            ListHarvestJobsQuery {
                status: Some("failed".into()),
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("not found"));

        let all = handle(queue.clone(), ListHarvestJobsQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let bad = handle(
            queue,
            ListHarvestJobsQuery {
                status: Some("sleeping".into()),
                limit: None,
            },
        )
        .await;
        assert!(matches!(bad, Err(ListHarvestJobsError::InvalidStatus(_))));
    }
}
