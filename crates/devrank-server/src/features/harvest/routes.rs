//! Harvest routes
//!
//! - `POST /` enqueue a harvest (202 when created, 200 for a duplicate)
//! - `GET /metrics` queue counters
//! - `GET /jobs?status=&limit=` recent jobs
//! - `GET /jobs/:job_id` one job

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::commands::{self, EnqueueHarvestCommand};
use super::queries::{self, GetHarvestJobQuery, GetQueueMetricsQuery, ListHarvestJobsQuery};
use crate::api::response::ApiResponse;
use crate::error::ApiResult;
use crate::harvest::HarvestQueue;

pub fn harvest_routes() -> Router<Arc<dyn HarvestQueue>> {
    Router::new()
        .route("/", post(enqueue_harvest))
        .route("/metrics", get(get_metrics))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
}

#[tracing::instrument(skip(queue, command), fields(subject = %command.username))]
async fn enqueue_harvest(
    State(queue): State<Arc<dyn HarvestQueue>>,
    Json(command): Json<EnqueueHarvestCommand>,
) -> ApiResult<Response> {
    let response = commands::enqueue::handle(queue, command).await?;

    let status = if response.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok(ApiResponse::success(response).with_status(status))
}

async fn get_metrics(State(queue): State<Arc<dyn HarvestQueue>>) -> ApiResult<Response> {
    let metrics = queries::get_metrics::handle(queue, GetQueueMetricsQuery::default()).await?;
    Ok(ApiResponse::success(metrics).into_response())
}

async fn list_jobs(
    State(queue): State<Arc<dyn HarvestQueue>>,
    Query(query): Query<ListHarvestJobsQuery>,
) -> ApiResult<Response> {
    let jobs = queries::list_jobs::handle(queue, query).await?;
    Ok(ApiResponse::success(jobs).into_response())
}

async fn get_job(
    State(queue): State<Arc<dyn HarvestQueue>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let job = queries::get_job::handle(queue, GetHarvestJobQuery { job_id }).await?;
    Ok(ApiResponse::success(job).into_response())
}
