//! Subject routes
//!
//! - `GET /:username` profile; 202 while a first harvest is pending
//! - `GET /:username/repos?page=&per_page=` repositories, most starred first

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::json;

use super::queries::{self, GetProfileQuery, ListReposQuery, ProfileOutcome};
use super::SubjectsState;
use crate::api::response::ApiResponse;
use crate::error::ApiResult;
use crate::features::shared::PaginationParams;

pub fn subjects_routes() -> Router<SubjectsState> {
    Router::new()
        .route("/:username", get(get_profile))
        .route("/:username/repos", get(list_repos))
}

async fn get_profile(State(state): State<SubjectsState>, Path(username): Path<String>) -> ApiResult<Response> {
    let outcome = queries::get_profile::handle(state, GetProfileQuery { username }).await?;

    let response = match outcome {
        ProfileOutcome::Ready(profile) => ApiResponse::success(profile).into_response(),
        ProfileOutcome::Pending { username, job_id } => ApiResponse::success(json!({
            "username": username,
            "job_id": job_id,
            "is_fetching": true,
        }))
        .with_status(StatusCode::ACCEPTED),
    };

    Ok(response)
}

async fn list_repos(
    State(state): State<SubjectsState>,
    Path(username): Path<String>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Response> {
    let page = queries::list_repos::handle(state, ListReposQuery { username, pagination }).await?;

    Ok(ApiResponse::success_with_meta(page.items, json!({ "pagination": page.pagination })).into_response())
}
