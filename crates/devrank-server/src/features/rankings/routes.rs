//! Ranking routes
//!
//! - `GET /?region=&page=&per_page=` leaderboard
//! - `GET /:username` one subject's ranking
//! - `POST /:username/recalculate` recompute now

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::commands::{self, RecalculateRankingCommand};
use super::queries::{self, GetRankingQuery, LeaderboardQuery};
use crate::api::response::ApiResponse;
use crate::error::ApiResult;
use crate::ranking::RankingEngine;

pub fn rankings_routes() -> Router<RankingEngine> {
    Router::new()
        .route("/", get(leaderboard))
        .route("/:username", get(get_ranking))
        .route("/:username/recalculate", post(recalculate))
}

async fn leaderboard(
    State(engine): State<RankingEngine>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Response> {
    let region = query.region.clone();
    let page = queries::leaderboard::handle(engine, query).await?;

    Ok(ApiResponse::success_with_meta(
        page.items,
        json!({ "pagination": page.pagination, "region": region }),
    )
    .into_response())
}

async fn get_ranking(
    State(engine): State<RankingEngine>,
    Path(username): Path<String>,
) -> ApiResult<Response> {
    let view = queries::get_ranking::handle(engine, GetRankingQuery { username }).await?;
    Ok(ApiResponse::success(view).into_response())
}

#[tracing::instrument(skip(engine))]
async fn recalculate(
    State(engine): State<RankingEngine>,
    Path(username): Path<String>,
) -> ApiResult<Response> {
    let record = commands::recalculate::handle(engine, RecalculateRankingCommand { username }).await?;
    Ok(ApiResponse::success(record).into_response())
}
