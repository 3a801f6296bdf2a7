//! Leaderboard query
//!
//! Global order by default; `region` switches to that region's order. Region
//! names match case-insensitively against the gazetteer.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::features::shared::{Paginated, PaginationParams};
use crate::ranking::{LeaderboardEntry, RankingEngine, RankingError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    // Not flattened: serde_urlencoded cannot parse numbers through flatten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error(transparent)]
    Ranking(#[from] RankingError),
}

impl Request<Result<Paginated<LeaderboardEntry>, LeaderboardError>> for LeaderboardQuery {}

pub async fn handle(
    engine: RankingEngine,
    query: LeaderboardQuery,
) -> Result<Paginated<LeaderboardEntry>, LeaderboardError> {
    let region = query.region.as_deref().map(str::trim).filter(|r| !r.is_empty());
    let params = PaginationParams::new(query.page, query.per_page);

    let (entries, total) = engine
        .leaderboard(region, params.per_page(), params.offset())
        .await?;

    Ok(Paginated::from_items(entries, &params, total))
}

impl From<LeaderboardError> for AppError {
    fn from(err: LeaderboardError) -> Self {
        match err {
            LeaderboardError::Ranking(e) => AppError::from(e),
        }
    }
}
