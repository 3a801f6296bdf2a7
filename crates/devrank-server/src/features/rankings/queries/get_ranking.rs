//! Get ranking query

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ranking::{RankingEngine, RankingError, RankingView};
use devrank_common::{DevrankError, SubjectKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRankingQuery {
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetRankingError {
    #[error(transparent)]
    Validation(#[from] DevrankError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
}

impl Request<Result<RankingView, GetRankingError>> for GetRankingQuery {}

pub async fn handle(engine: RankingEngine, query: GetRankingQuery) -> Result<RankingView, GetRankingError> {
    let key = SubjectKey::parse(&query.username)?;
    Ok(engine.get_ranking(&key).await?)
}

impl From<GetRankingError> for AppError {
    fn from(err: GetRankingError) -> Self {
        match err {
            GetRankingError::Validation(e) => AppError::from(e),
            GetRankingError::Ranking(e) => AppError::from(e),
        }
    }
}
