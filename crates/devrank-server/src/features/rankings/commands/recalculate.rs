//! Recalculate ranking command
//!
//! Recomputes one subject's score and re-sorts, even when the stored ranking
//! looks current.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::RankingRecord;
use crate::ranking::{RankingEngine, RankingError};
use devrank_common::{DevrankError, SubjectKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculateRankingCommand {
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecalculateRankingError {
    #[error(transparent)]
    Validation(#[from] DevrankError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
}

impl Request<Result<RankingRecord, RecalculateRankingError>> for RecalculateRankingCommand {}

pub async fn handle(
    engine: RankingEngine,
    command: RecalculateRankingCommand,
) -> Result<RankingRecord, RecalculateRankingError> {
    let key = SubjectKey::parse(&command.username)?;
    let record = engine.recalculate(&key).await?;

    tracing::info!(
        subject = %key,
        score = record.score,
        global_rank = record.global_rank,
        "Ranking recalculated on request"
    );

    Ok(record)
}

impl From<RecalculateRankingError> for AppError {
    fn from(err: RecalculateRankingError) -> Self {
        match err {
            RecalculateRankingError::Validation(e) => AppError::from(e),
            RecalculateRankingError::Ranking(e) => AppError::from(e),
        }
    }
}
