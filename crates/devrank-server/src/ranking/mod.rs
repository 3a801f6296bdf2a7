//! Ranking engine
//!
//! - [`score`]: the scoring formula and rank assignment
//! - [`region`]: free-text location to region normalization
//! - [`engine`]: persisted rankings, snapshots and re-sorting

pub mod engine;
pub mod region;
pub mod score;

use thiserror::Error;

pub use engine::{LeaderboardEntry, RankingEngine, RankingView, RecalculationSummary};
pub use region::RegionGazetteer;
pub use score::{assign_ranks, needs_update, score, ScoreInputs};

use crate::db::DbError;

#[derive(Error, Debug)]
pub enum RankingError {
    #[error("{0}")]
    NotFound(String),

    #[error("Subject '{subject}' has {followers} followers, ranking requires at least {min}")]
    Ineligible {
        subject: String,
        followers: i64,
        min: i64,
    },

    #[error("Invalid region gazetteer: {0}")]
    Gazetteer(#[from] regex::Error),

    #[error(transparent)]
    Database(DbError),
}

impl RankingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RankingError::Database(_))
    }
}

impl From<DbError> for RankingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => RankingError::NotFound(msg),
            other => RankingError::Database(other),
        }
    }
}

impl From<sqlx::Error> for RankingError {
    fn from(err: sqlx::Error) -> Self {
        RankingError::Database(DbError::Sqlx(err))
    }
}
