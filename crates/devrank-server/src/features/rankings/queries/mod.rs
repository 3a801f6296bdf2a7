//! Ranking queries

pub mod get_ranking;
pub mod leaderboard;

pub use get_ranking::{GetRankingError, GetRankingQuery};
pub use leaderboard::{LeaderboardError, LeaderboardQuery};
