//! Ranking commands

pub mod recalculate;

pub use recalculate::{RecalculateRankingCommand, RecalculateRankingError};
