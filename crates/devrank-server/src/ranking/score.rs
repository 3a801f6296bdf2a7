//! Scoring and rank assignment
//!
//! `score = followers*2 + public_repos*5 + sum(stars + forks*2) + recent_commits`

use chrono::{DateTime, Utc};

use crate::db::subjects::SubjectTotals;
use crate::models::RankingRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub followers: i64,
    pub public_repos: i64,
    pub total_stars: i64,
    pub total_forks: i64,
    pub recent_commits: i64,
}

impl From<&SubjectTotals> for ScoreInputs {
    fn from(totals: &SubjectTotals) -> Self {
        Self {
            followers: totals.followers,
            public_repos: totals.public_repos,
            total_stars: totals.total_stars,
            total_forks: totals.total_forks,
            recent_commits: totals.recent_commits,
        }
    }
}

pub fn score(inputs: &ScoreInputs) -> i64 {
    inputs
        .followers
        .saturating_mul(2)
        .saturating_add(inputs.public_repos.saturating_mul(5))
        .saturating_add(inputs.total_stars)
        .saturating_add(inputs.total_forks.saturating_mul(2))
        .saturating_add(inputs.recent_commits)
}

/// Whether a stored ranking must be recomputed
///
/// True when none is stored, when it is older than `max_age`, or when
/// followers, public repos or the normalized region changed.
pub fn needs_update(
    stored: Option<&RankingRecord>,
    inputs: &ScoreInputs,
    region: Option<&str>,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> bool {
    let Some(stored) = stored else {
        return true;
    };

    now - stored.last_calculated_at > max_age
        || stored.followers != inputs.followers
        || stored.public_repos != inputs.public_repos
        || stored.region.as_deref() != region
}

/// Dense 1..N ranks: score descending, ties broken by subject id ascending
///
/// Input is `(subject_id, score)`; output is `(subject_id, rank)` in rank order.
pub fn assign_ranks(entries: &[(i64, i64)]) -> Vec<(i64, i32)> {
    let mut ordered = entries.to_vec();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    ordered
        .into_iter()
        .zip(1..)
        .map(|((subject_id, _), rank)| (subject_id, rank))
        .collect()
}
