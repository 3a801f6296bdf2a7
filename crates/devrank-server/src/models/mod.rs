//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use std::collections::BTreeMap;

/// Harvested profile
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subject {
    pub id: i64,
    /// Lower-cased identity key
    pub username: String,
    pub login: String,
    pub upstream_id: Option<i64>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub twitter_username: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub public_repos: i64,
    pub public_gists: i64,
    pub organizations: Json<Vec<String>>,
    pub social_links: Json<BTreeMap<String, String>>,
    pub upstream_created_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub is_fetching: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    /// Whether the last harvest is older than `max_age` (or never happened)
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_fetched_at {
            Some(fetched) => now - fetched > max_age,
            None => true,
        }
    }
}

/// Repository owned by a subject
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Collection {
    pub id: i64,
    pub subject_id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub homepage: Option<String>,
    pub topics: Vec<String>,
    pub is_fork: bool,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub commit_count: i64,
    pub pushed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RankingRecord {
    pub id: i64,
    pub subject_id: i64,
    pub score: i64,
    pub global_rank: Option<i32>,
    pub region_rank: Option<i32>,
    pub region: Option<String>,
    pub followers: i64,
    pub public_repos: i64,
    pub total_stars: i64,
    pub total_forks: i64,
    pub recent_commits: i64,
    pub last_calculated_at: DateTime<Utc>,
}

/// Point-in-time copy of the counters a ranking was computed from
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RankingSnapshot {
    pub id: i64,
    pub subject_id: i64,
    pub score: i64,
    pub followers: i64,
    pub public_repos: i64,
    pub total_stars: i64,
    pub total_forks: i64,
    pub recent_commits: i64,
    pub region: Option<String>,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// Harvest payloads (normalized, not yet persisted)
// ============================================================================

/// Normalized profile ready for upsert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectData {
    pub login: String,
    pub upstream_id: Option<i64>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub twitter_username: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub public_repos: i64,
    pub public_gists: i64,
    pub organizations: Vec<String>,
    pub social_links: BTreeMap<String, String>,
    pub upstream_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionData {
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub homepage: Option<String>,
    pub topics: Vec<String>,
    pub is_fork: bool,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub commit_count: i64,
    pub pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityDay {
    pub day: NaiveDate,
    pub commits: i32,
    pub pull_requests: i32,
    pub issues: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subject_fetched_at(fetched: Option<DateTime<Utc>>) -> Subject {
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
        Subject {
            id: 1,
            username: "octocat".into(),
            login: "octocat".into(),
            upstream_id: None,
            name: None,
            avatar_url: None,
            bio: None,
            company: None,
            blog: None,
            location: None,
            email: None,
            twitter_username: None,
            followers: 0,
            following: 0,
            public_repos: 0,
            public_gists: 0,
            organizations: Json(Vec::new()),
            social_links: Json(BTreeMap::new()),
            upstream_created_at: None,
            last_fetched_at: fetched,
            is_fetching: false,
            created_at: epoch,
            updated_at: epoch,
        }
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let max_age = chrono::Duration::hours(24);

        assert!(subject_fetched_at(None).is_stale(now, max_age));
        assert!(subject_fetched_at(Some(now - chrono::Duration::hours(25))).is_stale(now, max_age));
        assert!(!subject_fetched_at(Some(now - chrono::Duration::hours(1))).is_stale(now, max_age));
    }
}
