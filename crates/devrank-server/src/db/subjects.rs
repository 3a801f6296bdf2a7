//! Read operations for subjects, their collections and activity.
//!
//! # Key Operations
//!
//! - `find_subject()` / `get_subject_by_key()` - Lookup by identity key
//! - `list_collections()` / `count_collections()` - Paginated repositories
//! - `subject_totals()` - Ranking inputs aggregated in SQL
//! - `unknown_usernames()` - Filter discovery candidates to new subjects
//!
//! Writes go through [`super::gateway::PersistenceGateway`].

use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};

use super::{DbError, DbResult};
use crate::models::{Collection, Subject};
use devrank_common::SubjectKey;

const SUBJECT_COLUMNS: &str = "id, username, login, upstream_id, name, avatar_url, bio, company, \
     blog, location, email, twitter_username, followers, following, public_repos, public_gists, \
     organizations, social_links, upstream_created_at, last_fetched_at, is_fetching, created_at, \
     updated_at";

const COLLECTION_COLUMNS: &str = "id, subject_id, name, full_name, description, language, homepage, \
     topics, is_fork, stars, forks, watchers, open_issues, commit_count, pushed_at, created_at, \
     updated_at";

/// Counters a score is computed from, aggregated per subject
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SubjectTotals {
    pub subject_id: i64,
    pub followers: i64,
    pub public_repos: i64,
    pub location: Option<String>,
    pub total_stars: i64,
    pub total_forks: i64,
    pub recent_commits: i64,
}

/// Looks up a subject by its identity key, `None` when never harvested.
pub async fn find_subject(pool: &PgPool, key: &SubjectKey) -> DbResult<Option<Subject>> {
    let subject = sqlx::query_as::<_, Subject>(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE username = $1"
    ))
    .bind(key.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(subject)
}

/// Retrieves a subject by its identity key.
///
/// # Errors
///
/// Returns `DbError::NotFound` if the subject has never been harvested.
pub async fn get_subject_by_key(pool: &PgPool, key: &SubjectKey) -> DbResult<Subject> {
    find_subject(pool, key)
        .await?
        .ok_or_else(|| DbError::not_found("Subject", key.as_str()))
}

/// Lists a subject's collections, most starred first.
///
/// # Arguments
///
/// * `pool` - Database connection pool
/// * `subject_id` - Owning subject
/// * `limit` / `offset` - Page window
pub async fn list_collections(
    pool: &PgPool,
    subject_id: i64,
    limit: i64,
    offset: i64,
) -> DbResult<Vec<Collection>> {
    let collections = sqlx::query_as::<_, Collection>(&format!(
        r#"
        SELECT {COLLECTION_COLUMNS} FROM collections
        WHERE subject_id = $1
        ORDER BY stars DESC, name ASC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(subject_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(collections)
}

pub async fn count_collections(pool: &PgPool, subject_id: i64) -> DbResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM collections WHERE subject_id = $1")
        .bind(subject_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

const TOTALS_QUERY: &str = r#"
    SELECT
        s.id AS subject_id,
        s.followers,
        s.public_repos,
        s.location,
        COALESCE((SELECT SUM(c.stars) FROM collections c WHERE c.subject_id = s.id), 0)::BIGINT
            AS total_stars,
        COALESCE((SELECT SUM(c.forks) FROM collections c WHERE c.subject_id = s.id), 0)::BIGINT
            AS total_forks,
        COALESCE((SELECT SUM(a.commits) FROM activity_records a
                  WHERE a.subject_id = s.id AND a.day >= $1), 0)::BIGINT
            AS recent_commits
    FROM subjects s
"#;

/// Ranking inputs for one subject; commits are counted from `since` onward.
pub async fn subject_totals(pool: &PgPool, subject_id: i64, since: NaiveDate) -> DbResult<SubjectTotals> {
    sqlx::query_as::<_, SubjectTotals>(&format!("{TOTALS_QUERY} WHERE s.id = $2"))
        .bind(since)
        .bind(subject_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found("Subject", &subject_id.to_string()))
}

/// Ranking inputs for every subject with at least `min_followers`.
pub async fn eligible_totals(
    pool: &PgPool,
    min_followers: i64,
    since: NaiveDate,
) -> DbResult<Vec<SubjectTotals>> {
    let totals = sqlx::query_as::<_, SubjectTotals>(&format!(
        "{TOTALS_QUERY} WHERE s.followers >= $2 ORDER BY s.id"
    ))
    .bind(since)
    .bind(min_followers)
    .fetch_all(pool)
    .await?;

    Ok(totals)
}

/// The subset of `usernames` (identity keys) that has no subject row yet.
pub async fn unknown_usernames(pool: &PgPool, usernames: &[String]) -> DbResult<Vec<String>> {
    if usernames.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT candidate FROM UNNEST($1::text[]) AS candidate
        WHERE NOT EXISTS (SELECT 1 FROM subjects s WHERE s.username = candidate)
        "#,
    )
    .bind(usernames)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}
