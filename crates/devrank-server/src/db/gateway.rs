//! Transactional writes for harvested subjects
//!
//! A harvest lands in one transaction: the subject upsert, a per-collection
//! upsert and a full replacement of the subject's activity records. Any
//! failure rolls back all three. Collections missing from a later harvest are
//! kept.

use sqlx::{types::Json, PgPool, Postgres, Transaction};

use super::DbResult;
use crate::cache::SubjectCache;
use crate::harvest::normalize::NormalizedHarvest;
use crate::models::{ActivityDay, CollectionData, SubjectData};
use devrank_common::SubjectKey;

#[derive(Clone)]
pub struct PersistenceGateway {
    pool: PgPool,
    cache: SubjectCache,
}

impl PersistenceGateway {
    pub fn new(pool: PgPool, cache: SubjectCache) -> Self {
        Self { pool, cache }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist one harvest atomically and return the subject id
    ///
    /// Cached projections of the subject are dropped after commit.
    pub async fn save_harvest(&self, harvest: &NormalizedHarvest) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let subject_id = upsert_subject(&mut tx, &harvest.key, &harvest.subject).await?;
        for collection in &harvest.collections {
            upsert_collection(&mut tx, subject_id, collection).await?;
        }
        replace_activity(&mut tx, subject_id, &harvest.activity).await?;

        tx.commit().await?;

        tracing::info!(
            subject = %harvest.key,
            subject_id,
            collections = harvest.collections.len(),
            activity_days = harvest.activity.len(),
            "Harvest persisted"
        );

        self.cache.invalidate(&harvest.key).await;
        Ok(subject_id)
    }

    /// Set the `is_fetching` flag; returns false when the subject is unknown
    pub async fn mark_fetching(&self, key: &SubjectKey, fetching: bool) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE subjects SET is_fetching = $2, updated_at = NOW() WHERE username = $1",
        )
        .bind(key.as_str())
        .bind(fetching)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            self.cache.invalidate(key).await;
        }
        Ok(result.rows_affected() > 0)
    }
}

async fn upsert_subject(
    tx: &mut Transaction<'_, Postgres>,
    key: &SubjectKey,
    subject: &SubjectData,
) -> DbResult<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO subjects (
            username, login, upstream_id, name, avatar_url, bio, company, blog, location,
            email, twitter_username, followers, following, public_repos, public_gists,
            organizations, social_links, upstream_created_at, last_fetched_at, is_fetching
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                NOW(), FALSE)
        ON CONFLICT (username) DO UPDATE SET
            login = EXCLUDED.login,
            upstream_id = EXCLUDED.upstream_id,
            name = EXCLUDED.name,
            avatar_url = EXCLUDED.avatar_url,
            bio = EXCLUDED.bio,
            company = EXCLUDED.company,
            blog = EXCLUDED.blog,
            location = EXCLUDED.location,
            email = EXCLUDED.email,
            twitter_username = EXCLUDED.twitter_username,
            followers = EXCLUDED.followers,
            following = EXCLUDED.following,
            public_repos = EXCLUDED.public_repos,
            public_gists = EXCLUDED.public_gists,
            organizations = EXCLUDED.organizations,
            social_links = EXCLUDED.social_links,
            upstream_created_at = EXCLUDED.upstream_created_at,
            last_fetched_at = NOW(),
            is_fetching = FALSE,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(key.as_str())
    .bind(&subject.login)
    .bind(subject.upstream_id)
    .bind(&subject.name)
    .bind(&subject.avatar_url)
    .bind(&subject.bio)
    .bind(&subject.company)
    .bind(&subject.blog)
    .bind(&subject.location)
    .bind(&subject.email)
    .bind(&subject.twitter_username)
    .bind(subject.followers)
    .bind(subject.following)
    .bind(subject.public_repos)
    .bind(subject.public_gists)
    .bind(Json(subject.organizations.clone()))
    .bind(Json(subject.social_links.clone()))
    .bind(subject.upstream_created_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

async fn upsert_collection(
    tx: &mut Transaction<'_, Postgres>,
    subject_id: i64,
    collection: &CollectionData,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO collections (
            subject_id, name, full_name, description, language, homepage, topics, is_fork,
            stars, forks, watchers, open_issues, commit_count, pushed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (subject_id, name) DO UPDATE SET
            full_name = EXCLUDED.full_name,
            description = EXCLUDED.description,
            language = EXCLUDED.language,
            homepage = EXCLUDED.homepage,
            topics = EXCLUDED.topics,
            is_fork = EXCLUDED.is_fork,
            stars = EXCLUDED.stars,
            forks = EXCLUDED.forks,
            watchers = EXCLUDED.watchers,
            open_issues = EXCLUDED.open_issues,
            commit_count = EXCLUDED.commit_count,
            pushed_at = EXCLUDED.pushed_at,
            updated_at = NOW()
        "#,
    )
    .bind(subject_id)
    .bind(&collection.name)
    .bind(&collection.full_name)
    .bind(&collection.description)
    .bind(&collection.language)
    .bind(&collection.homepage)
    .bind(&collection.topics)
    .bind(collection.is_fork)
    .bind(collection.stars)
    .bind(collection.forks)
    .bind(collection.watchers)
    .bind(collection.open_issues)
    .bind(collection.commit_count)
    .bind(collection.pushed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Delete-then-bulk-insert; duplicate days in `activity` abort the transaction
async fn replace_activity(
    tx: &mut Transaction<'_, Postgres>,
    subject_id: i64,
    activity: &[ActivityDay],
) -> DbResult<()> {
    sqlx::query("DELETE FROM activity_records WHERE subject_id = $1")
        .bind(subject_id)
        .execute(&mut **tx)
        .await?;

    if activity.is_empty() {
        return Ok(());
    }

    let days: Vec<_> = activity.iter().map(|a| a.day).collect();
    let commits: Vec<i32> = activity.iter().map(|a| a.commits).collect();
    let pull_requests: Vec<i32> = activity.iter().map(|a| a.pull_requests).collect();
    let issues: Vec<i32> = activity.iter().map(|a| a.issues).collect();

    sqlx::query(
        r#"
        INSERT INTO activity_records (subject_id, day, commits, pull_requests, issues)
        SELECT $1, u.day, u.commits, u.pull_requests, u.issues
        FROM UNNEST($2::date[], $3::int4[], $4::int4[], $5::int4[])
            AS u(day, commits, pull_requests, issues)
        "#,
    )
    .bind(subject_id)
    .bind(&days)
    .bind(&commits)
    .bind(&pull_requests)
    .bind(&issues)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
