//! Get subject profile query
//!
//! Returns the stored profile with its ranking summary. A subject that was
//! never harvested yields [`ProfileOutcome::Pending`] with the `full` job that
//! will fetch it; a stale one is served as-is with `is_fetching` set while a
//! `refresh` job runs.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::super::SubjectsState;
use crate::cache::profile_key;
use crate::db::{subjects, DbError};
use crate::error::AppError;
use crate::harvest::{HarvestQueue, QueueError};
use crate::models::Subject;
use devrank_common::{DevrankError, HarvestRequest, JobKind, SubjectKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProfileQuery {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RankingSummary {
    pub score: i64,
    pub global_rank: Option<i32>,
    pub region_rank: Option<i32>,
    pub region: Option<String>,
    pub last_calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub username: String,
    pub login: String,
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
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub is_fetching: bool,
    pub ranking: Option<RankingSummary>,
}

impl SubjectProfile {
    fn from_parts(subject: Subject, ranking: Option<RankingSummary>) -> Self {
        Self {
            username: subject.username,
            login: subject.login,
            name: subject.name,
            avatar_url: subject.avatar_url,
            bio: subject.bio,
            company: subject.company,
            blog: subject.blog,
            location: subject.location,
            email: subject.email,
            twitter_username: subject.twitter_username,
            followers: subject.followers,
            following: subject.following,
            public_repos: subject.public_repos,
            public_gists: subject.public_gists,
            organizations: subject.organizations.0,
            social_links: subject.social_links.0,
            upstream_created_at: subject.upstream_created_at,
            last_fetched_at: subject.last_fetched_at,
            is_fetching: subject.is_fetching,
            ranking,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_fetched_at {
            Some(fetched) => now - fetched > max_age,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProfileOutcome {
    Ready(SubjectProfile),
    /// Never harvested; `job_id` is the harvest that will create it
    Pending { username: String, job_id: Uuid },
}

#[derive(Debug, thiserror::Error)]
pub enum GetProfileError {
    #[error(transparent)]
    Validation(#[from] DevrankError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<sqlx::Error> for GetProfileError {
    fn from(err: sqlx::Error) -> Self {
        GetProfileError::Database(DbError::from(err))
    }
}

impl Request<Result<ProfileOutcome, GetProfileError>> for GetProfileQuery {}

pub async fn handle(state: SubjectsState, query: GetProfileQuery) -> Result<ProfileOutcome, GetProfileError> {
    let key = SubjectKey::parse(&query.username)?;
    let cache_key = profile_key(&key);

    let mut profile = match state.cache.get::<SubjectProfile>(&cache_key).await {
        Some(profile) => profile,
        None => {
            let Some(subject) = subjects::find_subject(&state.db, &key).await? else {
                let outcome = schedule(state.queue.as_ref(), &key, JobKind::Full).await?;
                return Ok(ProfileOutcome::Pending {
                    username: key.to_string(),
                    job_id: outcome,
                });
            };

            let ranking = ranking_summary(&state.db, subject.id).await?;
            let profile = SubjectProfile::from_parts(subject, ranking);
            state.cache.put(&cache_key, &profile).await;
            profile
        }
    };

    if !profile.is_fetching && profile.is_stale(Utc::now(), state.stale_after) {
        schedule(state.queue.as_ref(), &key, JobKind::Refresh).await?;
        profile.is_fetching = true;
    }

    Ok(ProfileOutcome::Ready(profile))
}

async fn schedule(queue: &dyn HarvestQueue, key: &SubjectKey, kind: JobKind) -> Result<Uuid, QueueError> {
    let outcome = queue.enqueue(&HarvestRequest::new(key.clone(), kind)).await?;

    tracing::debug!(
        subject = %key,
        kind = kind.as_str(),
        job_id = %outcome.job_id,
        duplicate = outcome.duplicate,
        "Scheduled harvest from profile read"
    );

    Ok(outcome.job_id)
}

async fn ranking_summary(pool: &PgPool, subject_id: i64) -> Result<Option<RankingSummary>, sqlx::Error> {
    sqlx::query_as::<_, RankingSummary>(
        r#"
        SELECT score, global_rank, region_rank, region, last_calculated_at
        FROM rankings
        WHERE subject_id = $1
        "#,
    )
    .bind(subject_id)
    .fetch_optional(pool)
    .await
}

impl From<GetProfileError> for AppError {
    fn from(err: GetProfileError) -> Self {
        match err {
            GetProfileError::Validation(e) => AppError::from(e),
            GetProfileError::Database(e) => AppError::from(e),
            GetProfileError::Queue(e) => AppError::from(e),
        }
    }
}
