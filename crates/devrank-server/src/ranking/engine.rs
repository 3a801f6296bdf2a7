//! Persisted rankings
//!
//! Every write re-sorts the whole table (and the affected regions) inside one
//! transaction that holds a transaction-scoped advisory lock, so concurrent
//! updates from different workers serialize instead of interleaving ranks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

use super::region::RegionGazetteer;
use super::score::{assign_ranks, needs_update, score, ScoreInputs};
use super::RankingError;
use crate::config::RankingConfig;
use crate::db::subjects::{self, SubjectTotals};
use crate::models::{RankingRecord, RankingSnapshot, Subject};
use devrank_common::SubjectKey;

/// `pg_advisory_xact_lock` key shared by every ranking writer
const RANKINGS_LOCK_KEY: i64 = 0x6465_7672_616e_6b;

const RANKING_COLUMNS: &str = "id, subject_id, score, global_rank, region_rank, region, followers, \
     public_repos, total_stars, total_forks, recent_commits, last_calculated_at";

/// Stored ranking plus identity and whether it still reflects live counters
#[derive(Debug, Clone, Serialize)]
pub struct RankingView {
    pub username: String,
    pub login: String,
    #[serde(flatten)]
    pub ranking: RankingRecord,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub subject_id: i64,
    pub username: String,
    pub login: String,
    pub avatar_url: Option<String>,
    pub score: i64,
    pub global_rank: Option<i32>,
    pub region_rank: Option<i32>,
    pub region: Option<String>,
    pub followers: i64,
    pub total_stars: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecalculationSummary {
    pub ranked: usize,
    pub removed: u64,
}

#[derive(Debug, Clone)]
struct ComputedRanking {
    subject_id: i64,
    score: i64,
    inputs: ScoreInputs,
    region: Option<String>,
}

#[derive(Clone, Copy)]
enum RankColumn {
    Global,
    Region,
}

impl RankColumn {
    fn as_str(self) -> &'static str {
        match self {
            RankColumn::Global => "global_rank",
            RankColumn::Region => "region_rank",
        }
    }
}

/// A ranking is current when the latest snapshot carries the same counters as
/// the stored record and the subject's live profile counters
pub fn is_representative(
    record: &RankingRecord,
    snapshot: Option<&RankingSnapshot>,
    subject: &Subject,
) -> bool {
    let Some(snapshot) = snapshot else {
        return false;
    };

    snapshot.score == record.score
        && snapshot.followers == record.followers
        && snapshot.public_repos == record.public_repos
        && snapshot.total_stars == record.total_stars
        && snapshot.total_forks == record.total_forks
        && snapshot.recent_commits == record.recent_commits
        && snapshot.region == record.region
        && subject.followers == record.followers
        && subject.public_repos == record.public_repos
}

#[derive(Clone)]
pub struct RankingEngine {
    pool: PgPool,
    gazetteer: Arc<RegionGazetteer>,
    min_followers: i64,
    recalculate_after: chrono::Duration,
    activity_window: chrono::Duration,
}

impl RankingEngine {
    pub fn new(pool: PgPool, config: &RankingConfig) -> Result<Self, RankingError> {
        let gazetteer = RegionGazetteer::from_config(&config.regions)?;
        tracing::debug!(regions = gazetteer.len(), "Region gazetteer loaded");

        Ok(Self {
            pool,
            gazetteer: Arc::new(gazetteer),
            min_followers: config.min_followers,
            recalculate_after: chrono::Duration::hours(config.recalculate_after_hours),
            activity_window: chrono::Duration::days(config.activity_window_days),
        })
    }

    pub fn gazetteer(&self) -> &RegionGazetteer {
        &self.gazetteer
    }

    pub fn min_followers(&self) -> i64 {
        self.min_followers
    }

    fn activity_since(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - self.activity_window).date_naive()
    }

    fn compute(&self, totals: &SubjectTotals) -> ComputedRanking {
        let inputs = ScoreInputs::from(totals);
        ComputedRanking {
            subject_id: totals.subject_id,
            score: score(&inputs),
            inputs,
            region: self.gazetteer.normalize(totals.location.as_deref()),
        }
    }

    /// Recompute one subject's ranking if its inputs moved
    ///
    /// Returns `None` for subjects below the follower threshold and the stored
    /// record unchanged when nothing relevant changed recently.
    pub async fn update_ranking(&self, subject_id: i64) -> Result<Option<RankingRecord>, RankingError> {
        self.refresh(subject_id, false).await
    }

    /// Unconditional recompute for one subject, looked up by key
    pub async fn recalculate(&self, key: &SubjectKey) -> Result<RankingRecord, RankingError> {
        let subject = subjects::get_subject_by_key(&self.pool, key).await?;

        self.refresh(subject.id, true)
            .await?
            .ok_or_else(|| RankingError::Ineligible {
                subject: key.to_string(),
                followers: subject.followers,
                min: self.min_followers,
            })
    }

    async fn refresh(&self, subject_id: i64, force: bool) -> Result<Option<RankingRecord>, RankingError> {
        let now = Utc::now();
        let totals = subjects::subject_totals(&self.pool, subject_id, self.activity_since(now)).await?;

        if totals.followers < self.min_followers {
            tracing::debug!(
                subject_id,
                followers = totals.followers,
                min = self.min_followers,
                "Subject below ranking threshold"
            );
            return Ok(None);
        }

        let computed = self.compute(&totals);
        let stored = fetch_ranking(&self.pool, subject_id).await?;

        if !force
            && !needs_update(
                stored.as_ref(),
                &computed.inputs,
                computed.region.as_deref(),
                now,
                self.recalculate_after,
            )
        {
            tracing::debug!(subject_id, "Ranking up to date");
            return Ok(stored);
        }

        let previous_region = stored.and_then(|r| r.region);

        let mut tx = self.pool.begin().await?;
        lock_rankings(&mut tx).await?;
        upsert_rankings(&mut tx, std::slice::from_ref(&computed)).await?;
        insert_snapshots(&mut tx, std::slice::from_ref(&computed)).await?;
        resort_global(&mut tx).await?;
        if let Some(region) = &computed.region {
            resort_region(&mut tx, region).await?;
        }
        if let Some(previous) = previous_region.filter(|p| Some(p) != computed.region.as_ref()) {
            resort_region(&mut tx, &previous).await?;
        }
        tx.commit().await?;

        tracing::info!(
            subject_id,
            score = computed.score,
            region = computed.region.as_deref().unwrap_or("-"),
            "Ranking updated"
        );

        fetch_ranking(&self.pool, subject_id)
            .await?
            .ok_or_else(|| RankingError::NotFound(format!("Ranking for subject {} vanished", subject_id)))
            .map(Some)
    }

    /// Rescore every eligible subject, drop rankings that fell below the
    /// threshold, then re-sort globally and per region once
    pub async fn recalculate_all(&self) -> Result<RecalculationSummary, RankingError> {
        let started = std::time::Instant::now();
        let since = self.activity_since(Utc::now());

        let totals = subjects::eligible_totals(&self.pool, self.min_followers, since).await?;
        let computed: Vec<ComputedRanking> = totals.iter().map(|t| self.compute(t)).collect();

        let mut tx = self.pool.begin().await?;
        lock_rankings(&mut tx).await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM rankings r
            USING subjects s
            WHERE r.subject_id = s.id AND s.followers < $1
            "#,
        )
        .bind(self.min_followers)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        upsert_rankings(&mut tx, &computed).await?;
        insert_snapshots(&mut tx, &computed).await?;
        resort_global(&mut tx).await?;
        resort_all_regions(&mut tx).await?;
        tx.commit().await?;

        let summary = RecalculationSummary {
            ranked: computed.len(),
            removed,
        };
        tracing::info!(
            ranked = summary.ranked,
            removed = summary.removed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Ranking recalculation completed"
        );

        Ok(summary)
    }

    pub async fn get_ranking(&self, key: &SubjectKey) -> Result<RankingView, RankingError> {
        let subject = subjects::get_subject_by_key(&self.pool, key).await?;
        let ranking = fetch_ranking(&self.pool, subject.id)
            .await?
            .ok_or_else(|| RankingError::NotFound(format!("Subject '{}' is not ranked", key)))?;

        let snapshot: Option<RankingSnapshot> = sqlx::query_as(
            r#"
            SELECT id, subject_id, score, followers, public_repos, total_stars, total_forks,
                   recent_commits, region, captured_at
            FROM ranking_snapshots
            WHERE subject_id = $1
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(subject.id)
        .fetch_optional(&self.pool)
        .await?;

        let is_current = is_representative(&ranking, snapshot.as_ref(), &subject);

        Ok(RankingView {
            username: subject.username,
            login: subject.login,
            ranking,
            is_current,
        })
    }

    /// A page of the global leaderboard, or of one region's when given
    pub async fn leaderboard(
        &self,
        region: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LeaderboardEntry>, i64), RankingError> {
        let region = region.map(|r| self.gazetteer.canonical(r).unwrap_or(r).to_string());

        let entries: Vec<LeaderboardEntry> = sqlx::query_as(
            r#"
            SELECT r.subject_id, s.username, s.login, s.avatar_url, r.score, r.global_rank,
                   r.region_rank, r.region, r.followers, r.total_stars
            FROM rankings r
            JOIN subjects s ON s.id = r.subject_id
            WHERE ($1::text IS NULL OR r.region = $1)
            ORDER BY CASE WHEN $1::text IS NULL THEN r.global_rank ELSE r.region_rank END
                     ASC NULLS LAST,
                     r.subject_id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(region.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rankings WHERE ($1::text IS NULL OR region = $1)")
                .bind(region.as_deref())
                .fetch_one(&self.pool)
                .await?;

        Ok((entries, total))
    }
}

async fn fetch_ranking(pool: &PgPool, subject_id: i64) -> Result<Option<RankingRecord>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {RANKING_COLUMNS} FROM rankings WHERE subject_id = $1"))
        .bind(subject_id)
        .fetch_optional(pool)
        .await
}

async fn lock_rankings(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(RANKINGS_LOCK_KEY)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Region rank is cleared on every write; the region re-sort restores it
async fn upsert_rankings(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[ComputedRanking],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO rankings (
            subject_id, score, region, region_rank, followers, public_repos, total_stars,
            total_forks, recent_commits, last_calculated_at
        )
        SELECT u.subject_id, u.score, u.region, NULL, u.followers, u.public_repos,
               u.total_stars, u.total_forks, u.recent_commits, NOW()
        FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::bigint[], $5::bigint[],
                    $6::bigint[], $7::bigint[], $8::bigint[])
            AS u(subject_id, score, region, followers, public_repos, total_stars, total_forks,
                 recent_commits)
        ON CONFLICT (subject_id) DO UPDATE SET
            score = EXCLUDED.score,
            region = EXCLUDED.region,
            region_rank = NULL,
            followers = EXCLUDED.followers,
            public_repos = EXCLUDED.public_repos,
            total_stars = EXCLUDED.total_stars,
            total_forks = EXCLUDED.total_forks,
            recent_commits = EXCLUDED.recent_commits,
            last_calculated_at = NOW(),
            updated_at = NOW()
        "#,
    )
    .bind(rows.iter().map(|r| r.subject_id).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.score).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.region.clone()).collect::<Vec<Option<String>>>())
    .bind(rows.iter().map(|r| r.inputs.followers).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.public_repos).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.total_stars).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.total_forks).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.recent_commits).collect::<Vec<_>>())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_snapshots(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[ComputedRanking],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO ranking_snapshots (
            subject_id, score, followers, public_repos, total_stars, total_forks,
            recent_commits, region
        )
        SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[],
                             $5::bigint[], $6::bigint[], $7::bigint[], $8::text[])
        "#,
    )
    .bind(rows.iter().map(|r| r.subject_id).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.score).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.followers).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.public_repos).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.total_stars).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.total_forks).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.inputs.recent_commits).collect::<Vec<_>>())
    .bind(rows.iter().map(|r| r.region.clone()).collect::<Vec<Option<String>>>())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn apply_ranks(
    tx: &mut Transaction<'_, Postgres>,
    column: RankColumn,
    ranks: &[(i64, i32)],
) -> Result<(), sqlx::Error> {
    if ranks.is_empty() {
        return Ok(());
    }

    let column = column.as_str();
    sqlx::query(&format!(
        r#"
        UPDATE rankings r
        SET {column} = u.rank
        FROM UNNEST($1::bigint[], $2::int4[]) AS u(subject_id, rank)
        WHERE r.subject_id = u.subject_id AND r.{column} IS DISTINCT FROM u.rank
        "#
    ))
    .bind(ranks.iter().map(|(id, _)| *id).collect::<Vec<_>>())
    .bind(ranks.iter().map(|(_, rank)| *rank).collect::<Vec<_>>())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn resort_global(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    let entries: Vec<(i64, i64)> = sqlx::query_as("SELECT subject_id, score FROM rankings")
        .fetch_all(&mut **tx)
        .await?;

    apply_ranks(tx, RankColumn::Global, &assign_ranks(&entries)).await
}

async fn resort_region(tx: &mut Transaction<'_, Postgres>, region: &str) -> Result<(), sqlx::Error> {
    let entries: Vec<(i64, i64)> =
        sqlx::query_as("SELECT subject_id, score FROM rankings WHERE region = $1")
            .bind(region)
            .fetch_all(&mut **tx)
            .await?;

    apply_ranks(tx, RankColumn::Region, &assign_ranks(&entries)).await
}

async fn resort_all_regions(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    let rows: Vec<(i64, i64, String)> =
        sqlx::query_as("SELECT subject_id, score, region FROM rankings WHERE region IS NOT NULL")
            .fetch_all(&mut **tx)
            .await?;

    let mut by_region: HashMap<String, Vec<(i64, i64)>> = HashMap::new();
    for (subject_id, score, region) in rows {
        by_region.entry(region).or_default().push((subject_id, score));
    }

    let ranks: Vec<(i64, i32)> = by_region.values().flat_map(|entries| assign_ranks(entries)).collect();
    apply_ranks(tx, RankColumn::Region, &ranks).await?;

    sqlx::query("UPDATE rankings SET region_rank = NULL WHERE region IS NULL AND region_rank IS NOT NULL")
        .execute(&mut **tx)
        .await?;

    Ok(())
}
