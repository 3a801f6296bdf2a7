//! Common test utilities for devrank integration tests
//!
//! Database-backed tests start a disposable PostgreSQL container with the
//! migrations applied. They need Docker and are `#[ignore]`d by default:
//!
//! ```text
//! cargo test -p devrank-server -- --ignored
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

use devrank_common::SubjectKey;
use devrank_server::cache::SubjectCache;
use devrank_server::config::RankingConfig;
use devrank_server::harvest::normalize::NormalizedHarvest;
use devrank_server::models::{ActivityDay, CollectionData, SubjectData};
use devrank_server::store::MemoryStore;

pub const POSTGRES_TAG: &str = "16-alpine";

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(POSTGRES_TAG)
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("postgresql://postgres:postgres@{}:{}/postgres", host, port))
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

pub fn memory_cache() -> SubjectCache {
    SubjectCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(60))
}

pub fn ranking_config() -> RankingConfig {
    RankingConfig {
        min_followers: 31,
        recalculate_after_hours: 24,
        activity_window_days: 90,
        regions: Vec::new(),
    }
}

/// A harvest with one collection and one day of activity
pub fn harvest(login: &str, followers: i64, location: Option<&str>) -> NormalizedHarvest {
    let key = SubjectKey::parse(login).expect("valid login");

    NormalizedHarvest {
        key,
        subject: SubjectData {
            login: login.to_string(),
            followers,
            public_repos: 3,
            location: location.map(str::to_string),
            ..Default::default()
        },
        collections: vec![CollectionData {
            name: "tool".into(),
            full_name: format!("{}/tool", login),
            stars: 10,
            forks: 2,
            ..Default::default()
        }],
        activity: vec![ActivityDay {
            day: Utc::now().date_naive(),
            commits: 5,
            pull_requests: 0,
            issues: 0,
        }],
    }
}

/// One stored day of activity
#[derive(Debug, FromRow)]
pub struct ActivityRow {
    pub day: NaiveDate,
    pub commits: i32,
    pub pull_requests: i32,
    pub issues: i32,
}

/// A subject's stored activity, oldest day first
pub async fn activity_days(pool: &PgPool, subject_id: i64) -> Vec<ActivityRow> {
    sqlx::query_as::<_, ActivityRow>(
        "SELECT day, commits, pull_requests, issues FROM activity_records WHERE subject_id = $1 ORDER BY day",
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await
    .expect("activity rows")
}
