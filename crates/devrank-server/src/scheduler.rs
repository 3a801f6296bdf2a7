//! Recurring cluster-wide jobs
//!
//! Every cycle runs the full ranking recalculation and, when locations are
//! configured, upstream discovery of new subjects. Each runs under its own
//! distributed lock so only one instance in the cluster performs it.

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::db::{subjects, DbResult};
use crate::harvest::{GithubClient, HarvestQueue};
use crate::lock::{DistributedLock, LockOutcome, DISCOVERY_LOCK, RANKING_UPDATE_LOCK};
use crate::ranking::RankingEngine;
use devrank_common::{HarvestRequest, JobKind, SubjectKey};

/// What one step of a cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed,
    /// Another instance holds the step's lock
    Skipped,
    /// Nothing configured for this step
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub ranking: StepOutcome,
    pub discovery: StepOutcome,
    /// Jobs created by discovery
    pub enqueued: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
    lock: DistributedLock,
    ranking: RankingEngine,
    queue: Arc<dyn HarvestQueue>,
    client: Arc<GithubClient>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        lock: DistributedLock,
        ranking: RankingEngine,
        queue: Arc<dyn HarvestQueue>,
        client: Arc<GithubClient>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            lock,
            ranking,
            queue,
            client,
            config,
        }
    }

    fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.config.lock_ttl_secs)
    }

    /// One scheduled cycle; lock contention and step failures are logged and
    /// reported, never propagated, so the next cycle always runs
    pub async fn run_cycle(&self) -> CycleReport {
        let ranking = match self
            .lock
            .run_exclusively(RANKING_UPDATE_LOCK, self.lock_ttl(), || self.ranking.recalculate_all())
            .await
        {
            Ok(LockOutcome::Executed(Ok(summary))) => {
                tracing::info!(ranked = summary.ranked, removed = summary.removed, "Scheduled ranking update finished");
                StepOutcome::Completed
            }
            Ok(LockOutcome::Executed(Err(e))) => {
                tracing::error!(error = %e, "Scheduled ranking update failed");
                StepOutcome::Failed
            }
            Ok(LockOutcome::Skipped) => StepOutcome::Skipped,
            Err(e) => {
                tracing::error!(error = %e, "Could not take ranking update lock");
                StepOutcome::Failed
            }
        };

        if self.config.discovery_locations.is_empty() {
            return CycleReport {
                ranking,
                discovery: StepOutcome::Disabled,
                enqueued: 0,
            };
        }

        let (discovery, enqueued) = match self
            .lock
            .run_exclusively(DISCOVERY_LOCK, self.lock_ttl(), || self.discover())
            .await
        {
            Ok(LockOutcome::Executed(Ok(enqueued))) => {
                tracing::info!(enqueued, "Discovery finished");
                (StepOutcome::Completed, enqueued)
            }
            Ok(LockOutcome::Executed(Err(e))) => {
                tracing::error!(error = %e, "Discovery failed");
                (StepOutcome::Failed, 0)
            }
            Ok(LockOutcome::Skipped) => (StepOutcome::Skipped, 0),
            Err(e) => {
                tracing::error!(error = %e, "Could not take discovery lock");
                (StepOutcome::Failed, 0)
            }
        };

        CycleReport {
            ranking,
            discovery,
            enqueued,
        }
    }

    /// Search each configured location and enqueue full harvests for subjects
    /// never seen before; returns how many jobs were created. A failed search
    /// only drops that location's candidates.
    pub async fn discover(&self) -> DbResult<usize> {
        let mut candidates: Vec<String> = Vec::new();

        for location in &self.config.discovery_locations {
            match self
                .client
                .search_users_by_location(
                    location,
                    self.config.discovery_min_followers,
                    self.config.discovery_max_pages,
                )
                .await
            {
                Ok(logins) => {
                    tracing::debug!(location = %location, found = logins.len(), "Discovery search finished");
                    candidates.extend(
                        logins
                            .iter()
                            .filter_map(|login| SubjectKey::parse(login).ok())
                            .map(String::from),
                    );
                }
                Err(e) => tracing::warn!(location = %location, error = %e, "Discovery search failed"),
            }
        }

        candidates.sort();
        candidates.dedup();

        let unknown = subjects::unknown_usernames(&self.pool, &candidates).await?;

        let mut enqueued = 0;
        for username in unknown {
            let Ok(subject) = SubjectKey::parse(&username) else {
                continue;
            };
            match self.queue.enqueue(&HarvestRequest::new(subject, JobKind::Full)).await {
                Ok(outcome) if !outcome.duplicate => enqueued += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(subject = %username, error = %e, "Failed to enqueue discovered subject"),
            }
        }

        Ok(enqueued)
    }

    /// Run cycles every `interval_secs` until `shutdown` fires; the first cycle
    /// runs one interval after start
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(interval_secs = period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }

            tracing::info!("Scheduler stopped");
        })
    }
}
