//! Per-subject harvest job
//!
//! Steps run strictly in order, each reporting progress:
//! profile (10), extended profile (20), collections (40), activity (60),
//! persist (80), ranking (90), cache (100).
//!
//! `refresh` jobs read a single page of activity; `full` jobs read up to the
//! configured page bound.

use async_trait::async_trait;
use std::sync::Arc;

use super::client::GithubClient;
use super::github::RawHarvest;
use super::jobs::HarvestJob;
use super::normalize::normalize;
use super::worker::{JobHandler, ProgressReporter};
use super::HarvestError;
use crate::cache::SubjectCache;
use crate::config::HarvestConfig;
use crate::db::PersistenceGateway;
use crate::ranking::RankingEngine;
use devrank_common::JobKind;

const REFRESH_ACTIVITY_PAGES: u32 = 1;

pub struct HarvestPipeline {
    client: Arc<GithubClient>,
    gateway: PersistenceGateway,
    ranking: RankingEngine,
    cache: SubjectCache,
    activity_max_pages: u32,
    repo_max_pages: u32,
}

impl HarvestPipeline {
    pub fn new(
        client: Arc<GithubClient>,
        gateway: PersistenceGateway,
        ranking: RankingEngine,
        cache: SubjectCache,
        config: &HarvestConfig,
    ) -> Self {
        Self {
            client,
            gateway,
            ranking,
            cache,
            activity_max_pages: config.activity_max_pages,
            repo_max_pages: config.repo_max_pages,
        }
    }

    fn activity_pages(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Full => self.activity_max_pages,
            JobKind::Refresh => REFRESH_ACTIVITY_PAGES.min(self.activity_max_pages.max(1)),
        }
    }

    async fn run(&self, job: &HarvestJob, progress: &ProgressReporter) -> Result<(), HarvestError> {
        let subject = &job.subject;

        let user = self.client.get_user(subject).await?;
        progress.report(10).await;

        let orgs = self.client.get_user_orgs(subject).await?;
        let gists = self.client.get_user_gists(subject).await?;
        let social_accounts = self.client.get_social_accounts(subject).await?;
        progress.report(20).await;

        let repos = self.client.list_user_repos(subject, self.repo_max_pages).await?;
        progress.report(40).await;

        let events = self
            .client
            .list_user_events(subject, self.activity_pages(job.kind))
            .await?;
        progress.report(60).await;

        let harvest = normalize(RawHarvest {
            user,
            orgs,
            gists,
            social_accounts,
            repos,
            events,
        })?;

        let subject_id = self.gateway.save_harvest(&harvest).await?;
        progress.report(80).await;

        let ranking = self.ranking.update_ranking(subject_id).await?;
        progress.report(90).await;

        // Renamed accounts are stored under the login upstream returned
        if harvest.key != *subject {
            tracing::info!(requested = %subject, stored = %harvest.key, "Subject login changed upstream");
            self.cache.invalidate(subject).await;
        }
        progress.report(100).await;

        tracing::info!(
            subject_id,
            collections = harvest.collections.len(),
            activity_days = harvest.activity.len(),
            score = ranking.as_ref().map(|r| r.score),
            global_rank = ranking.as_ref().and_then(|r| r.global_rank),
            "Harvest finished"
        );

        Ok(())
    }
}

#[async_trait]
impl JobHandler for HarvestPipeline {
    async fn handle(&self, job: &HarvestJob, progress: &ProgressReporter) -> Result<(), HarvestError> {
        if let Err(e) = self.gateway.mark_fetching(&job.subject, true).await {
            tracing::warn!(error = %e, "Failed to flag subject as fetching");
        }

        let result = self.run(job, progress).await;

        if result.is_err() {
            if let Err(e) = self.gateway.mark_fetching(&job.subject, false).await {
                tracing::warn!(error = %e, "Failed to clear fetching flag");
            }
        }

        result
    }
}
