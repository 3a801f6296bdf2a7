//! Feature modules implementing the devrank API
//!
//! Each feature is a vertical slice with its own commands, queries and routes.
//!
//! # Features
//!
//! - **harvest**: Enqueue harvests, inspect jobs and queue metrics
//! - **rankings**: Leaderboards, per-subject rankings and recalculation
//! - **subjects**: Cached profile and repository projections
//!
//! Commands and queries implement the mediator pattern using the `mediator` crate.

pub mod harvest;
pub mod rankings;
pub mod shared;
pub mod subjects;

use axum::Router;
use std::sync::Arc;

use crate::cache::SubjectCache;
use crate::harvest::HarvestQueue;
use crate::ranking::RankingEngine;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub db: sqlx::PgPool,
    pub queue: Arc<dyn HarvestQueue>,
    pub ranking: RankingEngine,
    pub cache: SubjectCache,
    /// Age after which a profile read schedules a refresh
    pub stale_after: chrono::Duration,
}

/// Creates the API router with every feature mounted under its own prefix:
/// `/harvest`, `/rankings` and `/subjects`
pub fn router(state: FeatureState) -> Router<()> {
    let subjects_state = subjects::SubjectsState {
        db: state.db.clone(),
        queue: state.queue.clone(),
        cache: state.cache.clone(),
        stale_after: state.stale_after,
    };

    Router::new()
        .nest("/harvest", harvest::harvest_routes().with_state(state.queue.clone()))
        .nest("/rankings", rankings::rankings_routes().with_state(state.ranking.clone()))
        .nest("/subjects", subjects::subjects_routes().with_state(subjects_state))
}
