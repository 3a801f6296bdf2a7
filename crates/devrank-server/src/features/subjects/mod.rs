//! Subjects feature module
//!
//! Read-side projections of harvested subjects. Reads are served from the
//! subject cache when possible; a missing or stale subject schedules a harvest
//! instead of blocking on upstream.

pub mod queries;
pub mod routes;

use chrono::Duration;
use sqlx::PgPool;
use std::sync::Arc;

use crate::cache::SubjectCache;
use crate::harvest::HarvestQueue;

pub use routes::subjects_routes;

#[derive(Clone)]
pub struct SubjectsState {
    pub db: PgPool,
    pub queue: Arc<dyn HarvestQueue>,
    pub cache: SubjectCache,
    /// Age after which a read schedules a refresh
    pub stale_after: Duration,
}
