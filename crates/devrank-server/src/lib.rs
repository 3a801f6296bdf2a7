//! devrank server library
//!
//! Harvests public developer profiles from GitHub under a shared rate-limit
//! quota, persists them, and keeps global and per-region rankings.
//!
//! # Architecture
//!
//! - **harvest**: credential pool, rate-limited client, durable job queue and
//!   the worker pool that runs the harvest pipeline
//! - **db**: Postgres access; all harvest writes go through
//!   [`db::PersistenceGateway`] in one transaction per subject
//! - **ranking**: scoring, region resolution and rank re-sorting
//! - **lock** / **store**: TTL locks and cache on Redis (or in process)
//! - **scheduler**: periodic recalculation and discovery, one instance at a time
//! - **features**: axum routes in vertical slices (commands, queries, routes)
//!
//! # Example
//!
//! ```no_run
//! use devrank_server::{config::Config, db};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::run_migrations(&pool).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod harvest;
pub mod lock;
pub mod middleware;
pub mod models;
pub mod ranking;
pub mod scheduler;
pub mod store;

pub use error::{ApiResult, AppError};
