//! Harvest queue queries

pub mod get_job;
pub mod get_metrics;
pub mod list_jobs;

pub use get_job::{GetHarvestJobError, GetHarvestJobQuery};
pub use get_metrics::{GetQueueMetricsError, GetQueueMetricsQuery};
pub use list_jobs::{ListHarvestJobsError, ListHarvestJobsQuery};
