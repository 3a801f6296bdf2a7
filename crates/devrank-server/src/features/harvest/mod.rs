//! Harvest feature module
//!
//! Enqueue harvests and inspect the queue. Handlers talk to the queue through
//! the [`HarvestQueue`](crate::harvest::HarvestQueue) trait only.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::harvest_routes;
