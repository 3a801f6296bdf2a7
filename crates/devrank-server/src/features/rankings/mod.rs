//! Rankings feature module
//!
//! Leaderboards, a subject's ranking, and on-demand recalculation.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::rankings_routes;
