//! Harvest commands

pub mod enqueue;

pub use enqueue::{EnqueueHarvestCommand, EnqueueHarvestError, EnqueueHarvestResponse};
