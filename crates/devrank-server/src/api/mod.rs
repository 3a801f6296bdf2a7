//! Shared HTTP API types

pub mod response;
