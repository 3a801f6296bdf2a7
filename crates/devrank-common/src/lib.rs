//! Devrank Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the devrank workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`DevrankError`] and the crate-wide [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by `DEVRANK_LOG_*` variables
//! - **Types**: validated subject keys and harvest requests shared by the server and its tests
//!
//! # Example
//!
//! ```no_run
//! use devrank_common::{Result, SubjectKey};
//!
//! fn lookup(raw: &str) -> Result<SubjectKey> {
//!     let key = SubjectKey::parse(raw)?;
//!     Ok(key)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DevrankError, Result};
pub use types::{HarvestRequest, JobKind, SubjectKey};
