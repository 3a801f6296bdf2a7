//! Helpers shared by the feature slices

pub mod pagination;

pub use pagination::{Paginated, PaginationMetadata, PaginationParams};
