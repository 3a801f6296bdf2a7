//! Subject queries

pub mod get_profile;
pub mod list_repos;

pub use get_profile::{GetProfileError, GetProfileQuery, ProfileOutcome, RankingSummary, SubjectProfile};
pub use list_repos::{ListReposError, ListReposQuery};
