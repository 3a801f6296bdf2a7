//! Upstream REST payloads
//!
//! Only the fields the pipeline reads are modeled; everything else is ignored
//! on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubUser {
    pub login: String,
    pub id: i64,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub twitter_username: Option<String>,
    #[serde(default)]
    pub public_repos: i64,
    #[serde(default)]
    pub public_gists: i64,
    #[serde(default)]
    pub followers: i64,
    #[serde(default)]
    pub following: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubOrg {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubGist {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSocialAccount {
    pub provider: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubRepo {
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub homepage: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub stargazers_count: i64,
    #[serde(default)]
    pub forks_count: i64,
    #[serde(default)]
    pub watchers_count: i64,
    #[serde(default)]
    pub open_issues_count: i64,
    pub pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubEventRepo {
    pub name: String,
}

/// Public timeline event; `payload` shape depends on `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub repo: GithubEventRepo,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSearchUsers {
    pub total_count: i64,
    #[serde(default)]
    pub items: Vec<GithubSearchUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSearchUser {
    pub login: String,
}

/// Everything fetched for one subject before normalization
#[derive(Debug, Clone)]
pub struct RawHarvest {
    pub user: GithubUser,
    pub orgs: Vec<GithubOrg>,
    pub gists: Vec<GithubGist>,
    pub social_accounts: Vec<GithubSocialAccount>,
    pub repos: Vec<GithubRepo>,
    pub events: Vec<GithubEvent>,
}
