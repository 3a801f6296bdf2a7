//! Rate-limited upstream client
//!
//! Every call borrows a credential from the [`CredentialPool`]. Quota
//! exhaustion (403/429 with `x-ratelimit-remaining: 0`) puts that credential on
//! cooldown and the call is retried with the next one, at most once per pooled
//! credential. When the whole pool is cooling down the client sleeps once,
//! bounded by `max_exhausted_wait`, and makes a final attempt with whatever is
//! available, anonymous included.

use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::credentials::{Credential, CredentialPool};
use super::github::{
    GithubEvent, GithubGist, GithubOrg, GithubRepo, GithubSearchUsers, GithubSocialAccount,
    GithubUser,
};
use crate::config::GithubConfig;
use devrank_common::SubjectKey;

const PER_PAGE: u32 = 100;
const API_VERSION: &str = "2022-11-28";

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream resource not found: {0}")]
    NotFound(String),

    #[error("Upstream quota exhausted for {path}, resets in {retry_after:?}")]
    QuotaExhausted { path: String, retry_after: Duration },

    #[error("Upstream server error {status} for {path}")]
    Server { status: u16, path: String },

    #[error("Upstream returned {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode upstream payload from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl UpstreamError {
    /// Whether a later job attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::NotFound(_) => false,
            UpstreamError::Status { status, .. } => matches!(status, 403 | 408 | 429),
            UpstreamError::QuotaExhausted { .. }
            | UpstreamError::Server { .. }
            | UpstreamError::Transport(_)
            | UpstreamError::Decode { .. } => true,
        }
    }
}

/// Quota state read from a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quota {
    Ok,
    Exhausted(Option<Duration>),
}

fn header_i64(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn quota_of(response: &Response) -> Quota {
    let status = response.status();
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return Quota::Ok;
    }
    if header_i64(response, "x-ratelimit-remaining") != Some(0) {
        return Quota::Ok;
    }

    let reset_hint = header_i64(response, "x-ratelimit-reset").map(|reset_epoch| {
        let secs = reset_epoch - chrono::Utc::now().timestamp();
        Duration::from_secs(secs.max(0) as u64)
    });
    Quota::Exhausted(reset_hint)
}

pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    pool: Arc<CredentialPool>,
    max_exhausted_wait: Duration,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, pool: Arc<CredentialPool>) -> Result<Self, UpstreamError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            header::HeaderValue::from_static(API_VERSION),
        );

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pool,
            max_exhausted_wait: Duration::from_secs(config.max_exhausted_wait_secs),
        })
    }

    /// Override the exhausted-pool sleep ceiling
    pub fn with_max_exhausted_wait(mut self, wait: Duration) -> Self {
        self.max_exhausted_wait = wait;
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    async fn request(
        &self,
        path: &str,
        query: &[(&str, String)],
        credential: Option<&Credential>,
    ) -> Result<Response, UpstreamError> {
        let mut request = self.http.get(format!("{}{}", self.base_url, path)).query(query);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.token());
        }
        Ok(request.send().await?)
    }

    /// Send with rotation; the returned response is never a quota exhaustion
    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<Response, UpstreamError> {
        let mut reset_hint = Duration::ZERO;

        for _ in 0..self.pool.len() {
            let Some(credential) = self.pool.acquire() else {
                break;
            };

            let response = self.request(path, query, Some(&credential)).await?;
            match quota_of(&response) {
                Quota::Exhausted(hint) => {
                    self.pool.mark_rate_limited(&credential, hint);
                    reset_hint = reset_hint.max(hint.unwrap_or_default());
                    tracing::debug!(path, credential = credential.index(), "Rotating after quota exhaustion");
                }
                Quota::Ok => {
                    self.pool.mark_success(&credential);
                    return Ok(response);
                }
            }
        }

        if !self.pool.is_empty() {
            let wait = reset_hint
                .max(self.pool.soonest_available().unwrap_or_default())
                .min(self.max_exhausted_wait);
            tracing::warn!(path, wait_secs = wait.as_secs(), "Credential pool exhausted, waiting before final attempt");
            tokio::time::sleep(wait).await;
        }

        let credential = self.pool.acquire();
        let response = self.request(path, query, credential.as_ref()).await?;
        match quota_of(&response) {
            Quota::Exhausted(hint) => {
                if let Some(credential) = &credential {
                    self.pool.mark_rate_limited(credential, hint);
                }
                Err(UpstreamError::QuotaExhausted {
                    path: path.to_string(),
                    retry_after: hint
                        .or_else(|| self.pool.soonest_available())
                        .unwrap_or(self.max_exhausted_wait),
                })
            }
            Quota::Ok => {
                if let Some(credential) = &credential {
                    self.pool.mark_success(credential);
                }
                Ok(response)
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let response = self.send(path, query).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound(path.to_string()));
        }
        if status.is_server_error() {
            return Err(UpstreamError::Server {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| UpstreamError::Decode {
            path: path.to_string(),
            source,
        })
    }

    fn page_query(page: u32) -> Vec<(&'static str, String)> {
        vec![("per_page", PER_PAGE.to_string()), ("page", page.to_string())]
    }

    pub async fn get_user(&self, login: &SubjectKey) -> Result<GithubUser, UpstreamError> {
        self.get_json(&format!("/users/{}", login), &[]).await
    }

    pub async fn get_user_orgs(&self, login: &SubjectKey) -> Result<Vec<GithubOrg>, UpstreamError> {
        self.get_json(&format!("/users/{}/orgs", login), &Self::page_query(1))
            .await
    }

    pub async fn get_user_gists(&self, login: &SubjectKey) -> Result<Vec<GithubGist>, UpstreamError> {
        self.get_json(&format!("/users/{}/gists", login), &Self::page_query(1))
            .await
    }

    pub async fn get_social_accounts(
        &self,
        login: &SubjectKey,
    ) -> Result<Vec<GithubSocialAccount>, UpstreamError> {
        self.get_json(&format!("/users/{}/social_accounts", login), &[])
            .await
    }

    /// Owned repositories, following pages until a short page or `max_pages`
    pub async fn list_user_repos(
        &self,
        login: &SubjectKey,
        max_pages: u32,
    ) -> Result<Vec<GithubRepo>, UpstreamError> {
        let path = format!("/users/{}/repos", login);
        let mut repos = Vec::new();

        for page in 1..=max_pages.max(1) {
            let mut query = Self::page_query(page);
            query.push(("type", "owner".to_string()));
            let batch: Vec<GithubRepo> = self.get_json(&path, &query).await?;
            let short = batch.len() < PER_PAGE as usize;
            repos.extend(batch);
            if short {
                break;
            }
        }

        Ok(repos)
    }

    /// Recent public events; stops on an empty page or when upstream reports
    /// pagination exhausted (422)
    pub async fn list_user_events(
        &self,
        login: &SubjectKey,
        max_pages: u32,
    ) -> Result<Vec<GithubEvent>, UpstreamError> {
        let path = format!("/users/{}/events/public", login);
        let mut events = Vec::new();

        for page in 1..=max_pages.max(1) {
            let batch: Vec<GithubEvent> = match self.get_json(&path, &Self::page_query(page)).await {
                Ok(batch) => batch,
                Err(UpstreamError::Status { status: 422, .. }) => {
                    tracing::debug!(subject = %login, page, "Event pagination exhausted");
                    break;
                }
                Err(e) => return Err(e),
            };
            if batch.is_empty() {
                break;
            }
            events.extend(batch);
        }

        Ok(events)
    }

    /// Logins located in `location` with at least `min_followers`
    pub async fn search_users_by_location(
        &self,
        location: &str,
        min_followers: i64,
        max_pages: u32,
    ) -> Result<Vec<String>, UpstreamError> {
        let q = format!("location:\"{}\" followers:>={}", location, min_followers);
        let mut logins = Vec::new();

        for page in 1..=max_pages.max(1) {
            let mut query = Self::page_query(page);
            query.push(("q", q.clone()));
            let result: GithubSearchUsers = self.get_json("/search/users", &query).await?;
            let short = result.items.len() < PER_PAGE as usize;
            logins.extend(result.items.into_iter().map(|u| u.login));
            if short {
                break;
            }
        }

        Ok(logins)
    }
}
