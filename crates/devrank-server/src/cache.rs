//! Read-side cache for subject projections
//!
//! Key layout: `user:{key}:profile` and `user:{key}:repos:{page}:{per_page}`.
//! Every failure is logged and swallowed; the database stays authoritative and
//! entries carry a TTL as a fallback for missed invalidations.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::store::SharedStore;
use devrank_common::SubjectKey;

#[derive(Clone)]
pub struct SubjectCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

pub fn profile_key(subject: &SubjectKey) -> String {
    format!("user:{}:profile", subject)
}

pub fn repos_key(subject: &SubjectKey, page: i64, per_page: i64) -> String {
    format!("user:{}:repos:{}:{}", subject, page, per_page)
}

impl SubjectCache {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(key, &raw, self.ttl).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Drop the profile and every cached repository page of a subject
    pub async fn invalidate(&self, subject: &SubjectKey) {
        let profile = profile_key(subject);
        if let Err(e) = self.store.delete(&profile).await {
            tracing::warn!(subject = %subject, error = %e, "Failed to invalidate cached profile");
        }

        let pattern = format!("user:{}:repos:*", subject);
        match self.store.delete_matching(&pattern).await {
            Ok(removed) => {
                tracing::debug!(subject = %subject, removed, "Invalidated cached repository pages")
            }
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "Failed to invalidate cached repository pages")
            }
        }
    }
}
