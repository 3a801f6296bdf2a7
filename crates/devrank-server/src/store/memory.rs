//! In-process [`SharedStore`] for single-instance deployments and tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{SharedStore, StoreResult};

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Glob match supporting `*` only, which is all the cache key layout uses
fn glob_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| e.expires_at > now && e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_matches(pattern, key));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("user:octocat:repos:*", "user:octocat:repos:1:30"));
        assert!(!glob_matches("user:octocat:repos:*", "user:octocat:profile"));
        assert!(glob_matches("user:*:profile", "user:octocat:profile"));
        assert!(glob_matches("exact", "exact"));
        assert!(!glob_matches("exact", "exactly"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_expiry() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.set_if_absent("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert!(!store.delete_if_equals("lock", "a").await.unwrap());
        assert!(store.delete_if_equals("lock", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("user:a:repos:1:30", "x", ttl).await.unwrap();
        store.set_ex("user:a:repos:2:30", "x", ttl).await.unwrap();
        store.set_ex("user:a:profile", "x", ttl).await.unwrap();

        assert_eq!(store.delete_matching("user:a:repos:*").await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
    }
}
