//! Upstream credential rotation with per-credential cooldown
//!
//! All bookkeeping sits behind one mutex. Callers only see [`Credential`]
//! handles and the four pool operations; tokens never reach logs.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CredentialConfig;

/// How often "no credential available" may be logged
const EXHAUSTED_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to one pooled token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    token: Arc<str>,
}

impl Credential {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(#{}, ****)", self.index)
    }
}

/// Exponential cooldown bounded by a floor and a ceiling
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub floor: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// `max(base * 2^(level-1), reset_hint, floor)`, capped at `max`
    pub fn cooldown(&self, level: u32, reset_hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(level.saturating_sub(1)).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor);

        exponential
            .max(reset_hint.unwrap_or(Duration::ZERO))
            .max(self.floor)
            .min(self.max)
    }
}

impl From<&CredentialConfig> for BackoffPolicy {
    fn from(config: &CredentialConfig) -> Self {
        Self {
            base: config.base_backoff(),
            floor: config.floor(),
            max: config.max_backoff(),
        }
    }
}

struct Slot {
    token: Arc<str>,
    cooldown_until: Option<Instant>,
    backoff_level: u32,
}

impl Slot {
    fn available_at(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(true, |until| until <= now)
    }
}

struct PoolState {
    slots: Vec<Slot>,
    cursor: usize,
    last_exhausted_log: Option<Instant>,
}

pub struct CredentialPool {
    policy: BackoffPolicy,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new<I, S>(tokens: I, policy: BackoffPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let slots = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| Slot {
                token: Arc::from(t),
                cooldown_until: None,
                backoff_level: 0,
            })
            .collect();

        Self {
            policy,
            state: Mutex::new(PoolState {
                slots,
                cursor: 0,
                last_exhausted_log: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next credential whose cooldown has elapsed, rotating fairly from the
    /// slot after the last one handed out
    pub fn acquire(&self) -> Option<Credential> {
        let now = Instant::now();
        let mut state = self.lock();
        let n = state.slots.len();

        for offset in 0..n {
            let index = (state.cursor + offset) % n;
            if state.slots[index].available_at(now) {
                state.cursor = (index + 1) % n;
                return Some(Credential {
                    index,
                    token: state.slots[index].token.clone(),
                });
            }
        }

        if n > 0 {
            let should_log = state
                .last_exhausted_log
                .map_or(true, |at| now.duration_since(at) >= EXHAUSTED_LOG_INTERVAL);
            if should_log {
                state.last_exhausted_log = Some(now);
                tracing::warn!(credentials = n, "No upstream credential available, all are cooling down");
            }
        }

        None
    }

    /// Record quota exhaustion; returns the cooldown applied
    pub fn mark_rate_limited(&self, credential: &Credential, reset_hint: Option<Duration>) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(credential.index) else {
            return Duration::ZERO;
        };

        slot.backoff_level = slot.backoff_level.saturating_add(1);
        let cooldown = self.policy.cooldown(slot.backoff_level, reset_hint);
        slot.cooldown_until = Some(now + cooldown);

        tracing::warn!(
            credential = credential.index,
            backoff_level = slot.backoff_level,
            cooldown_secs = cooldown.as_secs(),
            "Upstream credential rate limited"
        );

        cooldown
    }

    pub fn mark_success(&self, credential: &Credential) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(credential.index) {
            slot.backoff_level = 0;
            slot.cooldown_until = None;
        }
    }

    /// Time until the earliest cooldown expires; zero when one is free now,
    /// `None` for an empty pool
    pub fn soonest_available(&self) -> Option<Duration> {
        let now = Instant::now();
        let state = self.lock();
        state
            .slots
            .iter()
            .map(|slot| match slot.cooldown_until {
                Some(until) if until > now => until - now,
                _ => Duration::ZERO,
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(5),
            floor: Duration::from_secs(1),
            max: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_cooldown_uses_largest_bound() {
        let policy = policy();
        assert_eq!(policy.cooldown(1, Some(Duration::from_secs(30))), Duration::from_secs(30));
        assert_eq!(policy.cooldown(1, None), Duration::from_secs(5));
        assert_eq!(policy.cooldown(3, None), Duration::from_secs(20));
        assert_eq!(policy.cooldown(40, None), Duration::from_secs(3600));
        assert_eq!(
            policy.cooldown(1, Some(Duration::from_secs(7200))),
            Duration::from_secs(3600)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_is_fair() {
        let pool = CredentialPool::new(["a", "b", "c"], policy());
        let order: Vec<usize> = (0..4).filter_map(|_| pool.acquire()).map(|c| c.index()).collect();
        assert_eq!(order, vec![0, 1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_until_earliest_cooldown() {
        let pool = CredentialPool::new(["a", "b"], policy());
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        pool.mark_rate_limited(&a, Some(Duration::from_secs(30)));
        pool.mark_rate_limited(&b, Some(Duration::from_secs(10)));

        assert!(pool.acquire().is_none());
        assert_eq!(pool.soonest_available(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(pool.acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.acquire().map(|c| c.index()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let pool = CredentialPool::new(["a"], policy());
        let a = pool.acquire().unwrap();

        assert_eq!(pool.mark_rate_limited(&a, None), Duration::from_secs(5));
        assert_eq!(pool.mark_rate_limited(&a, None), Duration::from_secs(10));

        pool.mark_success(&a);
        assert_eq!(pool.soonest_available(), Some(Duration::ZERO));
        assert_eq!(pool.mark_rate_limited(&a, None), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_debug_hides_token() {
        let pool = CredentialPool::new(["ghp_secret", " "], policy());
        assert_eq!(pool.len(), 1);
        let cred = pool.acquire().unwrap();
        assert_eq!(format!("{:?}", cred), "Credential(#0, ****)");
    }
}
