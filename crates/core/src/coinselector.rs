//! Short-TTL soft lock on UTXOs during coin selection (§4.4).
//!
//! A mapping `key -> expiry`. Only one writer touches it at a time in
//! practice, held under the facade's global write lock, so the map
//! itself only needs to be `Send` behind a single `RwLock`, the same
//! granularity the spec's other per-subsystem locks use (§5
//! "Sub-locks").

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

/// `txID ∥ decimalIndex`, matching the key shape §4.4 specifies.
pub fn lock_key(tx_id: &str, index: u32) -> String {
    format!("{tx_id}{index}")
}

#[derive(Default)]
pub struct CoinSelector {
    locks: RwLock<HashMap<String, SystemTime>>,
}

impl CoinSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every lock whose expiry is in the past.
    pub async fn prune_expired(&self) {
        let now = SystemTime::now();
        self.locks.write().await.retain(|_, expiry| *expiry > now);
    }

    /// True iff `key` is present and its expiry is still in the future.
    pub async fn is_locked(&self, key: &str) -> bool {
        let now = SystemTime::now();
        self.locks
            .read()
            .await
            .get(key)
            .is_some_and(|expiry| *expiry > now)
    }

    /// Overwrites any existing lock for `key` with a fresh `ttl`.
    pub async fn lock(&self, key: &str, ttl: Duration) {
        self.locks
            .write()
            .await
            .insert(key.to_string(), SystemTime::now() + ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn p7_locked_key_excludes_concurrent_selection() {
        let selector = CoinSelector::new();
        let key = lock_key("aabb", 0);
        selector.lock(&key, Duration::from_secs(10)).await;
        assert!(selector.is_locked(&key).await);
        assert!(!selector.is_locked(&lock_key("ccdd", 1)).await);
    }

    #[tokio::test]
    async fn prune_expired_drops_past_locks_only() {
        let selector = CoinSelector::new();
        let expired_key = lock_key("expired", 0);
        let live_key = lock_key("live", 0);
        {
            let mut locks = selector.locks.write().await;
            locks.insert(expired_key.clone(), SystemTime::now() - Duration::from_secs(1));
            locks.insert(live_key.clone(), SystemTime::now() + Duration::from_secs(60));
        }
        selector.prune_expired().await;
        assert!(!selector.is_locked(&expired_key).await);
        assert!(selector.is_locked(&live_key).await);
    }

    #[tokio::test]
    async fn lock_overwrites_previous_expiry() {
        let selector = CoinSelector::new();
        let key = lock_key("aabb", 2);
        selector.lock(&key, Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!selector.is_locked(&key).await);
        selector.lock(&key, Duration::from_secs(10)).await;
        assert!(selector.is_locked(&key).await);
    }
}
