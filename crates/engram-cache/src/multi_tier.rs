//! Coordinated reads and writes across the three cache tiers.
//!
//! Read path: L1, then L2, then L3, promoting any hit into the faster tiers.
//! Write path: L1 synchronously, L2/L3 fire-and-forget. Remote tier failures
//! are logged and treated as misses; they never propagate to callers.

use crate::l1::L1Cache;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot, Tier};
use engram_types::ports::CacheTier;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for a multi-tier cache.
#[derive(Debug, Clone)]
pub struct MultiTierConfig {
    /// Maximum entries held in L1.
    pub l1_capacity: usize,
    /// TTL applied when a `set` does not specify one.
    pub default_ttl: Duration,
    /// How often the background sweeper purges expired L1 entries.
    pub sweep_interval: Duration,
}

impl Default for MultiTierConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1000,
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// L1 in-process cache coordinated with optional external L2/L3 tiers.
pub struct MultiTierCache {
    l1: Arc<L1Cache>,
    l2: Option<Arc<dyn CacheTier>>,
    l3: Option<Arc<dyn CacheTier>>,
    metrics: Arc<CacheMetrics>,
    default_ttl: Duration,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MultiTierCache {
    /// Create a cache over the given external tiers. Either tier may be
    /// absent; lookups simply skip it.
    pub fn new(
        config: MultiTierConfig,
        l2: Option<Arc<dyn CacheTier>>,
        l3: Option<Arc<dyn CacheTier>>,
    ) -> Self {
        Self {
            l1: Arc::new(L1Cache::new(config.l1_capacity)),
            l2,
            l3,
            metrics: Arc::new(CacheMetrics::default()),
            default_ttl: config.default_ttl,
            sweep_interval: config.sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Look up a key, checking L1, then L2, then L3.
    ///
    /// A hit in a slower tier is promoted into every faster tier before
    /// returning. Tier errors are logged and treated as misses.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.l1.get(key) {
            self.metrics.hit(Tier::L1);
            return Some(value);
        }
        self.metrics.miss(Tier::L1);

        if let Some(l2) = &self.l2 {
            match l2.get(key).await {
                Ok(Some(value)) => {
                    self.metrics.hit(Tier::L2);
                    self.l1.insert(key.to_string(), value.clone(), self.default_ttl);
                    return Some(value);
                }
                Ok(None) => self.metrics.miss(Tier::L2),
                Err(e) => {
                    self.metrics.miss(Tier::L2);
                    warn!(key, error = %e, "L2 get failed, treating as miss");
                }
            }
        }

        if let Some(l3) = &self.l3 {
            match l3.get(key).await {
                Ok(Some(value)) => {
                    self.metrics.hit(Tier::L3);
                    self.promote_from_l3(key, &value);
                    return Some(value);
                }
                Ok(None) => self.metrics.miss(Tier::L3),
                Err(e) => {
                    self.metrics.miss(Tier::L3);
                    warn!(key, error = %e, "L3 get failed, treating as miss");
                }
            }
        }
        None
    }

    /// Write a value to all tiers. L1 is written synchronously; L2/L3 writes
    /// are spawned fire-and-forget, with failures logged.
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.l1.insert(key.to_string(), value.clone(), ttl);
        for (name, tier) in [("L2", &self.l2), ("L3", &self.l3)] {
            if let Some(tier) = tier {
                let tier = Arc::clone(tier);
                let key = key.to_string();
                let value = value.clone();
                tokio::spawn(async move {
                    if let Err(e) = tier.set(&key, value, ttl.as_secs()).await {
                        warn!(key = %key, tier = name, error = %e, "Cache tier write failed");
                    }
                });
            }
        }
    }

    /// Write a value through L1 up to (and including) the chosen tier.
    ///
    /// `Tier::L1` writes only the in-process tier; `Tier::L2` also writes L2;
    /// `Tier::L3` behaves like `set`. Remote writes are fire-and-forget.
    pub async fn set_tiered(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
        tier: Tier,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.l1.insert(key.to_string(), value.clone(), ttl);
        let targets: &[(&str, &Option<Arc<dyn CacheTier>>)] = match tier {
            Tier::L1 => &[],
            Tier::L2 => &[("L2", &self.l2)],
            Tier::L3 => &[("L2", &self.l2), ("L3", &self.l3)],
        };
        for (name, target) in targets {
            if let Some(target) = target {
                let target = Arc::clone(target);
                let name = *name;
                let key = key.to_string();
                let value = value.clone();
                tokio::spawn(async move {
                    if let Err(e) = target.set(&key, value, ttl.as_secs()).await {
                        warn!(key = %key, tier = name, error = %e, "Cache tier write failed");
                    }
                });
            }
        }
    }

    /// Remove a key from L1 synchronously and from L2/L3 best-effort.
    pub async fn delete(&self, key: &str) {
        self.l1.remove(key);
        for (name, tier) in [("L2", &self.l2), ("L3", &self.l3)] {
            if let Some(tier) = tier {
                if let Err(e) = tier.delete(key).await {
                    warn!(key, tier = name, error = %e, "Cache tier delete failed");
                }
            }
        }
    }

    /// Clear keys matching a substring pattern (or everything) from L1, and
    /// pass the call through to L2/L3 best-effort.
    pub async fn clear(&self, pattern: Option<&str>) {
        self.l1.clear(pattern);
        for (name, tier) in [("L2", &self.l2), ("L3", &self.l3)] {
            if let Some(tier) = tier {
                if let Err(e) = tier.clear(pattern).await {
                    warn!(tier = name, error = %e, "Cache tier clear failed");
                }
            }
        }
    }

    /// Read-only metrics snapshot.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of entries currently held in L1.
    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }

    /// Start the background task that periodically purges expired L1 entries.
    /// Idempotent; a second call is a no-op.
    pub fn start_sweeper(&self) {
        let mut guard = match self.sweeper.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let l1 = Arc::clone(&self.l1);
        let interval = self.sweep_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                l1.sweep();
                debug!(remaining = l1.len(), "L1 sweep complete");
            }
        }));
    }

    /// Stop the background sweeper if it is running.
    pub fn shutdown(&self) {
        let mut guard = match self.sweeper.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    fn promote_from_l3(&self, key: &str, value: &serde_json::Value) {
        self.l1
            .insert(key.to_string(), value.clone(), self.default_ttl);
        if let Some(l2) = &self.l2 {
            let l2 = Arc::clone(l2);
            let key = key.to_string();
            let value = value.clone();
            let ttl = self.default_ttl.as_secs();
            tokio::spawn(async move {
                if let Err(e) = l2.set(&key, value, ttl).await {
                    warn!(key = %key, error = %e, "L2 promotion failed");
                }
            });
        }
    }
}

impl Drop for MultiTierCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use engram_types::error::{MemoryError, MemoryResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory CacheTier double that counts calls and can be told to fail.
    #[derive(Default)]
    struct MockTier {
        store: DashMap<String, serde_json::Value>,
        gets: AtomicUsize,
        sets: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
    }

    impl MockTier {
        fn seeded(key: &str, value: serde_json::Value) -> Arc<Self> {
            let tier = Self::default();
            tier.store.insert(key.to_string(), value);
            Arc::new(tier)
        }

        fn get_calls(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }

        fn set_calls(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }

        fn fail(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> MemoryResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(MemoryError::Cache("tier unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheTier for MockTier {
        async fn get(&self, key: &str) -> MemoryResult<Option<serde_json::Value>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.store.get(key).map(|v| v.clone()))
        }

        async fn set(
            &self,
            key: &str,
            value: serde_json::Value,
            _ttl_secs: u64,
        ) -> MemoryResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.store.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> MemoryResult<()> {
            self.check()?;
            self.store.remove(key);
            Ok(())
        }

        async fn clear(&self, pattern: Option<&str>) -> MemoryResult<()> {
            self.check()?;
            match pattern {
                Some(p) => self.store.retain(|k, _| !k.contains(p)),
                None => self.store.clear(),
            }
            Ok(())
        }

        async fn exists(&self, key: &str) -> MemoryResult<bool> {
            self.check()?;
            Ok(self.store.contains_key(key))
        }
    }

    fn cache_with(
        l2: Option<Arc<MockTier>>,
        l3: Option<Arc<MockTier>>,
    ) -> MultiTierCache {
        MultiTierCache::new(
            MultiTierConfig::default(),
            l2.map(|t| t as Arc<dyn CacheTier>),
            l3.map(|t| t as Arc<dyn CacheTier>),
        )
    }

    #[tokio::test]
    async fn test_l1_only_roundtrip() {
        let cache = cache_with(None, None);
        cache.set("k", json!({"n": 1}), None).await;
        assert_eq!(cache.get("k").await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_l3_hit_promotes_to_l1_and_l2() {
        let l2 = Arc::new(MockTier::default());
        let l3 = MockTier::seeded("k", json!("v"));
        let cache = cache_with(Some(Arc::clone(&l2)), Some(Arc::clone(&l3)));

        assert_eq!(cache.get("k").await, Some(json!("v")));
        let l3_gets = l3.get_calls();
        assert_eq!(l3_gets, 1);

        // Give the fire-and-forget L2 promotion a chance to land.
        tokio::task::yield_now().await;

        // Second get is served from L1: no further remote calls.
        assert_eq!(cache.get("k").await, Some(json!("v")));
        assert_eq!(l3.get_calls(), l3_gets);
        let snap = cache.metrics();
        assert_eq!(snap.l1_hits, 1);
        assert_eq!(snap.l3_hits, 1);
    }

    #[tokio::test]
    async fn test_l2_hit_promotes_to_l1() {
        let l2 = MockTier::seeded("k", json!(42));
        let cache = cache_with(Some(Arc::clone(&l2)), None);
        assert_eq!(cache.get("k").await, Some(json!(42)));
        assert_eq!(cache.get("k").await, Some(json!(42)));
        assert_eq!(l2.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_tier_failure_degrades_to_miss() {
        let l2 = Arc::new(MockTier::default());
        l2.fail();
        let l3 = MockTier::seeded("k", json!("v"));
        let cache = cache_with(Some(l2), Some(l3));
        // L2 errors out, L3 still answers.
        assert_eq!(cache.get("k").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_all_tiers_miss() {
        let cache = cache_with(Some(Arc::new(MockTier::default())), None);
        assert_eq!(cache.get("absent").await, None);
        let snap = cache.metrics();
        assert_eq!(snap.l1_misses, 1);
        assert_eq!(snap.l2_misses, 1);
        assert_eq!(snap.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_set_fans_out_to_remote_tiers() {
        let l2 = Arc::new(MockTier::default());
        let l3 = Arc::new(MockTier::default());
        let cache = cache_with(Some(Arc::clone(&l2)), Some(Arc::clone(&l3)));
        cache.set("k", json!("v"), None).await;
        // Fire-and-forget writes; wait for the spawned tasks.
        for _ in 0..10 {
            if l2.set_calls() == 1 && l3.set_calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(l2.set_calls(), 1);
        assert_eq!(l3.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_all_tiers() {
        let l2 = MockTier::seeded("k", json!("v"));
        let cache = cache_with(Some(Arc::clone(&l2)), None);
        // Promote into L1 first so both tiers hold the value.
        assert_eq!(cache.get("k").await, Some(json!("v")));
        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
        assert!(!l2.store.contains_key("k"));
    }

    #[tokio::test]
    async fn test_clear_pattern_passthrough() {
        let l2 = MockTier::seeded("recall:a", json!(1));
        let cache = cache_with(Some(Arc::clone(&l2)), None);
        cache.set("recall:a", json!(1), None).await;
        cache.set("stats:b", json!(2), None).await;
        // Let the fire-and-forget L2 writes land before clearing.
        for _ in 0..10 {
            if l2.set_calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cache.clear(Some("recall:")).await;
        assert_eq!(cache.get("stats:b").await, Some(json!(2)));
        assert!(!l2.store.contains_key("recall:a"));
    }

    #[tokio::test]
    async fn test_sweeper_start_and_shutdown() {
        let cache = cache_with(None, None);
        cache.start_sweeper();
        cache.start_sweeper(); // idempotent
        cache.shutdown();
        let guard = cache.sweeper.lock().unwrap();
        assert!(guard.is_none());
    }
}
