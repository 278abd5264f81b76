//! Bounded in-process cache tier.
//!
//! Thread-safe via `DashMap`. Expired entries are lazily evicted on `get()`;
//! a periodic sweep removes the rest. When the cache is at capacity, the
//! entry closest to expiry is evicted to make room.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct L1Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Bounded process-local cache with per-entry TTL.
pub struct L1Cache {
    entries: DashMap<String, L1Entry>,
    capacity: usize,
}

impl L1Cache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get a value by key. Returns `None` if missing or expired; expired
    /// entries are evicted on access.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry); // release read lock before removing
            self.entries.remove(key);
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Store a value with the given TTL, evicting the entry closest to expiry
    /// if the cache is full.
    pub fn insert(&self, key: String, value: serde_json::Value, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(
            key,
            L1Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove keys containing `pattern`, or everything when `None`.
    pub fn clear(&self, pattern: Option<&str>) {
        match pattern {
            Some(pattern) => self.entries.retain(|key, _| !key.contains(pattern)),
            None => self.entries.clear(),
        }
    }

    /// Remove all expired entries.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently held (including possibly expired).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
