//! Per-tier hit/miss counters for the multi-tier cache.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which tier a metric event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// In-process tier.
    L1,
    /// First remote tier.
    L2,
    /// Second remote tier.
    L3,
}

/// Lock-free hit/miss counters, one pair per tier.
#[derive(Default)]
pub struct CacheMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
}

impl CacheMetrics {
    /// Record a hit on the given tier.
    pub fn hit(&self, tier: Tier) {
        match tier {
            Tier::L1 => &self.l1_hits,
            Tier::L2 => &self.l2_hits,
            Tier::L3 => &self.l3_hits,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss on the given tier.
    pub fn miss(&self, tier: Tier) {
        match tier {
            Tier::L1 => &self.l1_misses,
            Tier::L2 => &self.l2_misses,
            Tier::L3 => &self.l3_misses,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only snapshot of all counters plus the aggregate hit rate.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_misses = self.l1_misses.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l3_hits = self.l3_hits.load(Ordering::Relaxed);
        // Every lookup touches L1 first, so L1 traffic is total traffic.
        let lookups = l1_hits + l1_misses;
        let hits = l1_hits + l2_hits + l3_hits;
        CacheMetricsSnapshot {
            l1_hits,
            l1_misses,
            l2_hits,
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            l3_hits,
            l3_misses: self.l3_misses.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// Point-in-time view of cache metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    /// L1 hits.
    pub l1_hits: u64,
    /// L1 misses.
    pub l1_misses: u64,
    /// L2 hits.
    pub l2_hits: u64,
    /// L2 misses.
    pub l2_misses: u64,
    /// L3 hits.
    pub l3_hits: u64,
    /// L3 misses.
    pub l3_misses: u64,
    /// Fraction of lookups served from any tier.
    pub hit_rate: f64,
}
