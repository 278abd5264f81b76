//! Multi-tier cache for the Engram memory engine.
//!
//! Three tiers: a bounded in-process L1 plus two external tiers (L2/L3)
//! reached through the `CacheTier` port. Reads promote values toward faster
//! tiers; writes fan out to all tiers with no cross-tier atomicity. The cache
//! is never the system of record, so any tier failure degrades to a miss.

pub mod l1;
pub mod metrics;
pub mod multi_tier;

pub use l1::L1Cache;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, Tier};
pub use multi_tier::{MultiTierCache, MultiTierConfig};
