//! Façade that wraps any cacheable read with planning, caching, and metrics.
//!
//! The optimizer is strictly observational on the failure side: a cache or
//! plan problem never fails the wrapped query, and a query that blows past
//! the latency target still returns its result — the overshoot only emits a
//! slow-query event on a bounded broadcast channel (receivers that fall
//! behind skip the oldest events).

use crate::canonical;
use crate::planner::{PlanCacheTier, QueryOptimizer, QueryPlan, QueryShape};
use engram_cache::{MultiTierCache, Tier};
use engram_types::error::MemoryResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of the slow-query broadcast channel.
const SLOW_QUERY_CHANNEL_CAPACITY: usize = 64;

/// How many recent latencies are kept for percentile estimation.
const LATENCY_WINDOW: usize = 1024;

/// Everything that identifies a cacheable read.
///
/// The cache key is derived from the canonicalized serialization of this
/// struct; volatile fields (request ids, timestamps) must go in `params`
/// under their conventional names so canonicalization strips them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    /// The normalized query shape, also used for planning.
    pub shape: QueryShape,
    /// Extra parameters that affect the result (tenant id, thresholds, ...).
    pub params: BTreeMap<String, serde_json::Value>,
}

impl QueryContext {
    /// Deterministic cache key for this context.
    pub fn cache_key(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        format!("engram:{}:{}", self.shape.operation, canonical::digest(&value))
    }
}

/// Emitted when a query exceeds the target time. Observability only; the
/// query already completed successfully.
#[derive(Debug, Clone)]
pub struct SlowQueryEvent {
    /// The plan the query ran under.
    pub plan: QueryPlan,
    /// Observed duration.
    pub duration: Duration,
    /// The configured target.
    pub target: Duration,
    /// Generated optimization suggestions.
    pub suggestions: Vec<String>,
}

/// Read-only aggregate performance metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Total wrapped queries.
    pub queries: u64,
    /// Queries answered from cache.
    pub cache_hits: u64,
    /// Fraction of queries answered from cache.
    pub cache_hit_rate: f64,
    /// Mean latency of executed (non-cached) queries, in milliseconds.
    pub avg_latency_ms: f64,
    /// Median executed-query latency.
    pub p50_latency_ms: u64,
    /// 95th percentile executed-query latency.
    pub p95_latency_ms: u64,
    /// 99th percentile executed-query latency.
    pub p99_latency_ms: u64,
    /// Entries currently held in the L1 cache.
    pub l1_entries: usize,
    /// Query plans currently cached.
    pub cached_plans: usize,
}

#[derive(Default)]
struct QueryMetrics {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    total_exec_ms: AtomicU64,
    executed: AtomicU64,
    latencies: Mutex<Vec<u64>>,
}

impl QueryMetrics {
    fn record_hit(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_execution(&self, duration: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
        let ms = duration.as_millis() as u64;
        self.total_exec_ms.fetch_add(ms, Ordering::Relaxed);
        let mut latencies = match self.latencies.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        if latencies.len() >= LATENCY_WINDOW {
            latencies.remove(0);
        }
        latencies.push(ms);
    }

    fn snapshot(&self) -> PerformanceSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let executed = self.executed.load(Ordering::Relaxed);
        let total_ms = self.total_exec_ms.load(Ordering::Relaxed);
        let mut latencies = match self.latencies.lock() {
            Ok(l) => l.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        latencies.sort_unstable();
        let percentile = |p: f64| -> u64 {
            if latencies.is_empty() {
                return 0;
            }
            let idx = ((latencies.len() as f64 * p).ceil() as usize)
                .saturating_sub(1)
                .min(latencies.len() - 1);
            latencies[idx]
        };
        PerformanceSnapshot {
            queries,
            cache_hits,
            cache_hit_rate: if queries == 0 {
                0.0
            } else {
                cache_hits as f64 / queries as f64
            },
            avg_latency_ms: if executed == 0 {
                0.0
            } else {
                total_ms as f64 / executed as f64
            },
            p50_latency_ms: percentile(0.50),
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
            l1_entries: 0,
            cached_plans: 0,
        }
    }
}

/// Wraps cacheable reads with plan-driven caching and latency accounting.
pub struct PerformanceOptimizer {
    cache: Arc<MultiTierCache>,
    planner: QueryOptimizer,
    metrics: QueryMetrics,
    slow_tx: broadcast::Sender<SlowQueryEvent>,
}

impl PerformanceOptimizer {
    /// Create an optimizer over the given cache with a target query time.
    pub fn new(cache: Arc<MultiTierCache>, target: Duration) -> Self {
        let (slow_tx, _) = broadcast::channel(SLOW_QUERY_CHANNEL_CAPACITY);
        Self {
            cache,
            planner: QueryOptimizer::new(target),
            metrics: QueryMetrics::default(),
            slow_tx,
        }
    }

    /// Execute a read through the plan and cache layers.
    ///
    /// Identical contexts within the cached TTL execute the underlying
    /// function exactly once. Errors from the wrapped function propagate
    /// unchanged; cache trouble only ever downgrades to a miss.
    pub async fn execute_optimized_query<T, F, Fut>(
        &self,
        ctx: &QueryContext,
        query_fn: F,
    ) -> MemoryResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = MemoryResult<T>>,
    {
        let plan = self.planner.plan_for(&ctx.shape);
        let key = ctx.cache_key();

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value(cached) {
                Ok(value) => {
                    self.metrics.record_hit();
                    debug!(key = %key, plan_id = %plan.id, "Optimized query served from cache");
                    return Ok(value);
                }
                Err(e) => {
                    // Stale shape in the cache; drop it and fall through.
                    warn!(key = %key, error = %e, "Cached value failed to decode, evicting");
                    self.cache.delete(&key).await;
                }
            }
        }

        let start = Instant::now();
        let result = query_fn().await?;
        let duration = start.elapsed();

        match serde_json::to_value(&result) {
            Ok(value) => {
                let tier = match plan.cache.tier {
                    PlanCacheTier::L1 => Tier::L1,
                    PlanCacheTier::L2 => Tier::L2,
                    PlanCacheTier::L3 => Tier::L3,
                };
                self.cache
                    .set_tiered(&key, value, Some(Duration::from_secs(plan.cache.ttl_secs)), tier)
                    .await;
            }
            Err(e) => warn!(key = %key, error = %e, "Result not cacheable"),
        }

        self.planner.record_execution(&plan.id, duration);
        self.metrics.record_execution(duration);

        if duration > self.planner.target() {
            let event = SlowQueryEvent {
                suggestions: suggest(&plan, &ctx.shape),
                duration,
                target: self.planner.target(),
                plan,
            };
            // No receivers is fine; the signal is best-effort.
            let _ = self.slow_tx.send(event);
        }
        Ok(result)
    }

    /// Subscribe to slow-query events.
    pub fn subscribe_slow_queries(&self) -> broadcast::Receiver<SlowQueryEvent> {
        self.slow_tx.subscribe()
    }

    /// Read-only aggregate metrics.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let mut snap = self.metrics.snapshot();
        snap.l1_entries = self.cache.l1_len();
        snap.cached_plans = self.planner.plan_count();
        snap
    }

    /// Tuning recommendations derived purely from the current metrics.
    pub fn recommendations(&self) -> Vec<String> {
        let snap = self.snapshot();
        let target_ms = self.planner.target().as_secs_f64() * 1000.0;
        let mut recs = Vec::new();
        if snap.queries >= 10 && snap.cache_hit_rate < 0.2 {
            recs.push(
                "Cache hit rate is low; consider longer TTLs or fewer distinct query shapes"
                    .to_string(),
            );
        }
        if snap.avg_latency_ms > target_ms {
            recs.push(format!(
                "Average latency {:.0}ms exceeds the {:.0}ms target; review index coverage",
                snap.avg_latency_ms, target_ms
            ));
        }
        if snap.p99_latency_ms as f64 > target_ms * 4.0 {
            recs.push("p99 latency is far above target; investigate outlier queries".to_string());
        }
        recs
    }
}

/// Optimization suggestions for a slow query, derived from its plan.
fn suggest(plan: &QueryPlan, shape: &QueryShape) -> Vec<String> {
    let mut suggestions = Vec::new();
    if plan.parallelization.is_none() && shape.limit > 20 {
        suggestions.push("Large result set executed serially; consider a lower limit".to_string());
    }
    if shape.has_embedding && shape.kind.is_none() {
        suggestions
            .push("Unfiltered vector scan; adding a kind filter narrows the candidate set".to_string());
    }
    if plan.cache.tier == PlanCacheTier::L1 {
        suggestions.push("Results are L1-only; promoting to L2 would survive restarts".to_string());
    }
    suggestions
}
