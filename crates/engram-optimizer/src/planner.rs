//! Cost-based query plan generation and reuse.
//!
//! Plans are keyed by a normalized, order-independent hash of the query
//! shape. A cached plan is reused while it stays effective: executed within
//! the last hour and averaging under the target query time. Anything else is
//! resynthesized from the shape's features.

use crate::canonical;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result limit at or below which results are pinned in L1.
const SMALL_RESULT_LIMIT: usize = 10;

/// Result limit above which plan execution is parallelized.
const PARALLEL_LIMIT: usize = 50;

/// Concurrency used when parallelization is enabled.
const PARALLEL_CONCURRENCY: usize = 4;

/// How long a plan stays reusable without being executed.
const PLAN_IDLE_EXPIRY: Duration = Duration::from_secs(3600);

const TTL_SHORT: Duration = Duration::from_secs(60);
const TTL_MEDIUM: Duration = Duration::from_secs(300);
const TTL_LONG: Duration = Duration::from_secs(1800);

/// The normalized shape of a query, independent of volatile request fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryShape {
    /// Operation name ("recall", "context", ...).
    pub operation: String,
    /// Free-text query, if any.
    pub text: Option<String>,
    /// Whether a query embedding is available.
    pub has_embedding: bool,
    /// Exact-match kind filter, if any.
    pub kind: Option<String>,
    /// Agent scoping, if any.
    pub agent_id: Option<String>,
    /// Time-range restriction in RFC 3339, if any.
    pub time_range: Option<(String, String)>,
    /// Additional equality filters, keyed deterministically.
    pub filters: BTreeMap<String, serde_json::Value>,
    /// Requested result limit.
    pub limit: usize,
}

impl QueryShape {
    /// Order-independent plan id for this shape.
    pub fn plan_id(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        canonical::digest(&value)
    }
}

/// A single step of a query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// What the step does.
    pub kind: PlanStepKind,
    /// Optimization hint for the executor.
    pub hint: String,
    /// Rough relative cost of the step.
    pub estimated_cost: f64,
}

/// Kinds of plan steps, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepKind {
    /// Embedding similarity scan.
    VectorSearch,
    /// Attribute filtering.
    Filter,
    /// Result assembly and ranking. Always last.
    Assembly,
}

/// Which cache tier a plan's results should land in, and for how long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStrategy {
    /// Deepest tier to write through to.
    pub tier: PlanCacheTier,
    /// TTL for cached results.
    pub ttl_secs: u64,
}

/// Cache tier choices available to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanCacheTier {
    /// In-process only.
    L1,
    /// Through the first remote tier.
    L2,
    /// Through all tiers.
    L3,
}

/// Parallel execution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelization {
    /// Number of concurrent partitions.
    pub concurrency: usize,
}

/// A cached execution strategy for one query shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Normalized shape hash.
    pub id: String,
    /// Ordered execution steps.
    pub steps: Vec<PlanStep>,
    /// Sum of step costs.
    pub estimated_cost: f64,
    /// Where results should be cached.
    pub cache: CacheStrategy,
    /// Parallel execution, when the result set is large.
    pub parallelization: Option<Parallelization>,
    /// Which indices the executor should prefer.
    pub index_hints: Vec<String>,
}

/// Rolling execution statistics for one plan.
#[derive(Debug, Clone)]
struct PlanStats {
    executions: u64,
    avg_duration_ms: f64,
    last_executed: Instant,
}

struct PlanEntry {
    plan: QueryPlan,
    stats: Option<PlanStats>,
}

/// Generates, caches, and scores query plans.
pub struct QueryOptimizer {
    plans: DashMap<String, PlanEntry>,
    target: Duration,
}

impl QueryOptimizer {
    /// Create an optimizer with the given target query time.
    pub fn new(target: Duration) -> Self {
        Self {
            plans: DashMap::new(),
            target,
        }
    }

    /// Target query time used for plan effectiveness and slow-query checks.
    pub fn target(&self) -> Duration {
        self.target
    }

    /// Return the plan for a shape, reusing a cached plan while it stays
    /// effective and synthesizing a fresh one otherwise.
    pub fn plan_for(&self, shape: &QueryShape) -> QueryPlan {
        let id = shape.plan_id();
        if let Some(entry) = self.plans.get(&id) {
            if self.is_effective(&entry) {
                debug!(plan_id = %id, "Reusing query plan");
                return entry.plan.clone();
            }
        }
        let plan = self.synthesize(id.clone(), shape);
        debug!(plan_id = %id, steps = plan.steps.len(), "Synthesized query plan");
        self.plans.insert(
            id,
            PlanEntry {
                plan: plan.clone(),
                stats: None,
            },
        );
        plan
    }

    /// Fold an observed execution duration into the plan's rolling average.
    pub fn record_execution(&self, plan_id: &str, duration: Duration) {
        if let Some(mut entry) = self.plans.get_mut(plan_id) {
            let ms = duration.as_secs_f64() * 1000.0;
            let stats = entry.stats.get_or_insert(PlanStats {
                executions: 0,
                avg_duration_ms: 0.0,
                last_executed: Instant::now(),
            });
            stats.avg_duration_ms = (stats.avg_duration_ms * stats.executions as f64 + ms)
                / (stats.executions + 1) as f64;
            stats.executions += 1;
            stats.last_executed = Instant::now();
        }
    }

    /// Number of plans currently cached.
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    fn is_effective(&self, entry: &PlanEntry) -> bool {
        match &entry.stats {
            // Never executed: keep it until it earns a history.
            None => true,
            Some(stats) => {
                stats.last_executed.elapsed() < PLAN_IDLE_EXPIRY
                    && stats.avg_duration_ms < self.target.as_secs_f64() * 1000.0
            }
        }
    }

    fn synthesize(&self, id: String, shape: &QueryShape) -> QueryPlan {
        let mut steps = Vec::new();
        if shape.has_embedding {
            steps.push(PlanStep {
                kind: PlanStepKind::VectorSearch,
                hint: "scan semantic index, early-exit below threshold".to_string(),
                estimated_cost: 10.0,
            });
        }
        if !shape.filters.is_empty() || shape.kind.is_some() || shape.time_range.is_some() {
            steps.push(PlanStep {
                kind: PlanStepKind::Filter,
                hint: "apply attribute filters before ranking".to_string(),
                estimated_cost: 2.0,
            });
        }
        steps.push(PlanStep {
            kind: PlanStepKind::Assembly,
            hint: "merge, rank, truncate".to_string(),
            estimated_cost: 1.0,
        });
        let estimated_cost = steps.iter().map(|s| s.estimated_cost).sum();

        let cache = if shape.limit <= SMALL_RESULT_LIMIT {
            CacheStrategy {
                tier: PlanCacheTier::L1,
                ttl_secs: TTL_SHORT.as_secs(),
            }
        } else if shape.kind.is_some() {
            CacheStrategy {
                tier: PlanCacheTier::L2,
                ttl_secs: TTL_MEDIUM.as_secs(),
            }
        } else {
            CacheStrategy {
                tier: PlanCacheTier::L3,
                ttl_secs: TTL_LONG.as_secs(),
            }
        };

        let parallelization = (shape.limit > PARALLEL_LIMIT).then_some(Parallelization {
            concurrency: PARALLEL_CONCURRENCY,
        });

        let mut index_hints = Vec::new();
        if shape.kind.is_some() {
            index_hints.push("kind".to_string());
        }
        if shape.agent_id.is_some() {
            index_hints.push("agent".to_string());
        }
        if shape.time_range.is_some() {
            index_hints.push("time_range".to_string());
        }

        QueryPlan {
            id,
            steps,
            estimated_cost,
            cache,
            parallelization,
            index_hints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(limit: usize) -> QueryShape {
        QueryShape {
            operation: "recall".to_string(),
            text: Some("dark mode".to_string()),
            has_embedding: true,
            limit,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_id_is_stable() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        let a = optimizer.plan_for(&shape(10));
        let b = optimizer.plan_for(&shape(10));
        assert_eq!(a.id, b.id);
        assert_eq!(optimizer.plan_count(), 1);
    }

    #[test]
    fn test_vector_step_requires_embedding() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        let mut s = shape(10);
        s.has_embedding = false;
        let plan = optimizer.plan_for(&s);
        assert!(plan
            .steps
            .iter()
            .all(|step| step.kind != PlanStepKind::VectorSearch));
        assert_eq!(plan.steps.last().unwrap().kind, PlanStepKind::Assembly);
    }

    #[test]
    fn test_assembly_is_always_last() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        let mut s = shape(10);
        s.kind = Some("preference".to_string());
        let plan = optimizer.plan_for(&s);
        assert_eq!(plan.steps.last().unwrap().kind, PlanStepKind::Assembly);
        assert!(plan.steps.iter().any(|st| st.kind == PlanStepKind::Filter));
    }

    #[test]
    fn test_cache_strategy_heuristics() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        assert_eq!(optimizer.plan_for(&shape(10)).cache.tier, PlanCacheTier::L1);

        let mut kind_query = shape(25);
        kind_query.kind = Some("fact".to_string());
        assert_eq!(
            optimizer.plan_for(&kind_query).cache.tier,
            PlanCacheTier::L2
        );

        assert_eq!(optimizer.plan_for(&shape(30)).cache.tier, PlanCacheTier::L3);
    }

    #[test]
    fn test_parallelization_over_limit() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        assert!(optimizer.plan_for(&shape(50)).parallelization.is_none());
        let plan = optimizer.plan_for(&shape(51));
        assert_eq!(plan.parallelization.unwrap().concurrency, 4);
    }

    #[test]
    fn test_index_hints_follow_shape() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        let mut s = shape(10);
        s.kind = Some("fact".to_string());
        s.agent_id = Some("agent-a".to_string());
        let plan = optimizer.plan_for(&s);
        assert_eq!(plan.index_hints, vec!["kind", "agent"]);
    }

    #[test]
    fn test_slow_plan_is_regenerated() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(10));
        let plan = optimizer.plan_for(&shape(10));
        optimizer.record_execution(&plan.id, Duration::from_millis(500));
        // Average now well above target: the next request resynthesizes.
        let fresh = optimizer.plan_for(&shape(10));
        assert_eq!(fresh.id, plan.id);
        // Resynthesis resets the recorded history.
        optimizer.record_execution(&plan.id, Duration::from_millis(1));
        let reused = optimizer.plan_for(&shape(10));
        assert_eq!(reused.id, plan.id);
    }

    #[test]
    fn test_record_execution_averages() {
        let optimizer = QueryOptimizer::new(Duration::from_millis(100));
        let plan = optimizer.plan_for(&shape(10));
        optimizer.record_execution(&plan.id, Duration::from_millis(10));
        optimizer.record_execution(&plan.id, Duration::from_millis(30));
        let entry = optimizer.plans.get(&plan.id).unwrap();
        let stats = entry.stats.as_ref().unwrap();
        assert_eq!(stats.executions, 2);
        assert!((stats.avg_duration_ms - 20.0).abs() < 1.0);
    }
}
