//! Query planning and cacheable-read optimization for the Engram store.
//!
//! `QueryOptimizer` synthesizes and reuses execution plans keyed by a
//! normalized query-shape hash. `PerformanceOptimizer` is the façade callers
//! wrap reads through: it consults the plan, serves from the multi-tier cache
//! when possible, records latency against the plan, and signals slow queries
//! over a broadcast channel without ever failing the query itself.

pub mod canonical;
pub mod performance;
pub mod planner;

pub use performance::{PerformanceOptimizer, PerformanceSnapshot, QueryContext, SlowQueryEvent};
pub use planner::{QueryOptimizer, QueryPlan, QueryShape};
