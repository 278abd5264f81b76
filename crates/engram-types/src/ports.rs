//! Ports to the engine's external collaborators.
//!
//! The engine never talks to a concrete embedding provider, database, or
//! remote cache directly; it holds trait objects for these three ports. Test
//! doubles and production drivers implement the same traits.

use crate::error::MemoryResult;
use crate::memory::{AccessUpdate, Embedding, ListFilter, MemoryId, MemoryRecord, StorageStats};
use async_trait::async_trait;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Prepare the service (warm connections, verify credentials).
    async fn initialize(&self) -> MemoryResult<()>;

    /// Compute the embedding for a single text.
    async fn embed(&self, text: &str) -> MemoryResult<Embedding>;

    /// Dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Durable CRUD and listing for memory records.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Prepare the adapter (open connections, run migrations).
    async fn initialize(&self) -> MemoryResult<()>;

    /// Persist a new record. Returns false if the id already exists.
    async fn store(&self, record: &MemoryRecord) -> MemoryResult<bool>;

    /// Fetch a record by id.
    async fn retrieve(&self, id: MemoryId) -> MemoryResult<Option<MemoryRecord>>;

    /// Apply an access-stat update to a record. Returns false if absent.
    async fn update(&self, id: MemoryId, update: AccessUpdate) -> MemoryResult<bool>;

    /// Delete a record. Returns false if absent.
    async fn delete(&self, id: MemoryId) -> MemoryResult<bool>;

    /// List records for a scope, sorted and bounded per the filter.
    async fn list(&self, filter: &ListFilter) -> MemoryResult<Vec<MemoryRecord>>;

    /// Decay the confidence of records not accessed since `cutoff` by
    /// multiplying with `factor`, never dropping below `floor`. Returns the
    /// number of records affected.
    async fn decay_confidence(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        factor: f32,
        floor: f32,
    ) -> MemoryResult<u64>;

    /// Adapter-level statistics.
    async fn stats(&self) -> MemoryResult<StorageStats>;
}

/// A remote/distributed cache tier (L2 or L3).
///
/// Values are JSON so heterogeneous results can share one tier. Tier failures
/// are never authoritative; callers treat errors as misses.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Fetch a value by key.
    async fn get(&self, key: &str) -> MemoryResult<Option<serde_json::Value>>;

    /// Store a value with a TTL in seconds.
    async fn set(&self, key: &str, value: serde_json::Value, ttl_secs: u64) -> MemoryResult<()>;

    /// Remove a key.
    async fn delete(&self, key: &str) -> MemoryResult<()>;

    /// Remove keys matching a substring pattern, or everything when `None`.
    async fn clear(&self, pattern: Option<&str>) -> MemoryResult<()>;

    /// Whether a key is present.
    async fn exists(&self, key: &str) -> MemoryResult<bool>;
}
