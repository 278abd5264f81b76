//! The memory engine: remember / recall / forget / context / stats.
//!
//! The engine owns the four indices and holds ports to the embedding service
//! and storage adapter. It is a state machine: every public operation except
//! `initialize` fails with `MemoryError::NotInitialized` until initialization
//! has completed successfully.

use crate::index::{merge_search_results, IndexManager, SearchOptions};
use chrono::Utc;
use engram_types::error::{MemoryError, MemoryResult};
use engram_types::memory::{
    AccessUpdate, ConsolidationReport, ContextBundle, ContextRequest, ListFilter, MemoryId,
    MemoryRecord, MemoryScope, MemoryStats, RecallHit, RecallOptions, RememberOptions,
};
use engram_types::ports::{EmbeddingService, StorageAdapter};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Confidence reported on every context bundle.
const CONTEXT_CONFIDENCE: f32 = 0.95;

/// Records not accessed for this many days are decayed by `consolidate`.
const DECAY_AFTER_DAYS: i64 = 7;

/// Confidence never decays below this floor.
const DECAY_FLOOR: f32 = 0.1;

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet initialized.
    Uninitialized,
    /// `initialize()` is in flight.
    Initializing,
    /// Ready to serve.
    Ready,
    /// Initialization failed; may be retried.
    Failed,
}

impl EngineState {
    fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        }
    }
}

/// Orchestrates memory operations over the embedding service, storage
/// adapter, and in-memory indices.
pub struct MemoryEngine {
    embedder: Arc<dyn EmbeddingService>,
    storage: Arc<dyn StorageAdapter>,
    index: IndexManager,
    state: RwLock<EngineState>,
    /// Per-cycle confidence decay rate used by `consolidate`.
    decay_rate: f32,
}

impl MemoryEngine {
    /// Create an engine in the `Uninitialized` state.
    pub fn new(embedder: Arc<dyn EmbeddingService>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            embedder,
            storage,
            index: IndexManager::new(),
            state: RwLock::new(EngineState::Uninitialized),
            decay_rate: 0.1,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        match self.state.read() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: EngineState) {
        let mut state = match self.state.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = next;
    }

    fn ensure_ready(&self) -> MemoryResult<()> {
        let state = self.state();
        if state == EngineState::Ready {
            Ok(())
        } else {
            Err(MemoryError::NotInitialized(state.as_str().to_string()))
        }
    }

    /// Initialize the embedding service and storage adapter, then load all
    /// existing records into the indices.
    ///
    /// Any failure leaves the engine in `Failed`; initialization may be
    /// retried.
    pub async fn initialize(&self) -> MemoryResult<()> {
        self.set_state(EngineState::Initializing);
        match self.initialize_inner().await {
            Ok(loaded) => {
                self.set_state(EngineState::Ready);
                debug!(loaded, "Memory engine initialized");
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                Err(e)
            }
        }
    }

    async fn initialize_inner(&self) -> MemoryResult<usize> {
        self.embedder
            .initialize()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        self.storage
            .initialize()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let records = self
            .storage
            .list(&ListFilter::all())
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let loaded = records.len();
        for record in &records {
            self.index.add(record);
        }
        Ok(loaded)
    }

    /// Store a new memory and return its id.
    pub async fn remember(
        &self,
        content: &str,
        tenant_id: &str,
        agent_id: Option<&str>,
        options: RememberOptions,
    ) -> MemoryResult<MemoryId> {
        self.ensure_ready()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::Validation(
                "Memory content must not be blank".to_string(),
            ));
        }
        if tenant_id.trim().is_empty() {
            return Err(MemoryError::Validation(
                "Tenant id must not be blank".to_string(),
            ));
        }

        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let now = Utc::now();
        let record = MemoryRecord {
            id: MemoryId::new(),
            content: content.to_string(),
            embedding: embedding.vector,
            kind: options.kind.unwrap_or_default(),
            tags: options.tags,
            importance: options.importance.unwrap_or(0.5).clamp(0.0, 1.0),
            emotional_weight: options.emotional_weight.unwrap_or(0.0),
            confidence: 1.0,
            tenant_id: tenant_id.to_string(),
            agent_id: agent_id.map(str::to_string),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl_secs: options.ttl_secs,
        };

        let stored = self
            .storage
            .store(&record)
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        if !stored {
            return Err(MemoryError::Storage(format!(
                "Record {} already exists",
                record.id
            )));
        }
        self.index.add(&record);
        debug!(id = %record.id, tenant = tenant_id, "Memory stored");
        Ok(record.id)
    }

    /// Ranked search over stored memories within a (tenant, agent?) scope.
    ///
    /// Each returned record's access stats are bumped best-effort: a failure
    /// persisting one record's stats is logged and never fails the recall.
    pub async fn recall(
        &self,
        query: &str,
        tenant_id: &str,
        agent_id: Option<&str>,
        options: RecallOptions,
    ) -> MemoryResult<Vec<RecallHit>> {
        self.ensure_ready()?;
        if query.trim().is_empty() {
            return Err(MemoryError::Validation(
                "Recall query must not be blank".to_string(),
            ));
        }
        let scope = MemoryScope {
            tenant_id: tenant_id.to_string(),
            agent_id: agent_id.map(str::to_string),
        };
        let query_embedding = self
            .embedder
            .embed(query.trim())
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        let search_opts = SearchOptions {
            threshold: options.threshold,
            kind: options.kind,
        };
        let semantic = self
            .index
            .semantic_search(&query_embedding.vector, &scope, &search_opts);
        let keyword = self.index.keyword_search(query, &scope, &search_opts);
        let merged = merge_search_results(semantic, keyword, options.limit);

        let now = Utc::now();
        let mut hits = Vec::with_capacity(merged.len());
        for candidate in merged {
            let record = match self.storage.retrieve(candidate.id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    // Index said yes, storage says no: repair the index.
                    warn!(id = %candidate.id, "Indexed record missing from storage, deindexing");
                    self.index.remove(candidate.id);
                    continue;
                }
                Err(e) => return Err(MemoryError::Storage(e.to_string())),
            };

            let update = AccessUpdate {
                access_count: record.access_count + 1,
                last_accessed_at: now,
            };
            if let Err(e) = self.storage.update(record.id, update).await {
                warn!(id = %record.id, error = %e, "Failed to persist access stats");
            }
            self.index.touch(record.id, now);

            let mut view = record.to_view();
            view.access_count = record.access_count + 1;
            view.last_accessed_at = now;
            hits.push(RecallHit {
                memory: view,
                score: candidate.score,
                reason: candidate.source.reason().to_string(),
            });
        }
        Ok(hits)
    }

    /// Build a context bundle of the scope's most recently accessed memories.
    pub async fn get_context(&self, request: &ContextRequest) -> MemoryResult<ContextBundle> {
        self.ensure_ready()?;
        let scope = MemoryScope {
            tenant_id: request.tenant_id.clone(),
            agent_id: request.agent_id.clone(),
        };
        let records = self
            .storage
            .list(&ListFilter::scoped(&scope, request.max_memories))
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        let memories: Vec<_> = records.iter().map(MemoryRecord::to_view).collect();
        let context = records
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let summary = summarize(&records, &request.tenant_id);
        Ok(ContextBundle {
            context,
            summary,
            total_count: memories.len(),
            memories,
            confidence: CONTEXT_CONFIDENCE,
            generated_at: Utc::now(),
        })
    }

    /// Delete a memory. Returns whether anything was deleted.
    ///
    /// Deliberately never fails: every error during retrieval, deletion, or
    /// index removal is logged and reported as `false`, keeping deletion
    /// idempotent for callers.
    pub async fn forget(&self, id: MemoryId) -> MemoryResult<bool> {
        self.ensure_ready()?;
        let record = match self.storage.retrieve(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(id = %id, error = %e, "forget: retrieval failed");
                return Ok(false);
            }
        };
        match self.storage.delete(record.id).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                warn!(id = %id, error = %e, "forget: delete failed");
                return Ok(false);
            }
        }
        self.index.remove(record.id);
        debug!(id = %id, "Memory forgotten");
        Ok(true)
    }

    /// Aggregate statistics over all indexed memories.
    pub fn get_stats(&self) -> MemoryResult<MemoryStats> {
        self.ensure_ready()?;
        Ok(self.index.stats(Utc::now()))
    }

    /// Decay the confidence of long-unaccessed memories.
    pub async fn consolidate(&self) -> MemoryResult<ConsolidationReport> {
        self.ensure_ready()?;
        let start = std::time::Instant::now();
        let cutoff = Utc::now() - chrono::Duration::days(DECAY_AFTER_DAYS);
        let decayed = self
            .storage
            .decay_confidence(cutoff, 1.0 - self.decay_rate, DECAY_FLOOR)
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(ConsolidationReport {
            memories_decayed: decayed,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Deterministic one-line summary of a record set.
fn summarize(records: &[MemoryRecord], tenant_id: &str) -> String {
    if records.is_empty() {
        return format!("No memories for tenant {tenant_id}");
    }
    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in records {
        *by_kind.entry(record.kind.as_str()).or_default() += 1;
    }
    let breakdown = by_kind
        .iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} memories for tenant {tenant_id} ({breakdown})",
        records.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[], "t1"), "No memories for tenant t1");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(EngineState::Uninitialized.as_str(), "uninitialized");
        assert_eq!(EngineState::Failed.as_str(), "failed");
    }
}
