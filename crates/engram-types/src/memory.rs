//! Memory data model: records, scopes, recall results, and statistics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random MemoryId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of knowledge a memory record carries.
///
/// Closed enum, validated at construction. Unknown kind strings are rejected
/// rather than stored as free text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A discrete piece of knowledge.
    #[default]
    Fact,
    /// A how-to or multi-step process.
    Procedure,
    /// A user or agent preference.
    Preference,
    /// A specific experienced event.
    Episode,
    /// A learned capability.
    Skill,
    /// Background/contextual information.
    Context,
}

impl MemoryKind {
    /// All kinds, in stable order.
    pub const ALL: [MemoryKind; 6] = [
        MemoryKind::Fact,
        MemoryKind::Procedure,
        MemoryKind::Preference,
        MemoryKind::Episode,
        MemoryKind::Skill,
        MemoryKind::Context,
    ];

    /// Stable lowercase name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Fact => "fact",
            MemoryKind::Procedure => "procedure",
            MemoryKind::Preference => "preference",
            MemoryKind::Episode => "episode",
            MemoryKind::Skill => "skill",
            MemoryKind::Context => "context",
        }
    }
}

impl FromStr for MemoryKind {
    type Err = crate::error::MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Ok(MemoryKind::Fact),
            "procedure" => Ok(MemoryKind::Procedure),
            "preference" => Ok(MemoryKind::Preference),
            "episode" => Ok(MemoryKind::Episode),
            "skill" => Ok(MemoryKind::Skill),
            "context" => Ok(MemoryKind::Context),
            other => Err(crate::error::MemoryError::Validation(format!(
                "Unknown memory kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (tenant, agent?) isolation boundary every read and write is scoped by.
///
/// A scope without an agent sees all of the tenant's records. An agent-scoped
/// read sees tenant-wide records (no agent) plus its own, never another
/// agent's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    /// Top-level isolation boundary.
    pub tenant_id: String,
    /// Optional actor within the tenant.
    pub agent_id: Option<String>,
}

impl MemoryScope {
    /// Scope covering a whole tenant.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: None,
        }
    }

    /// Scope for a specific agent within a tenant.
    pub fn agent(tenant_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: Some(agent_id.into()),
        }
    }

    /// Whether a record with the given owner is visible to this scope.
    ///
    /// Tenant must match exactly. Records with no owning agent are visible
    /// tenant-wide; agent-owned records are visible only to their own agent or
    /// to tenant-wide readers.
    pub fn covers(&self, tenant_id: &str, agent_id: Option<&str>) -> bool {
        if self.tenant_id != tenant_id {
            return false;
        }
        match (&self.agent_id, agent_id) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(mine), Some(theirs)) => mine == theirs,
        }
    }
}

/// A single stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique, immutable ID.
    pub id: MemoryId,
    /// Trimmed, non-empty textual content.
    pub content: String,
    /// Vector embedding of the content (fixed dimension per deployment).
    pub embedding: Vec<f32>,
    /// What kind of knowledge this is.
    pub kind: MemoryKind,
    /// Free-form tags.
    pub tags: BTreeSet<String>,
    /// Importance score in [0, 1].
    pub importance: f32,
    /// Emotional salience of the memory.
    pub emotional_weight: f32,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning agent within the tenant, if any.
    pub agent_id: Option<String>,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
    /// When this record was last modified.
    pub updated_at: DateTime<Utc>,
    /// When this record was last returned by a recall.
    pub last_accessed_at: DateTime<Utc>,
    /// How many times this record has been recalled.
    pub access_count: u64,
    /// Optional expiry, in seconds from creation.
    pub ttl_secs: Option<u64>,
}

impl MemoryRecord {
    /// Strip the embedding for caller-facing output.
    pub fn to_view(&self) -> MemoryRecordView {
        MemoryRecordView {
            id: self.id,
            content: self.content.clone(),
            kind: self.kind,
            tags: self.tags.clone(),
            importance: self.importance,
            emotional_weight: self.emotional_weight,
            confidence: self.confidence,
            tenant_id: self.tenant_id.clone(),
            agent_id: self.agent_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
        }
    }

    /// Whether the record was accessed within the given window, inclusive.
    pub fn accessed_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_accessed_at <= window
    }
}

/// A memory record with the embedding stripped, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecordView {
    /// Unique ID.
    pub id: MemoryId,
    /// The textual content.
    pub content: String,
    /// What kind of knowledge this is.
    pub kind: MemoryKind,
    /// Free-form tags.
    pub tags: BTreeSet<String>,
    /// Importance score in [0, 1].
    pub importance: f32,
    /// Emotional salience.
    pub emotional_weight: f32,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning agent, if any.
    pub agent_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Last recall time.
    pub last_accessed_at: DateTime<Utc>,
    /// Recall count.
    pub access_count: u64,
}

/// Options accepted by `remember`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RememberOptions {
    /// Kind of memory; defaults to `Fact`.
    pub kind: Option<MemoryKind>,
    /// Tags to attach.
    pub tags: BTreeSet<String>,
    /// Importance in [0, 1]; defaults to 0.5.
    pub importance: Option<f32>,
    /// Emotional salience; defaults to 0.0.
    pub emotional_weight: Option<f32>,
    /// Optional expiry in seconds.
    pub ttl_secs: Option<u64>,
}

/// Options accepted by `recall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallOptions {
    /// Restrict results to a single kind.
    pub kind: Option<MemoryKind>,
    /// Maximum number of results.
    pub limit: usize,
    /// Minimum semantic similarity for a candidate to be considered.
    pub threshold: f32,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            kind: None,
            limit: 10,
            threshold: 0.5,
        }
    }
}

/// A single ranked recall result. Output-only; the embedding is stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    /// The matching record, without its embedding.
    pub memory: MemoryRecordView,
    /// Relevance score in [0, 1].
    pub score: f32,
    /// Human-readable explanation of why this record matched.
    pub reason: String,
}

/// Request for an agent context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    /// Tenant to build context for.
    pub tenant_id: String,
    /// Optional agent within the tenant.
    pub agent_id: Option<String>,
    /// Maximum number of memories to include.
    pub max_memories: usize,
}

/// A bundle of recent memories plus a deterministic summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Concatenated memory contents, most recently accessed first.
    pub context: String,
    /// Deterministic one-line summary of the bundle.
    pub summary: String,
    /// The included memories, embeddings stripped.
    pub memories: Vec<MemoryRecordView>,
    /// Confidence in the bundle. Fixed at 0.95.
    pub confidence: f32,
    /// Number of memories included.
    pub total_count: usize,
    /// When the bundle was generated.
    pub generated_at: DateTime<Utc>,
}

/// Sizes of the four engine indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSizes {
    /// Records in the semantic (embedding) index.
    pub semantic: usize,
    /// Distinct tokens in the keyword index.
    pub keyword: usize,
    /// Distinct kinds in the kind index.
    pub kind: usize,
    /// Distinct tags in the tag index.
    pub tag: usize,
}

/// Aggregate statistics over the engine's memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total live records.
    pub total_memories: usize,
    /// Record count per kind.
    pub by_kind: BTreeMap<MemoryKind, usize>,
    /// Mean importance across all records (0.0 when empty).
    pub average_importance: f32,
    /// Records accessed within the last 24 hours, inclusive.
    pub recent_activity: usize,
    /// Current index sizes.
    pub index_sizes: IndexSizes,
}

/// Report from a consolidation (confidence decay) cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Number of records whose confidence decayed.
    pub memories_decayed: u64,
    /// How long the cycle took.
    pub duration_ms: u64,
}

/// Fields updated when a record is touched by a recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessUpdate {
    /// New access count.
    pub access_count: u64,
    /// New last-accessed timestamp.
    pub last_accessed_at: DateTime<Utc>,
}

/// Sort order for storage listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Most recently accessed first.
    #[default]
    LastAccessedAt,
    /// Most recently created first.
    CreatedAt,
    /// Highest importance first.
    Importance,
}

/// Filter for storage listings.
///
/// `tenant_id: None` lists across all tenants and is reserved for the
/// engine's own bulk index load at startup; caller-facing reads always scope
/// to a tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    /// Tenant to list records for, or all tenants when `None`.
    pub tenant_id: Option<String>,
    /// Optional agent within the tenant.
    pub agent_id: Option<String>,
    /// Maximum records to return (0 = unbounded).
    pub limit: usize,
    /// Sort order.
    pub sort_by: SortBy,
}

impl ListFilter {
    /// Filter for a scope, most recently accessed first.
    pub fn scoped(scope: &MemoryScope, limit: usize) -> Self {
        Self {
            tenant_id: Some(scope.tenant_id.clone()),
            agent_id: scope.agent_id.clone(),
            limit,
            sort_by: SortBy::LastAccessedAt,
        }
    }

    /// Unscoped filter covering every record, used for bulk index loads.
    pub fn all() -> Self {
        Self::default()
    }
}

/// Statistics reported by a storage adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Total records in storage.
    pub total_records: usize,
    /// Distinct tenants with at least one record.
    pub tenants: usize,
}

/// An embedding produced by an embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector itself.
    pub vector: Vec<f32>,
    /// Provider-reported confidence in [0, 1].
    pub confidence: f32,
    /// Model that produced the vector.
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in MemoryKind::ALL {
            assert_eq!(kind.as_str().parse::<MemoryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_kind_rejects_unknown() {
        assert!("opinion".parse::<MemoryKind>().is_err());
    }

    #[test]
    fn test_scope_tenant_isolation() {
        let scope = MemoryScope::tenant("t1");
        assert!(scope.covers("t1", Some("a1")));
        assert!(!scope.covers("t2", Some("a1")));
    }

    #[test]
    fn test_scope_agent_isolation() {
        let scope = MemoryScope::agent("t1", "agent-a");
        assert!(scope.covers("t1", Some("agent-a")));
        assert!(scope.covers("t1", None)); // tenant-wide records are shared
        assert!(!scope.covers("t1", Some("agent-b")));
        assert!(!scope.covers("t2", Some("agent-a")));
    }

    #[test]
    fn test_accessed_within_inclusive_boundary() {
        let now = Utc::now();
        let mut record = test_record();
        record.last_accessed_at = now - Duration::hours(24);
        assert!(record.accessed_within(Duration::hours(24), now));
        record.last_accessed_at = now - Duration::hours(24) - Duration::seconds(1);
        assert!(!record.accessed_within(Duration::hours(24), now));
    }

    #[test]
    fn test_view_strips_embedding() {
        let record = test_record();
        let view = record.to_view();
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(view.content, record.content);
    }

    fn test_record() -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: MemoryId::new(),
            content: "Test memory".to_string(),
            embedding: vec![0.1, 0.2, 0.3],
            kind: MemoryKind::Fact,
            tags: BTreeSet::new(),
            importance: 0.5,
            emotional_weight: 0.0,
            confidence: 1.0,
            tenant_id: "t1".to_string(),
            agent_id: None,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl_secs: None,
        }
    }
}
