//! Four parallel in-memory indices over memory records.
//!
//! All four indices live behind a single `RwLock` so a record is either fully
//! indexed or not indexed at all from any reader's point of view. Search
//! methods take the lock for reading only; `add`/`remove`/`touch` are the only
//! writers and are idempotent.

use chrono::{DateTime, Duration, Utc};
use engram_types::memory::{
    IndexSizes, MemoryId, MemoryKind, MemoryRecord, MemoryScope, MemoryStats,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

/// Minimum token length indexed by the keyword index.
const MIN_TOKEN_LEN: usize = 2;

/// Window for the `recent_activity` statistic.
const RECENT_ACTIVITY_HOURS: i64 = 24;

/// Metadata kept alongside each indexed embedding.
///
/// Tokens and tags are remembered so removal never has to re-derive them from
/// a record that may have changed since indexing.
#[derive(Debug, Clone)]
struct IndexedRecord {
    embedding: Vec<f32>,
    tenant_id: String,
    agent_id: Option<String>,
    kind: MemoryKind,
    importance: f32,
    last_accessed_at: DateTime<Utc>,
    tokens: Vec<String>,
    tags: BTreeSet<String>,
}

#[derive(Default)]
struct IndexState {
    semantic: HashMap<MemoryId, IndexedRecord>,
    keyword: HashMap<String, HashSet<MemoryId>>,
    kinds: HashMap<MemoryKind, HashSet<MemoryId>>,
    tags: HashMap<String, HashSet<MemoryId>>,
}

/// How a candidate was found, used to build the human-readable reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// Matched by embedding similarity only.
    Semantic,
    /// Matched by keyword overlap only.
    Keyword,
    /// Matched by both signals.
    Both,
}

impl MatchSource {
    /// Human-readable relevance reason for recall output.
    pub fn reason(&self) -> &'static str {
        match self {
            MatchSource::Semantic => "semantic similarity",
            MatchSource::Keyword => "keyword match",
            MatchSource::Both => "semantic + keyword match",
        }
    }
}

/// A scored candidate from a single index search.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    /// The matching record.
    pub id: MemoryId,
    /// Score in [0, 1].
    pub score: f32,
    /// Last access time, used for deterministic tie-breaking in merges.
    pub last_accessed_at: DateTime<Utc>,
}

/// A candidate after merging semantic and keyword results.
#[derive(Debug, Clone)]
pub struct MergedCandidate {
    /// The matching record.
    pub id: MemoryId,
    /// The higher of the two per-signal scores.
    pub score: f32,
    /// Which signal(s) produced the match.
    pub source: MatchSource,
}

/// Search constraints shared by the semantic and keyword searches.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Minimum cosine similarity for semantic candidates.
    pub threshold: f32,
    /// Restrict candidates to a single kind.
    pub kind: Option<MemoryKind>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            kind: None,
        }
    }
}

/// Maintains the semantic, keyword, kind, and tag indices.
#[derive(Default)]
pub struct IndexManager {
    state: RwLock<IndexState>,
}

impl IndexManager {
    /// Create an empty index manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a record in all four indices. No-op if the id is already indexed.
    pub fn add(&self, record: &MemoryRecord) {
        let mut state = match self.state.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.semantic.contains_key(&record.id) {
            return;
        }
        let tokens = tokenize(&record.content);
        for token in &tokens {
            state
                .keyword
                .entry(token.clone())
                .or_default()
                .insert(record.id);
        }
        state.kinds.entry(record.kind).or_default().insert(record.id);
        for tag in &record.tags {
            state.tags.entry(tag.clone()).or_default().insert(record.id);
        }
        state.semantic.insert(
            record.id,
            IndexedRecord {
                embedding: record.embedding.clone(),
                tenant_id: record.tenant_id.clone(),
                agent_id: record.agent_id.clone(),
                kind: record.kind,
                importance: record.importance,
                last_accessed_at: record.last_accessed_at,
                tokens,
                tags: record.tags.clone(),
            },
        );
    }

    /// Remove a record from all four indices. No-op if the id is absent.
    pub fn remove(&self, id: MemoryId) {
        let mut state = match self.state.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(entry) = state.semantic.remove(&id) else {
            return;
        };
        for token in &entry.tokens {
            if let Some(postings) = state.keyword.get_mut(token) {
                postings.remove(&id);
                if postings.is_empty() {
                    state.keyword.remove(token);
                }
            }
        }
        if let Some(ids) = state.kinds.get_mut(&entry.kind) {
            ids.remove(&id);
            if ids.is_empty() {
                state.kinds.remove(&entry.kind);
            }
        }
        for tag in &entry.tags {
            if let Some(ids) = state.tags.get_mut(tag) {
                ids.remove(&id);
                if ids.is_empty() {
                    state.tags.remove(tag);
                }
            }
        }
    }

    /// Whether a record is currently indexed.
    pub fn contains(&self, id: MemoryId) -> bool {
        match self.state.read() {
            Ok(s) => s.semantic.contains_key(&id),
            Err(poisoned) => poisoned.into_inner().semantic.contains_key(&id),
        }
    }

    /// Record that a memory was just accessed.
    pub fn touch(&self, id: MemoryId, at: DateTime<Utc>) {
        let mut state = match self.state.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = state.semantic.get_mut(&id) {
            entry.last_accessed_at = at;
        }
    }

    /// Cosine-similarity search over embeddings within a scope.
    ///
    /// Returns candidates with similarity >= `opts.threshold`, sorted by score
    /// descending.
    pub fn semantic_search(
        &self,
        query_embedding: &[f32],
        scope: &MemoryScope,
        opts: &SearchOptions,
    ) -> Vec<SearchCandidate> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut candidates: Vec<SearchCandidate> = state
            .semantic
            .iter()
            .filter(|(_, entry)| scope.covers(&entry.tenant_id, entry.agent_id.as_deref()))
            .filter(|(_, entry)| opts.kind.map_or(true, |k| entry.kind == k))
            .filter_map(|(id, entry)| {
                let score = cosine_similarity(query_embedding, &entry.embedding);
                (score >= opts.threshold).then_some(SearchCandidate {
                    id: *id,
                    score,
                    last_accessed_at: entry.last_accessed_at,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// Token-overlap search over the keyword index within a scope.
    ///
    /// Scores are the fraction of query tokens present in the record's
    /// content, so they are comparable with cosine scores when merging.
    pub fn keyword_search(
        &self,
        query: &str,
        scope: &MemoryScope,
        opts: &SearchOptions,
    ) -> Vec<SearchCandidate> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let state = match self.state.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut overlap: HashMap<MemoryId, usize> = HashMap::new();
        for token in &query_tokens {
            if let Some(postings) = state.keyword.get(token) {
                for id in postings {
                    *overlap.entry(*id).or_default() += 1;
                }
            }
        }
        let mut candidates: Vec<SearchCandidate> = overlap
            .into_iter()
            .filter_map(|(id, count)| {
                let entry = state.semantic.get(&id)?;
                if !scope.covers(&entry.tenant_id, entry.agent_id.as_deref()) {
                    return None;
                }
                if opts.kind.is_some_and(|k| entry.kind != k) {
                    return None;
                }
                Some(SearchCandidate {
                    id,
                    score: count as f32 / query_tokens.len() as f32,
                    last_accessed_at: entry.last_accessed_at,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// Aggregate statistics over all indexed records.
    pub fn stats(&self, now: DateTime<Utc>) -> MemoryStats {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let total = state.semantic.len();
        let mut by_kind: BTreeMap<MemoryKind, usize> = BTreeMap::new();
        let mut importance_sum = 0.0f64;
        let mut recent = 0usize;
        let window = Duration::hours(RECENT_ACTIVITY_HOURS);
        for entry in state.semantic.values() {
            *by_kind.entry(entry.kind).or_default() += 1;
            importance_sum += entry.importance as f64;
            if now - entry.last_accessed_at <= window {
                recent += 1;
            }
        }
        MemoryStats {
            total_memories: total,
            by_kind,
            average_importance: if total == 0 {
                0.0
            } else {
                (importance_sum / total as f64) as f32
            },
            recent_activity: recent,
            index_sizes: IndexSizes {
                semantic: state.semantic.len(),
                keyword: state.keyword.len(),
                kind: state.kinds.len(),
                tag: state.tags.len(),
            },
        }
    }
}

/// Merge semantic and keyword candidates into a single ranked list.
///
/// Union by id, keeping the higher of the two scores. Ties break toward the
/// more recently accessed record, then by id so the order is fully
/// deterministic. Truncated to `limit`.
pub fn merge_search_results(
    semantic: Vec<SearchCandidate>,
    keyword: Vec<SearchCandidate>,
    limit: usize,
) -> Vec<MergedCandidate> {
    let mut merged: HashMap<MemoryId, (SearchCandidate, MatchSource)> = HashMap::new();
    for candidate in semantic {
        merged.insert(candidate.id, (candidate, MatchSource::Semantic));
    }
    for candidate in keyword {
        match merged.get_mut(&candidate.id) {
            Some((existing, source)) => {
                *source = MatchSource::Both;
                if candidate.score > existing.score {
                    existing.score = candidate.score;
                }
            }
            None => {
                merged.insert(candidate.id, (candidate, MatchSource::Keyword));
            }
        }
    }
    let mut results: Vec<(SearchCandidate, MatchSource)> = merged.into_values().collect();
    results.sort_by(|(a, _), (b, _)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
        .into_iter()
        .map(|(c, source)| MergedCandidate {
            id: c.id,
            score: c.score,
            source,
        })
        .collect()
}

/// Lowercased alphanumeric tokens of at least `MIN_TOKEN_LEN` characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
