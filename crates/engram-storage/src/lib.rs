//! SQLite storage adapter for the Engram memory engine.
//!
//! Implements the `StorageAdapter` port over a single SQLite connection.
//! Embeddings are stored as little-endian f32 BLOBs; tags as a JSON array.
//! The connection is shared behind a mutex: memory workloads are read-heavy
//! and the engine serves reads from its in-memory indices, so storage sees
//! mostly writes and point lookups.

pub mod migration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_types::error::{MemoryError, MemoryResult};
use engram_types::memory::{
    AccessUpdate, ListFilter, MemoryId, MemoryKind, MemoryRecord, SortBy, StorageStats,
};
use engram_types::ports::StorageAdapter;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Storage adapter backed by SQLite.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let conn =
            Connection::open(path).map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database, used in tests and ephemeral deployments.
    pub fn open_in_memory() -> MemoryResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MemoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MemoryError::Internal(e.to_string()))
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> MemoryResult<()> {
        let conn = self.lock()?;
        migration::run_migrations(&conn).map_err(|e| MemoryError::Storage(e.to_string()))?;
        debug!("SQLite storage initialized");
        Ok(())
    }

    async fn store(&self, record: &MemoryRecord) -> MemoryResult<bool> {
        let conn = self.lock()?;
        let tags = serde_json::to_string(&record.tags)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO memories
                 (id, content, embedding, kind, tags, importance, emotional_weight, confidence,
                  tenant_id, agent_id, created_at, updated_at, last_accessed_at, access_count, ttl_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params![
                    record.id.to_string(),
                    record.content,
                    embedding_to_bytes(&record.embedding),
                    record.kind.as_str(),
                    tags,
                    record.importance as f64,
                    record.emotional_weight as f64,
                    record.confidence as f64,
                    record.tenant_id,
                    record.agent_id,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                    record.last_accessed_at.to_rfc3339(),
                    record.access_count as i64,
                    record.ttl_secs.map(|t| t as i64),
                ],
            )
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(changed == 1)
    }

    async fn retrieve(&self, id: MemoryId) -> MemoryResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"))
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let result = stmt.query_row(rusqlite::params![id.to_string()], row_to_record);
        match result {
            Ok(record) => Ok(Some(record?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Storage(e.to_string())),
        }
    }

    async fn update(&self, id: MemoryId, update: AccessUpdate) -> MemoryResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE memories
                 SET access_count = ?1, last_accessed_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![
                    update.access_count as i64,
                    update.last_accessed_at.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(changed == 1)
    }

    async fn delete(&self, id: MemoryId) -> MemoryResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM memories WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(changed == 1)
    }

    async fn list(&self, filter: &ListFilter) -> MemoryResult<Vec<MemoryRecord>> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {COLUMNS} FROM memories WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref tenant_id) = filter.tenant_id {
            sql.push_str(&format!(" AND tenant_id = ?{param_idx}"));
            params.push(Box::new(tenant_id.clone()));
            param_idx += 1;
        }
        if let Some(ref agent_id) = filter.agent_id {
            // Tenant-wide records (no agent) are visible to every agent.
            sql.push_str(&format!(" AND (agent_id IS NULL OR agent_id = ?{param_idx})"));
            params.push(Box::new(agent_id.clone()));
            let _ = param_idx;
        }

        sql.push_str(match filter.sort_by {
            SortBy::LastAccessedAt => " ORDER BY last_accessed_at DESC",
            SortBy::CreatedAt => " ORDER BY created_at DESC",
            SortBy::Importance => " ORDER BY importance DESC",
        });
        if filter.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", filter.limit));
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_record)
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| MemoryError::Storage(e.to_string()))??);
        }
        Ok(records)
    }

    async fn stats(&self) -> MemoryResult<StorageStats> {
        let conn = self.lock()?;
        let (total, tenants) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT tenant_id) FROM memories",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(StorageStats {
            total_records: total as usize,
            tenants: tenants as usize,
        })
    }

    async fn decay_confidence(
        &self,
        cutoff: DateTime<Utc>,
        factor: f32,
        floor: f32,
    ) -> MemoryResult<u64> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE memories SET confidence = MAX(?1, confidence * ?2)
                 WHERE last_accessed_at < ?3 AND confidence > ?1",
                rusqlite::params![floor as f64, factor as f64, cutoff.to_rfc3339()],
            )
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(changed as u64)
    }
}

const COLUMNS: &str = "id, content, embedding, kind, tags, importance, emotional_weight, \
                       confidence, tenant_id, agent_id, created_at, updated_at, \
                       last_accessed_at, access_count, ttl_secs";

/// Map a row in COLUMNS order to a record. Field-level decode failures are
/// deferred into the inner `MemoryResult` so rusqlite's row plumbing stays
/// simple.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryResult<MemoryRecord>> {
    let id_str: String = row.get(0)?;
    let content: String = row.get(1)?;
    let embedding_bytes: Vec<u8> = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let tags_str: String = row.get(4)?;
    let importance: f64 = row.get(5)?;
    let emotional_weight: f64 = row.get(6)?;
    let confidence: f64 = row.get(7)?;
    let tenant_id: String = row.get(8)?;
    let agent_id: Option<String> = row.get(9)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;
    let accessed_str: String = row.get(12)?;
    let access_count: i64 = row.get(13)?;
    let ttl_secs: Option<i64> = row.get(14)?;

    Ok(build_record(
        id_str,
        content,
        embedding_bytes,
        kind_str,
        tags_str,
        importance as f32,
        emotional_weight as f32,
        confidence as f32,
        tenant_id,
        agent_id,
        created_str,
        updated_str,
        accessed_str,
        access_count as u64,
        ttl_secs.map(|t| t as u64),
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    id_str: String,
    content: String,
    embedding_bytes: Vec<u8>,
    kind_str: String,
    tags_str: String,
    importance: f32,
    emotional_weight: f32,
    confidence: f32,
    tenant_id: String,
    agent_id: Option<String>,
    created_str: String,
    updated_str: String,
    accessed_str: String,
    access_count: u64,
    ttl_secs: Option<u64>,
) -> MemoryResult<MemoryRecord> {
    let id = uuid::Uuid::parse_str(&id_str)
        .map(MemoryId)
        .map_err(|e| MemoryError::Storage(e.to_string()))?;
    let kind: MemoryKind = kind_str.parse()?;
    let tags: BTreeSet<String> =
        serde_json::from_str(&tags_str).map_err(|e| MemoryError::Serialization(e.to_string()))?;
    let parse_time = |s: &str| -> MemoryResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MemoryError::Storage(e.to_string()))
    };
    Ok(MemoryRecord {
        id,
        content,
        embedding: embedding_from_bytes(&embedding_bytes),
        kind,
        tags,
        importance,
        emotional_weight,
        confidence,
        tenant_id,
        agent_id,
        created_at: parse_time(&created_str)?,
        updated_at: parse_time(&updated_str)?,
        last_accessed_at: parse_time(&accessed_str)?,
        access_count,
        ttl_secs,
    })
}

/// Serialize an embedding to bytes for SQLite BLOB storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding from bytes.
fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.initialize().await.unwrap();
        storage
    }

    fn record(tenant: &str, agent: Option<&str>, content: &str) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            id: MemoryId::new(),
            content: content.to_string(),
            embedding: vec![0.25, -0.5, 1.0],
            kind: MemoryKind::Fact,
            tags: ["alpha".to_string()].into_iter().collect(),
            importance: 0.7,
            emotional_weight: 0.1,
            confidence: 1.0,
            tenant_id: tenant.to_string(),
            agent_id: agent.map(str::to_string),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl_secs: Some(3600),
        }
    }

    #[tokio::test]
    async fn test_store_and_retrieve_roundtrip() {
        let storage = setup().await;
        let rec = record("t1", Some("a1"), "User prefers dark mode");
        assert!(storage.store(&rec).await.unwrap());
        let loaded = storage.retrieve(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, rec.content);
        assert_eq!(loaded.embedding, rec.embedding);
        assert_eq!(loaded.tags, rec.tags);
        assert_eq!(loaded.agent_id.as_deref(), Some("a1"));
        assert_eq!(loaded.ttl_secs, Some(3600));
    }

    #[tokio::test]
    async fn test_store_duplicate_id_returns_false() {
        let storage = setup().await;
        let rec = record("t1", None, "once");
        assert!(storage.store(&rec).await.unwrap());
        assert!(!storage.store(&rec).await.unwrap());
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_none() {
        let storage = setup().await;
        assert!(storage.retrieve(MemoryId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = setup().await;
        let rec = record("t1", None, "gone soon");
        storage.store(&rec).await.unwrap();
        assert!(storage.delete(rec.id).await.unwrap());
        assert!(!storage.delete(rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_access_stats() {
        let storage = setup().await;
        let rec = record("t1", None, "counted");
        storage.store(&rec).await.unwrap();
        let later = Utc::now() + Duration::minutes(5);
        let applied = storage
            .update(
                rec.id,
                AccessUpdate {
                    access_count: 3,
                    last_accessed_at: later,
                },
            )
            .await
            .unwrap();
        assert!(applied);
        let loaded = storage.retrieve(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 3);
        assert!((loaded.last_accessed_at - later).num_seconds().abs() < 1);
    }

    #[tokio::test]
    async fn test_list_scopes_by_tenant_and_agent() {
        let storage = setup().await;
        storage.store(&record("t1", None, "shared")).await.unwrap();
        storage
            .store(&record("t1", Some("a1"), "mine"))
            .await
            .unwrap();
        storage
            .store(&record("t1", Some("a2"), "theirs"))
            .await
            .unwrap();
        storage.store(&record("t2", None, "foreign")).await.unwrap();

        let filter = ListFilter {
            tenant_id: Some("t1".to_string()),
            agent_id: Some("a1".to_string()),
            limit: 10,
            sort_by: SortBy::LastAccessedAt,
        };
        let records = storage.list(&filter).await.unwrap();
        let contents: Vec<_> = records.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(records.len(), 2);
        assert!(contents.contains(&"shared"));
        assert!(contents.contains(&"mine"));
    }

    #[tokio::test]
    async fn test_list_all_for_bulk_load() {
        let storage = setup().await;
        storage.store(&record("t1", None, "a")).await.unwrap();
        storage.store(&record("t2", None, "b")).await.unwrap();
        let records = storage.list(&ListFilter::all()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_list_sorted_by_importance() {
        let storage = setup().await;
        let mut low = record("t1", None, "low");
        low.importance = 0.1;
        let mut high = record("t1", None, "high");
        high.importance = 0.9;
        storage.store(&low).await.unwrap();
        storage.store(&high).await.unwrap();
        let filter = ListFilter {
            tenant_id: Some("t1".to_string()),
            agent_id: None,
            limit: 10,
            sort_by: SortBy::Importance,
        };
        let records = storage.list(&filter).await.unwrap();
        assert_eq!(records[0].content, "high");
    }

    #[tokio::test]
    async fn test_decay_confidence_respects_cutoff_and_floor() {
        let storage = setup().await;
        let mut stale = record("t1", None, "stale");
        stale.last_accessed_at = Utc::now() - Duration::days(30);
        let fresh = record("t1", None, "fresh");
        storage.store(&stale).await.unwrap();
        storage.store(&fresh).await.unwrap();

        let cutoff = Utc::now() - Duration::days(7);
        let decayed = storage.decay_confidence(cutoff, 0.9, 0.1).await.unwrap();
        assert_eq!(decayed, 1);
        let stale_loaded = storage.retrieve(stale.id).await.unwrap().unwrap();
        assert!((stale_loaded.confidence - 0.9).abs() < 1e-6);
        let fresh_loaded = storage.retrieve(fresh.id).await.unwrap().unwrap();
        assert!((fresh_loaded.confidence - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stats() {
        let storage = setup().await;
        storage.store(&record("t1", None, "a")).await.unwrap();
        storage.store(&record("t2", None, "b")).await.unwrap();
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.tenants, 2);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.db");
        let rec = record("t1", None, "durable");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.initialize().await.unwrap();
            storage.store(&rec).await.unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        storage.initialize().await.unwrap();
        let loaded = storage.retrieve(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "durable");
    }
}
