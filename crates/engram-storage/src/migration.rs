//! SQLite schema creation and migration.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 1;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id               TEXT PRIMARY KEY,
            content          TEXT NOT NULL,
            embedding        BLOB NOT NULL,
            kind             TEXT NOT NULL,
            tags             TEXT NOT NULL,
            importance       REAL NOT NULL,
            emotional_weight REAL NOT NULL,
            confidence       REAL NOT NULL,
            tenant_id        TEXT NOT NULL,
            agent_id         TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL,
            access_count     INTEGER NOT NULL DEFAULT 0,
            ttl_secs         INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_memories_tenant ON memories(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_memories_tenant_agent ON memories(tenant_id, agent_id);
        CREATE INDEX IF NOT EXISTS idx_memories_accessed ON memories(last_accessed_at);",
    )
}
