//! SQLite persistence adapter for the engram memory system.
//!
//! Four tables back the data model:
//!
//! ```sql
//! entities       -- graph nodes, resolved by (user, lower(name))
//! relationships  -- typed edges, unique per (user, source, target, kind)
//! memories       -- episodic log entries, linked to entities by ID list
//! embeddings     -- packed little-endian f32 vectors, one per memory
//! ```
//!
//! WAL mode for concurrent reads, timestamps as RFC 3339 TEXT, identifier
//! sets as delimited TEXT decoded through [`IdSet`]. The store is the sole
//! owner of durable state; callers serialize access (one connection, one
//! writer at a time).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::error::{EngramError, Result};
use crate::model::{Entity, Memory, Relationship};
use crate::types::{
    Embedding, EmbeddingId, EntityId, EntityKind, IdSet, MemoryId, MemoryKind, RelationKind,
    RelationshipId, TimeRange, UserId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    id                  TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    kind                TEXT NOT NULL,
    name                TEXT NOT NULL,
    aliases             TEXT NOT NULL DEFAULT '',
    description         TEXT NOT NULL DEFAULT '',
    mention_count       INTEGER NOT NULL,
    first_mentioned     TEXT NOT NULL,
    last_mentioned      TEXT NOT NULL,
    confidence          REAL NOT NULL,
    importance          INTEGER NOT NULL,
    source_conversation TEXT
);
CREATE INDEX IF NOT EXISTS idx_entities_user_name
    ON entities (user_id, name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS relationships (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    source_id       TEXT NOT NULL,
    target_id       TEXT NOT NULL,
    kind            TEXT NOT NULL,
    directional     INTEGER NOT NULL,
    mention_count   INTEGER NOT NULL,
    first_mentioned TEXT NOT NULL,
    last_mentioned  TEXT NOT NULL,
    confidence      REAL NOT NULL,
    properties      TEXT NOT NULL DEFAULT '{}',
    UNIQUE (user_id, source_id, target_id, kind)
);
CREATE INDEX IF NOT EXISTS idx_relationships_user
    ON relationships (user_id);

CREATE TABLE IF NOT EXISTS memories (
    id                  TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    content             TEXT NOT NULL,
    summary             TEXT NOT NULL DEFAULT '',
    kind                TEXT NOT NULL,
    category            TEXT NOT NULL DEFAULT 'general',
    entity_ids          TEXT NOT NULL DEFAULT '',
    event_at            TEXT,
    date_text           TEXT,
    confidence          REAL NOT NULL,
    importance          INTEGER NOT NULL,
    access_count        INTEGER NOT NULL,
    last_accessed       TEXT NOT NULL,
    is_compressed       INTEGER NOT NULL DEFAULT 0,
    compressed_from     TEXT NOT NULL DEFAULT '',
    embedding_id        TEXT,
    source_conversation TEXT,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_user_accessed
    ON memories (user_id, last_accessed);

CREATE TABLE IF NOT EXISTS embeddings (
    id         TEXT PRIMARY KEY,
    memory_id  TEXT NOT NULL UNIQUE,
    provider   TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector     BLOB NOT NULL,
    created_at TEXT NOT NULL
);
";

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database holding one or more users' graphs.
pub struct MemoryStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// The schema is created automatically. WAL mode is enabled when
    /// `config.wal_mode` is true.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))?;

        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "engram store opened"
        );

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Insert a new entity row.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn insert_entity(&self, entity: &Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities (id, user_id, kind, name, aliases, description,
                mention_count, first_mentioned, last_mentioned, confidence,
                importance, source_conversation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entity.id.to_string(),
                entity.user_id.as_str(),
                entity.kind.as_str(),
                entity.name,
                entity.aliases.join(","),
                entity.description,
                entity.mention_count,
                entity.first_mentioned.to_rfc3339(),
                entity.last_mentioned.to_rfc3339(),
                f64::from(entity.confidence),
                entity.importance,
                entity.source_conversation,
            ],
        )?;
        debug!(entity = %entity.id, name = %entity.name, "entity inserted");
        Ok(())
    }

    /// Rewrite an existing entity row (mention bookkeeping, aliases, …).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::EntityNotFound`] if no row matches, or
    /// [`EngramError::Database`] on SQLite failures.
    pub fn update_entity(&self, entity: &Entity) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE entities SET kind = ?1, name = ?2, aliases = ?3, description = ?4,
                mention_count = ?5, first_mentioned = ?6, last_mentioned = ?7,
                confidence = ?8, importance = ?9, source_conversation = ?10
             WHERE id = ?11 AND user_id = ?12",
            params![
                entity.kind.as_str(),
                entity.name,
                entity.aliases.join(","),
                entity.description,
                entity.mention_count,
                entity.first_mentioned.to_rfc3339(),
                entity.last_mentioned.to_rfc3339(),
                f64::from(entity.confidence),
                entity.importance,
                entity.source_conversation,
                entity.id.to_string(),
                entity.user_id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(EngramError::EntityNotFound(entity.id.to_string()));
        }
        Ok(())
    }

    /// Fetch an entity by ID.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn get_entity(&self, user: &UserId, id: EntityId) -> Result<Option<Entity>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, kind, name, aliases, description, mention_count,
                    first_mentioned, last_mentioned, confidence, importance,
                    source_conversation
             FROM entities WHERE id = ?1 AND user_id = ?2",
        )?;
        let row = stmt
            .query_row(params![id.to_string(), user.as_str()], entity_from_row)
            .optional()?;
        Ok(row)
    }

    /// Resolve an entity by exact name, case-insensitively, independent of
    /// kind. This is the extractor's find-or-create lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn find_entity_by_name(&self, user: &UserId, name: &str) -> Result<Option<Entity>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, kind, name, aliases, description, mention_count,
                    first_mentioned, last_mentioned, confidence, importance,
                    source_conversation
             FROM entities
             WHERE user_id = ?1 AND name = ?2 COLLATE NOCASE
             LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![user.as_str(), name], entity_from_row)
            .optional()?;
        Ok(row)
    }

    /// List a user's entities, optionally filtered by kind.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn list_entities(
        &self,
        user: &UserId,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, user_id, kind, name, aliases, description, mention_count,
                            first_mentioned, last_mentioned, confidence, importance,
                            source_conversation
                     FROM entities
                     WHERE user_id = ?1 AND kind = ?2
                     ORDER BY mention_count DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![user.as_str(), kind.as_str(), limit as i64],
                    entity_from_row,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, user_id, kind, name, aliases, description, mention_count,
                            first_mentioned, last_mentioned, confidence, importance,
                            source_conversation
                     FROM entities
                     WHERE user_id = ?1
                     ORDER BY mention_count DESC
                     LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![user.as_str(), limit as i64], entity_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Substring search over entity names and aliases, case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn search_entities(&self, user: &UserId, needle: &str, limit: usize) -> Result<Vec<Entity>> {
        let pattern = format!("%{}%", escape_like(needle));
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, kind, name, aliases, description, mention_count,
                    first_mentioned, last_mentioned, confidence, importance,
                    source_conversation
             FROM entities
             WHERE user_id = ?1
               AND (name LIKE ?2 ESCAPE '\\' OR aliases LIKE ?2 ESCAPE '\\')
             ORDER BY mention_count DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user.as_str(), pattern, limit as i64],
            entity_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete an entity row. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn delete_entity(&self, user: &UserId, id: EntityId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM entities WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Count entities per kind for the stats surface.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn entity_counts(&self, user: &UserId) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT kind, COUNT(*) FROM entities WHERE user_id = ?1 GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            out.insert(kind, count.max(0) as u64);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Insert a new relationship edge.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures (including a
    /// uniqueness violation on (user, source, target, kind)).
    pub fn insert_relationship(&self, rel: &Relationship) -> Result<()> {
        let properties = serde_json::to_string(&rel.properties)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO relationships (id, user_id, source_id, target_id, kind,
                directional, mention_count, first_mentioned, last_mentioned,
                confidence, properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rel.id.to_string(),
                rel.user_id.as_str(),
                rel.source_id.to_string(),
                rel.target_id.to_string(),
                rel.kind.as_str(),
                rel.directional,
                rel.mention_count,
                rel.first_mentioned.to_rfc3339(),
                rel.last_mentioned.to_rfc3339(),
                f64::from(rel.confidence),
                properties,
            ],
        )?;
        Ok(())
    }

    /// Rewrite an existing relationship row.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::RelationshipNotFound`] if no row matches, or
    /// [`EngramError::Database`] on SQLite failures.
    pub fn update_relationship(&self, rel: &Relationship) -> Result<()> {
        let properties = serde_json::to_string(&rel.properties)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let changed = self.conn.execute(
            "UPDATE relationships SET mention_count = ?1, last_mentioned = ?2,
                confidence = ?3, properties = ?4
             WHERE id = ?5 AND user_id = ?6",
            params![
                rel.mention_count,
                rel.last_mentioned.to_rfc3339(),
                f64::from(rel.confidence),
                properties,
                rel.id.to_string(),
                rel.user_id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(EngramError::RelationshipNotFound(rel.id));
        }
        Ok(())
    }

    /// Find the unique edge (user, source, target, kind), if present.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn find_relationship(
        &self,
        user: &UserId,
        source: EntityId,
        target: EntityId,
        kind: &RelationKind,
    ) -> Result<Option<Relationship>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, source_id, target_id, kind, directional,
                    mention_count, first_mentioned, last_mentioned, confidence,
                    properties
             FROM relationships
             WHERE user_id = ?1 AND source_id = ?2 AND target_id = ?3 AND kind = ?4",
        )?;
        let row = stmt
            .query_row(
                params![
                    user.as_str(),
                    source.to_string(),
                    target.to_string(),
                    kind.as_str()
                ],
                relationship_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All edges touching an entity, as source or target.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn relationships_for_entity(
        &self,
        user: &UserId,
        entity: EntityId,
    ) -> Result<Vec<Relationship>> {
        let id = entity.to_string();
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, source_id, target_id, kind, directional,
                    mention_count, first_mentioned, last_mentioned, confidence,
                    properties
             FROM relationships
             WHERE user_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
        )?;
        let rows = stmt.query_map(params![user.as_str(), id], relationship_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every edge a user owns. The graph traversal loads this working set
    /// once per query; graphs here are conversation-scale, not web-scale.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn all_relationships(&self, user: &UserId) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, source_id, target_id, kind, directional,
                    mention_count, first_mentioned, last_mentioned, confidence,
                    properties
             FROM relationships WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user.as_str()], relationship_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete a relationship row. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn delete_relationship(&self, user: &UserId, id: RelationshipId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM relationships WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Total edge count for the stats surface.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn relationship_count(&self, user: &UserId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE user_id = ?1",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    /// Insert a new memory row.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        self.conn.execute(
            "INSERT INTO memories (id, user_id, content, summary, kind, category,
                entity_ids, event_at, date_text, confidence, importance,
                access_count, last_accessed, is_compressed, compressed_from,
                embedding_id, source_conversation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16, ?17, ?18)",
            params![
                memory.id.to_string(),
                memory.user_id.as_str(),
                memory.content,
                memory.summary,
                memory.kind.as_str(),
                memory.category,
                memory.entity_ids.to_delimited(),
                memory.timestamp.map(|t| t.to_rfc3339()),
                memory.date_text,
                f64::from(memory.confidence),
                memory.importance,
                memory.access_count,
                memory.last_accessed.to_rfc3339(),
                memory.is_compressed,
                memory.compressed_from.to_delimited(),
                memory.embedding_id.map(|id| id.to_string()),
                memory.source_conversation,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        debug!(memory = %memory.id, kind = %memory.kind, "memory inserted");
        Ok(())
    }

    /// Rewrite an existing memory row.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::MemoryNotFound`] if no row matches, or
    /// [`EngramError::Database`] on SQLite failures.
    pub fn update_memory(&self, memory: &Memory) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE memories SET content = ?1, summary = ?2, kind = ?3, category = ?4,
                entity_ids = ?5, event_at = ?6, date_text = ?7, confidence = ?8,
                importance = ?9, access_count = ?10, last_accessed = ?11,
                is_compressed = ?12, compressed_from = ?13, embedding_id = ?14
             WHERE id = ?15 AND user_id = ?16",
            params![
                memory.content,
                memory.summary,
                memory.kind.as_str(),
                memory.category,
                memory.entity_ids.to_delimited(),
                memory.timestamp.map(|t| t.to_rfc3339()),
                memory.date_text,
                f64::from(memory.confidence),
                memory.importance,
                memory.access_count,
                memory.last_accessed.to_rfc3339(),
                memory.is_compressed,
                memory.compressed_from.to_delimited(),
                memory.embedding_id.map(|id| id.to_string()),
                memory.id.to_string(),
                memory.user_id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(EngramError::MemoryNotFound(memory.id));
        }
        Ok(())
    }

    /// Fetch a memory by ID.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn get_memory(&self, user: &UserId, id: MemoryId) -> Result<Option<Memory>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories WHERE id = ?1 AND user_id = ?2",
        )?;
        let row = stmt
            .query_row(params![id.to_string(), user.as_str()], memory_from_row)
            .optional()?;
        Ok(row)
    }

    /// Delete a memory row and its embedding. Returns `true` if removed.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn delete_memory(&self, user: &UserId, id: MemoryId) -> Result<bool> {
        let id_str = id.to_string();
        self.conn.execute(
            "DELETE FROM embeddings WHERE memory_id = ?1",
            params![id_str],
        )?;
        let deleted = self.conn.execute(
            "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
            params![id_str, user.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Substring search over memory content and summary, case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn search_memories(&self, user: &UserId, needle: &str, limit: usize) -> Result<Vec<Memory>> {
        let pattern = format!("%{}%", escape_like(needle));
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories
             WHERE user_id = ?1
               AND (content LIKE ?2 ESCAPE '\\' OR summary LIKE ?2 ESCAPE '\\')
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user.as_str(), pattern, limit as i64],
            memory_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Memories whose event time falls inside `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn memories_in_range(
        &self,
        user: &UserId,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories
             WHERE user_id = ?1 AND event_at IS NOT NULL
               AND event_at >= ?2 AND event_at < ?3
             ORDER BY event_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                user.as_str(),
                range.start.to_rfc3339(),
                range.end.to_rfc3339(),
                limit as i64
            ],
            memory_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Memories linked to an entity.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn memories_for_entity(
        &self,
        user: &UserId,
        entity: EntityId,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        // entity_ids is a delimited list; LIKE narrows candidates and the
        // decoded IdSet makes the authoritative membership call.
        let pattern = format!("%{}%", entity.0);
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories
             WHERE user_id = ?1 AND entity_ids LIKE ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user.as_str(), pattern, limit as i64],
            memory_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            let memory = row?;
            if memory.entity_ids.contains(&entity) {
                out.push(memory);
            }
        }
        Ok(out)
    }

    /// Compression candidates: memories last accessed before `cutoff`,
    /// ordered by ascending importance then age, capped at `cap`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn stale_memories(
        &self,
        user: &UserId,
        cutoff: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Memory>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories
             WHERE user_id = ?1 AND last_accessed < ?2
             ORDER BY importance ASC, created_at ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user.as_str(), cutoff.to_rfc3339(), cap as i64],
            memory_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletion candidates: compressed memories created before `cutoff`
    /// with importance at or below `max_importance`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn deletable_memories(
        &self,
        user: &UserId,
        cutoff: DateTime<Utc>,
        max_importance: u8,
    ) -> Result<Vec<Memory>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, user_id, content, summary, kind, category, entity_ids,
                    event_at, date_text, confidence, importance, access_count,
                    last_accessed, is_compressed, compressed_from, embedding_id,
                    source_conversation, created_at
             FROM memories
             WHERE user_id = ?1 AND is_compressed = 1
               AND created_at < ?2 AND importance <= ?3",
        )?;
        let rows = stmt.query_map(
            params![user.as_str(), cutoff.to_rfc3339(), max_importance],
            memory_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count memories per kind for the stats surface.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn memory_counts(&self, user: &UserId) -> Result<BTreeMap<String, u64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT kind, COUNT(*) FROM memories WHERE user_id = ?1 GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (kind, count) = row?;
            out.insert(kind, count.max(0) as u64);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    /// Store (upsert) the embedding for a memory as packed LE f32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn put_embedding(
        &self,
        id: EmbeddingId,
        memory: MemoryId,
        provider: &str,
        vector: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO embeddings (id, memory_id, provider, dimensions, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(memory_id) DO UPDATE SET
                id = excluded.id,
                provider = excluded.provider,
                dimensions = excluded.dimensions,
                vector = excluded.vector,
                created_at = excluded.created_at",
            params![
                id.to_string(),
                memory.to_string(),
                provider,
                vector.dimensions() as i64,
                vector.to_le_bytes(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load the stored embedding for a memory, if any. A blob whose length
    /// is not a multiple of 4 is treated as corrupt and skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn get_embedding(&self, memory: MemoryId) -> Result<Option<Embedding>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT vector FROM embeddings WHERE memory_id = ?1")?;
        let blob: Option<Vec<u8>> = stmt
            .query_row(params![memory.to_string()], |row| row.get(0))
            .optional()?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        match Embedding::from_le_bytes(&blob) {
            Some(vector) => Ok(Some(vector)),
            None => {
                warn!(memory = %memory, bytes = blob.len(), "corrupt embedding blob skipped");
                Ok(None)
            }
        }
    }

    /// The working set for vector search: a user's most recent memories
    /// that have a stored embedding, newest first, capped at `cap`.
    /// Corrupt blobs are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn recent_embedded_memories(
        &self,
        user: &UserId,
        cap: usize,
    ) -> Result<Vec<(Memory, Embedding)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.id, m.user_id, m.content, m.summary, m.kind, m.category,
                    m.entity_ids, m.event_at, m.date_text, m.confidence,
                    m.importance, m.access_count, m.last_accessed,
                    m.is_compressed, m.compressed_from, m.embedding_id,
                    m.source_conversation, m.created_at, e.vector
             FROM memories m
             JOIN embeddings e ON e.memory_id = m.id
             WHERE m.user_id = ?1
             ORDER BY m.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user.as_str(), cap as i64], |row| {
            let memory = memory_from_row(row)?;
            let blob: Vec<u8> = row.get(18)?;
            Ok((memory, blob))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (memory, blob) = row?;
            match Embedding::from_le_bytes(&blob) {
                Some(vector) => out.push((memory, vector)),
                None => {
                    warn!(memory = %memory.id, bytes = blob.len(), "corrupt embedding blob skipped");
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Backup & maintenance
    // ------------------------------------------------------------------

    /// Create a backup of the database to `dest_path` using SQLite's
    /// online-backup API. Safe to call while the database is in use.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures, or
    /// [`EngramError::Io`] if the destination is not writable.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;
        info!(dest = %dest_path.as_ref().display(), "database backup completed");
        Ok(())
    }

    /// Create a numbered backup alongside the database file, rotating old
    /// backups so that at most `config.backup_count` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] or [`EngramError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }
        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }

        for i in (1..max).rev() {
            let src = self.backup_path(i);
            let dst = self.backup_path(i + 1);
            if src.exists() {
                std::fs::rename(&src, &dst)?;
            }
        }

        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }

        self.backup(self.backup_path(1))
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    /// Run an integrity check. `Ok(false)` means corruption was detected.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Reclaim unused space by running `VACUUM`.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Path to the database file (or `:memory:`).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_error(err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        err.to_string().into(),
    )
}

fn decode_uuid(raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(decode_error)
}

fn decode_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_error)
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let aliases: String = row.get(4)?;
    let first_mentioned: String = row.get(7)?;
    let last_mentioned: String = row.get(8)?;
    let confidence: f64 = row.get(9)?;

    Ok(Entity {
        id: EntityId(decode_uuid(&id)?),
        user_id: UserId::new(user_id),
        kind: EntityKind::parse(&kind),
        name: row.get(3)?,
        aliases: aliases
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        description: row.get(5)?,
        mention_count: row.get(6)?,
        first_mentioned: decode_timestamp(&first_mentioned)?,
        last_mentioned: decode_timestamp(&last_mentioned)?,
        confidence: confidence as f32,
        importance: row.get(10)?,
        source_conversation: row.get(11)?,
    })
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let source_id: String = row.get(2)?;
    let target_id: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let first_mentioned: String = row.get(7)?;
    let last_mentioned: String = row.get(8)?;
    let confidence: f64 = row.get(9)?;
    let properties: String = row.get(10)?;

    Ok(Relationship {
        id: RelationshipId(decode_uuid(&id)?),
        user_id: UserId::new(user_id),
        source_id: EntityId(decode_uuid(&source_id)?),
        target_id: EntityId(decode_uuid(&target_id)?),
        kind: RelationKind::parse(&kind),
        directional: row.get(5)?,
        mention_count: row.get(6)?,
        first_mentioned: decode_timestamp(&first_mentioned)?,
        last_mentioned: decode_timestamp(&last_mentioned)?,
        confidence: confidence as f32,
        properties: serde_json::from_str(&properties).map_err(decode_error)?,
    })
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(4)?;
    let entity_ids: String = row.get(6)?;
    let event_at: Option<String> = row.get(7)?;
    let confidence: f64 = row.get(9)?;
    let last_accessed: String = row.get(12)?;
    let compressed_from: String = row.get(14)?;
    let embedding_id: Option<String> = row.get(15)?;
    let created_at: String = row.get(17)?;

    let timestamp = match event_at {
        Some(raw) => Some(decode_timestamp(&raw)?),
        None => None,
    };
    let embedding_id = match embedding_id {
        Some(raw) => Some(EmbeddingId(decode_uuid(&raw)?)),
        None => None,
    };

    Ok(Memory {
        id: MemoryId(decode_uuid(&id)?),
        user_id: UserId::new(user_id),
        content: row.get(2)?,
        summary: row.get(3)?,
        kind: MemoryKind::parse(&kind),
        category: row.get(5)?,
        entity_ids: IdSet::from_delimited(&entity_ids),
        timestamp,
        date_text: row.get(8)?,
        confidence: confidence as f32,
        importance: row.get(10)?,
        access_count: row.get(11)?,
        last_accessed: decode_timestamp(&last_accessed)?,
        is_compressed: row.get(13)?,
        compressed_from: IdSet::from_delimited(&compressed_from),
        embedding_id,
        source_conversation: row.get(16)?,
        created_at: decode_timestamp(&created_at)?,
    })
}

/// Escape `%`, `_` and `\` so user text can't act as LIKE wildcards.
fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
///
/// Converts `Err(QueryReturnedNoRows)` into `Ok(None)`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
