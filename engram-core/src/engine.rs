//! The memory engine facade — everything collaborators call.
//!
//! [`MemoryEngine`] owns the store, extractor, vector index, search
//! engine, and compactor, and exposes the tool-facing surface:
//! `remember`, `recall`, `get_entity`, `add_memory`, `list_entities`,
//! `stats`, `forget`, `compact`, `find_path`.
//!
//! Locking discipline: the SQLite store sits behind one mutex, and no
//! guard is ever held across a provider call — embedding and chat
//! round-trips happen between lock scopes, so engine futures stay `Send`
//! and can run on detached tasks.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use engram_llm::{prompt, ChatClient};

use crate::compact::{CompactionReport, Compactor};
use crate::config::EngramConfig;
use crate::error::{EngramError, Result};
use crate::extract::Extractor;
use crate::model::{Entity, Memory, Relationship};
use crate::search::{SearchEngine, SearchResult};
use crate::store::MemoryStore;
use crate::types::{
    EntityId, EntityKind, MemoryId, MemoryKind, RelationshipId, TimeRange, UserId,
};
use crate::vector::VectorIndex;

// ---------------------------------------------------------------------------
// Surface types
// ---------------------------------------------------------------------------

/// What one `remember` call stored.
#[derive(Debug, Clone, Default)]
pub struct RememberOutcome {
    /// Entities created or updated.
    pub entities: usize,
    /// Relationships created or updated.
    pub relationships: usize,
    /// Memories created.
    pub memories: usize,
    /// Memories that also got an embedding (best-effort).
    pub indexed: usize,
    /// Per-item failures; the batch completed around them.
    pub errors: Vec<String>,
}

/// An entity with its surrounding graph context.
#[derive(Debug, Clone)]
pub struct EntityView {
    /// The entity itself.
    pub entity: Entity,
    /// Every edge touching it.
    pub relationships: Vec<Relationship>,
    /// Memories that reference it, newest first.
    pub memories: Vec<Memory>,
}

/// Aggregate store counts for one user.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Entity counts per kind.
    pub entities_by_kind: BTreeMap<String, u64>,
    /// Memory counts per kind.
    pub memories_by_kind: BTreeMap<String, u64>,
    /// Total relationship count.
    pub relationships: u64,
}

impl EngineStats {
    /// Total entities across kinds.
    #[must_use]
    pub fn total_entities(&self) -> u64 {
        self.entities_by_kind.values().sum()
    }

    /// Total memories across kinds.
    #[must_use]
    pub fn total_memories(&self) -> u64 {
        self.memories_by_kind.values().sum()
    }
}

/// What `forget` should delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetTarget {
    /// An entity row.
    Entity(EntityId),
    /// A memory row (and its embedding).
    Memory(MemoryId),
    /// A relationship edge.
    Relationship(RelationshipId),
}

/// Outcome of a `forget` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetOutcome {
    /// The caller did not pass `confirm = true`; nothing was deleted.
    ConfirmationRequired,
    /// The record was deleted.
    Deleted,
    /// No such record exists.
    NotFound,
}

// ---------------------------------------------------------------------------
// MemoryEngine
// ---------------------------------------------------------------------------

/// The personal knowledge memory engine.
pub struct MemoryEngine {
    store: Mutex<MemoryStore>,
    extractor: Extractor,
    vector: VectorIndex,
    search: SearchEngine,
    compactor: Compactor,
    chat: ChatClient,
    background_timeout: Duration,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("vector", &self.vector)
            .field("chat_available", &self.chat.is_available())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Open (or create) an engine over a database file.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &EngramConfig, chat: ChatClient) -> Result<Self> {
        let store = MemoryStore::open(path, &config.persistence)?;
        Ok(Self::from_store(store, config, chat))
    }

    /// An engine over an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &EngramConfig, chat: ChatClient) -> Result<Self> {
        let store = MemoryStore::open_in_memory(&config.persistence)?;
        Ok(Self::from_store(store, config, chat))
    }

    fn from_store(store: MemoryStore, config: &EngramConfig, chat: ChatClient) -> Self {
        Self {
            store: Mutex::new(store),
            extractor: Extractor::new(config.extraction.clone()),
            vector: VectorIndex::new(&config.embedding),
            search: SearchEngine::new(config.search.clone()),
            compactor: Compactor::new(config.compaction.clone()),
            chat,
            background_timeout: Duration::from_secs(config.extraction.background_timeout_secs),
        }
    }

    // ------------------------------------------------------------------
    // remember
    // ------------------------------------------------------------------

    /// Extract everything from `text` and persist it, then index the new
    /// memories best-effort.
    ///
    /// Embedding failures never fail the remember — indexing is an
    /// enrichment, and a memory without a vector is still searchable by
    /// substring.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Validation`] for empty text. Per-item
    /// persistence failures land in [`RememberOutcome::errors`] instead.
    pub async fn remember(
        &self,
        user: &UserId,
        text: &str,
        conversation_id: Option<&str>,
    ) -> Result<RememberOutcome> {
        if text.trim().is_empty() {
            return Err(EngramError::Validation("text must not be empty".to_string()));
        }
        let now = Utc::now();

        let stored = {
            let store = self.store.lock();
            self.extractor
                .process_and_store(&store, user, text, conversation_id, now)?
        };

        let indexed = self.index_best_effort(user, &stored.memories, now).await;

        debug!(
            user = %user,
            entities = stored.entities.len(),
            memories = stored.memories.len(),
            indexed,
            "remember finished"
        );

        Ok(RememberOutcome {
            entities: stored.entities.len(),
            relationships: stored.relationships.len(),
            memories: stored.memories.len(),
            indexed,
            errors: stored.errors,
        })
    }

    /// Run [`Self::remember`] on a detached task with a bounded timeout.
    ///
    /// Never blocks the conversational turn that triggered it: failures
    /// and timeouts are logged, not propagated. The handle is returned
    /// for callers that want to await completion (tests do); dropping it
    /// detaches the task.
    pub fn remember_background(
        self: &Arc<Self>,
        user: UserId,
        text: String,
        conversation_id: Option<String>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let timeout = engine.background_timeout;
        tokio::spawn(async move {
            let work = engine.remember(&user, &text, conversation_id.as_deref());
            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(outcome)) => debug!(
                    user = %user,
                    memories = outcome.memories,
                    failures = outcome.errors.len(),
                    "background extraction finished"
                ),
                Ok(Err(e)) => warn!(user = %user, error = %e, "background extraction failed"),
                Err(_) => warn!(
                    user = %user,
                    timeout_secs = timeout.as_secs(),
                    "background extraction timed out"
                ),
            }
        })
    }

    async fn index_best_effort(
        &self,
        user: &UserId,
        memory_ids: &[MemoryId],
        now: DateTime<Utc>,
    ) -> usize {
        if !self.vector.is_enabled() {
            return 0;
        }
        let mut indexed = 0;
        for &memory_id in memory_ids {
            let content = {
                let store = self.store.lock();
                match store.get_memory(user, memory_id) {
                    Ok(Some(memory)) => memory.content,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(memory = %memory_id, error = %e, "memory reload failed");
                        continue;
                    }
                }
            };
            match self.vector.generate_embedding(&content).await {
                Ok(vector) => {
                    let store = self.store.lock();
                    match self.vector.store_vector(&store, user, memory_id, vector, now) {
                        Ok(_) => indexed += 1,
                        Err(e) => {
                            warn!(memory = %memory_id, error = %e, "embedding persist failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(memory = %memory_id, error = %e, "embedding generation failed");
                }
            }
        }
        indexed
    }

    // ------------------------------------------------------------------
    // recall & graph queries
    // ------------------------------------------------------------------

    /// Answer a natural-language query against the user's graph.
    ///
    /// Optional hard filters narrow the search; the synthesized answer is
    /// polished through the chat collaborator when one is configured, and
    /// any polish failure just keeps the template answer.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Provider`] if the query embedding fails —
    /// an explicit recall must not silently lose its vector half — or
    /// [`EngramError::Database`] on store failures.
    pub async fn recall(
        &self,
        user: &UserId,
        query: &str,
        entity_kind: Option<EntityKind>,
        time_range: Option<TimeRange>,
        limit: Option<usize>,
    ) -> Result<SearchResult> {
        let now = Utc::now();
        let embedding = if self.vector.is_enabled() {
            Some(self.vector.generate_embedding(query).await?)
        } else {
            None
        };

        let mut result = {
            let store = self.store.lock();
            self.search.answer_with_embedding(
                &store,
                &self.vector,
                user,
                query,
                entity_kind,
                time_range,
                limit,
                embedding.as_ref(),
                now,
            )?
        };

        if self.chat.is_available() {
            if let Some(draft) = result.answer.clone() {
                let (system, user_prompt) = prompt::polish_answer(query, &draft);
                match self.chat.simple_chat(&system, &user_prompt).await {
                    Ok(polished) if !polished.trim().is_empty() => {
                        result.answer = Some(polished.trim().to_string());
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "answer polish failed, keeping template answer"),
                }
            }
        }

        Ok(result)
    }

    /// An entity with its relationships and linked memories.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures. A missing
    /// entity is `Ok(None)`, not an error.
    pub fn get_entity(&self, user: &UserId, name: &str) -> Result<Option<EntityView>> {
        let store = self.store.lock();
        let Some(entity) = store.find_entity_by_name(user, name)? else {
            return Ok(None);
        };
        let relationships = store.relationships_for_entity(user, entity.id)?;
        let memories = store.memories_for_entity(user, entity.id, 50)?;
        Ok(Some(EntityView {
            entity,
            relationships,
            memories,
        }))
    }

    /// BFS over relationship edges between two entities.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::NoPath`] when no chain exists within the
    /// depth limit, or [`EngramError::Database`] on store failures.
    pub fn find_path(
        &self,
        user: &UserId,
        source: EntityId,
        target: EntityId,
        max_depth: Option<usize>,
    ) -> Result<Vec<Relationship>> {
        let store = self.store.lock();
        self.search.find_path(&store, user, source, target, max_depth)
    }

    // ------------------------------------------------------------------
    // direct authoring
    // ------------------------------------------------------------------

    /// Store a memory the user wrote directly, bypassing extraction.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Validation`] for empty content, or
    /// [`EngramError::Database`] on store failures.
    pub async fn add_memory(
        &self,
        user: &UserId,
        content: &str,
        kind: Option<MemoryKind>,
        category: Option<&str>,
        importance: Option<u8>,
    ) -> Result<MemoryId> {
        if content.trim().is_empty() {
            return Err(EngramError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        let now = Utc::now();

        // Direct authoring carries full confidence.
        let mut memory = Memory::new(
            user.clone(),
            content.trim(),
            kind.unwrap_or(MemoryKind::Fact),
            importance.unwrap_or(5),
            1.0,
            now,
        );
        if let Some(category) = category {
            memory = memory.with_category(category);
        }
        let memory_id = memory.id;

        {
            let store = self.store.lock();
            store.insert_memory(&memory)?;
        }
        self.index_best_effort(user, &[memory_id], now).await;
        Ok(memory_id)
    }

    /// List a user's entities, optionally filtered by kind.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures.
    pub fn list_entities(
        &self,
        user: &UserId,
        kind: Option<EntityKind>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let store = self.store.lock();
        store.list_entities(user, kind, limit)
    }

    /// Aggregate counts by kind.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures.
    pub fn stats(&self, user: &UserId) -> Result<EngineStats> {
        let store = self.store.lock();
        Ok(EngineStats {
            entities_by_kind: store.entity_counts(user)?,
            memories_by_kind: store.memory_counts(user)?,
            relationships: store.relationship_count(user)?,
        })
    }

    // ------------------------------------------------------------------
    // forget
    // ------------------------------------------------------------------

    /// Delete one record — but only when the caller explicitly confirms.
    ///
    /// Without `confirm = true` this returns
    /// [`ForgetOutcome::ConfirmationRequired`] and touches nothing.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures.
    pub fn forget(
        &self,
        user: &UserId,
        target: ForgetTarget,
        confirm: bool,
    ) -> Result<ForgetOutcome> {
        if !confirm {
            return Ok(ForgetOutcome::ConfirmationRequired);
        }

        let store = self.store.lock();
        let deleted = match target {
            ForgetTarget::Entity(id) => store.delete_entity(user, id)?,
            ForgetTarget::Memory(id) => store.delete_memory(user, id)?,
            ForgetTarget::Relationship(id) => store.delete_relationship(user, id)?,
        };

        if deleted {
            info!(user = %user, ?target, "record forgotten");
            Ok(ForgetOutcome::Deleted)
        } else {
            Ok(ForgetOutcome::NotFound)
        }
    }

    // ------------------------------------------------------------------
    // compaction & maintenance
    // ------------------------------------------------------------------

    /// Run one compaction pass for a user.
    ///
    /// Meant for a single periodic ticker; callers serialize invocations
    /// (one ticker, not many). Summarization happens between lock scopes,
    /// so extraction and recall stay responsive during a run.
    pub async fn compact(&self, user: &UserId) -> CompactionReport {
        let now = Utc::now();
        let mut report = CompactionReport::default();

        let planned = {
            let store = self.store.lock();
            self.compactor.plan(&store, user, now)
        };
        match planned {
            Ok(groups) => {
                let chat = self.chat.is_available().then_some(&self.chat);
                for group in groups {
                    let summary = self.compactor.summarize_group(chat, &group).await;
                    let store = self.store.lock();
                    match self.compactor.apply(&store, user, &group, &summary, now) {
                        Ok(count) => report.compressed += count,
                        Err(e) => {
                            warn!(category = %group.category, error = %e, "group compression failed");
                            report
                                .errors
                                .push(format!("category '{}': {e}", group.category));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(user = %user, error = %e, "compaction planning failed");
                report.errors.push(format!("scan: {e}"));
            }
        }

        {
            let store = self.store.lock();
            self.compactor.delete_pass(&store, user, now, &mut report);
        }

        info!(
            user = %user,
            compressed = report.compressed,
            deleted = report.deleted,
            failures = report.errors.len(),
            "compaction run finished"
        );
        report
    }

    /// Online backup of the underlying database.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] or [`EngramError::Io`] on failure.
    pub fn backup<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let store = self.store.lock();
        store.backup(dest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MemoryEngine {
        MemoryEngine::open_in_memory(&EngramConfig::default(), ChatClient::none()).expect("open")
    }

    fn user() -> UserId {
        UserId::new("test_user")
    }

    #[tokio::test]
    async fn remember_then_recall_round_trip() {
        let engine = engine();

        let outcome = engine
            .remember(
                &user(),
                "I love hiking in Yosemite. The mountains are beautiful.",
                Some("conv-1"),
            )
            .await
            .expect("remember");
        assert!(outcome.memories >= 1);
        assert!(outcome.errors.is_empty(), "errors: {:?}", outcome.errors);
        assert!(outcome.indexed >= 1, "local provider should index");

        let result = engine
            .recall(&user(), "hiking", None, None, None)
            .await
            .expect("recall");
        assert!(
            result
                .memories
                .iter()
                .any(|m| m.memory.content.contains("hiking")),
            "expected a hiking memory, got {:?}",
            result.memories
        );
        assert!(result.answer.is_some());
    }

    #[tokio::test]
    async fn remember_rejects_empty_text() {
        let engine = engine();
        let err = engine
            .remember(&user(), "   ", None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngramError::Validation(_)));
    }

    #[tokio::test]
    async fn remember_works_with_vector_disabled() {
        let config = EngramConfig {
            embedding: crate::config::EmbeddingConfig {
                enabled: false,
                ..crate::config::EmbeddingConfig::default()
            },
            ..EngramConfig::default()
        };
        let engine = MemoryEngine::open_in_memory(&config, ChatClient::none()).expect("open");

        let outcome = engine
            .remember(&user(), "I love hiking in Yosemite.", None)
            .await
            .expect("remember");
        assert!(outcome.memories >= 1);
        assert_eq!(outcome.indexed, 0);

        // Substring recall still works without vectors.
        let result = engine
            .recall(&user(), "hiking", None, None, None)
            .await
            .expect("recall");
        assert!(!result.memories.is_empty());
    }

    #[tokio::test]
    async fn background_remember_is_observable_via_store() {
        let engine = Arc::new(engine());

        let handle = engine.remember_background(
            user(),
            "I met Sarah at Blue Bottle Cafe yesterday.".to_string(),
            None,
        );
        handle.await.expect("join");

        let view = engine
            .get_entity(&user(), "Sarah")
            .expect("get")
            .expect("Some");
        assert_eq!(view.entity.name, "Sarah");
        assert!(!view.memories.is_empty());
    }

    #[tokio::test]
    async fn add_memory_validates_and_indexes() {
        let engine = engine();

        let err = engine
            .add_memory(&user(), "  ", None, None, None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, EngramError::Validation(_)));

        let id = engine
            .add_memory(
                &user(),
                "Prefer window seats on trains",
                Some(MemoryKind::Preference),
                Some("travel"),
                Some(12),
            )
            .await
            .expect("add");

        let result = engine
            .recall(&user(), "window seats", None, None, None)
            .await
            .expect("recall");
        let stored = result
            .memories
            .iter()
            .find(|m| m.memory.id == id)
            .expect("stored memory");
        assert_eq!(stored.memory.importance, 10, "importance clamps to 10");
        assert_eq!(stored.memory.category, "travel");
    }

    #[tokio::test]
    async fn forget_requires_confirmation() {
        let engine = engine();
        let id = engine
            .add_memory(&user(), "secret plan", None, None, None)
            .await
            .expect("add");

        // No confirm flag: nothing happens.
        let outcome = engine
            .forget(&user(), ForgetTarget::Memory(id), false)
            .expect("forget");
        assert_eq!(outcome, ForgetOutcome::ConfirmationRequired);
        assert!(!engine
            .recall(&user(), "secret plan", None, None, None)
            .await
            .expect("recall")
            .memories
            .is_empty());

        // Confirmed: deleted and reported as such.
        let outcome = engine
            .forget(&user(), ForgetTarget::Memory(id), true)
            .expect("forget");
        assert_eq!(outcome, ForgetOutcome::Deleted);

        let outcome = engine
            .forget(&user(), ForgetTarget::Memory(id), true)
            .expect("forget");
        assert_eq!(outcome, ForgetOutcome::NotFound);
    }

    #[tokio::test]
    async fn stats_aggregate_by_kind() {
        let engine = engine();
        engine
            .remember(
                &user(),
                "I met Sarah at Blue Bottle Cafe yesterday. She works at Google.",
                None,
            )
            .await
            .expect("remember");

        let stats = engine.stats(&user()).expect("stats");
        assert!(stats.total_entities() >= 3, "stats: {stats:?}");
        assert!(stats.total_memories() >= 1);
        assert!(stats.entities_by_kind.contains_key("person"));
    }

    #[tokio::test]
    async fn engine_compact_folds_old_memories() {
        let engine = engine();

        // Author three memories, then age them below the store's radar.
        let now = Utc::now();
        for i in 0..3 {
            let id = engine
                .add_memory(&user(), &format!("stale note {i}"), None, None, Some(2))
                .await
                .expect("add");
            let store = engine.store.lock();
            let mut memory = store
                .get_memory(&user(), id)
                .expect("get")
                .expect("Some");
            memory.last_accessed = now - chrono::Duration::days(120);
            memory.created_at = now - chrono::Duration::days(150);
            store.update_memory(&memory).expect("update");
        }

        let report = engine.compact(&user()).await;
        assert_eq!(report.compressed, 3);
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn recall_on_empty_store_says_no_information() {
        let engine = engine();
        let result = engine
            .recall(&user(), "Who is Sarah?", None, None, None)
            .await
            .expect("recall");
        assert!(result.is_empty());
        let answer = result.answer.expect("answer");
        assert!(answer.contains("don't have any information"), "answer: {answer}");
    }
}
