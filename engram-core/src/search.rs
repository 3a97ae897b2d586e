//! Search engine — structured filtering blended with vector ranking,
//! template-based question answering, and graph traversal.
//!
//! Structured search resolves explicit entity names exactly, runs
//! substring search over names/aliases and memory content, and applies
//! entity-kind and time-range constraints as hard filters. When the
//! vector subsystem is enabled, cosine-ranked memories are merged into
//! the result set. Question answering classifies the interrogative and
//! fills an answer template from whatever the search surfaced.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{EngramError, Result};
use crate::model::{Entity, Memory, Relationship};
use crate::store::MemoryStore;
use crate::types::{EntityId, EntityKind, RelationKind, TimeRange, UserId};
use crate::vector::VectorIndex;

// ---------------------------------------------------------------------------
// Query & result types
// ---------------------------------------------------------------------------

/// A structured search request.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Free-text query for substring and vector search.
    pub text: Option<String>,
    /// Explicit entity names, resolved exactly (case-insensitive).
    pub entities: Vec<String>,
    /// Hard filter on entity kind.
    pub entity_kind: Option<EntityKind>,
    /// Hard filter on memory event time.
    pub time_range: Option<TimeRange>,
    /// Result cap; the configured default applies when absent.
    pub limit: Option<usize>,
}

/// An entity with its computed relevance.
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    /// The entity.
    pub entity: Entity,
    /// Relevance in [0, 1].
    pub relevance: f32,
}

/// A memory with its computed relevance.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// The memory.
    pub memory: Memory,
    /// Relevance in [0, 1].
    pub relevance: f32,
}

/// A relationship with its computed relevance.
#[derive(Debug, Clone)]
pub struct ScoredRelationship {
    /// The relationship.
    pub relationship: Relationship,
    /// Relevance in [0, 1], derived from the entity that surfaced it.
    pub relevance: f32,
}

/// Everything one search returned.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// Matching entities, ranked.
    pub entities: Vec<ScoredEntity>,
    /// Matching memories, ranked.
    pub memories: Vec<ScoredMemory>,
    /// Relationships of the matching entities.
    pub relationships: Vec<ScoredRelationship>,
    /// Mean relevance over returned items; 0.0 when nothing matched.
    pub confidence: f32,
    /// Synthesized answer, present for question queries.
    pub answer: Option<String>,
}

impl SearchResult {
    /// Whether the search surfaced nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.memories.is_empty() && self.relationships.is_empty()
    }
}

/// Interrogative classification for answer synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionClass {
    /// "who …"
    Who,
    /// "where …"
    Where,
    /// "when …"
    When,
    /// "what …"
    What,
    /// Anything else.
    General,
}

// ---------------------------------------------------------------------------
// SearchEngine
// ---------------------------------------------------------------------------

/// Composes persistence queries and vector results into ranked answers.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    config: SearchConfig,
}

impl SearchEngine {
    /// Create a search engine with the given configuration.
    #[must_use]
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Execute a structured search.
    ///
    /// Explicit entity names resolve at relevance 1.0. A text query adds
    /// substring matches over entities and memories, plus vector-ranked
    /// memories when the subsystem is enabled. Entity-kind and time-range
    /// constraints are hard filters, not soft scores. Relationships of
    /// every surfaced entity are appended at 0.9 × the entity's relevance.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures. A provider
    /// failure during vector search surfaces to the caller — the result
    /// would otherwise be silently incomplete.
    pub async fn execute(
        &self,
        store: &MemoryStore,
        vector: &VectorIndex,
        user: &UserId,
        query: &SearchQuery,
        now: DateTime<Utc>,
    ) -> Result<SearchResult> {
        let embedding = match query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) if vector.is_enabled() => Some(vector.generate_embedding(text).await?),
            _ => None,
        };
        self.execute_with_embedding(store, vector, user, query, embedding.as_ref(), now)
    }

    /// Synchronous core of [`Self::execute`]: the caller supplies the
    /// query embedding (or `None` to skip vector blending), so no store
    /// lock ever spans a provider call.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Database`] on store failures.
    pub fn execute_with_embedding(
        &self,
        store: &MemoryStore,
        vector: &VectorIndex,
        user: &UserId,
        query: &SearchQuery,
        query_embedding: Option<&crate::types::Embedding>,
        now: DateTime<Utc>,
    ) -> Result<SearchResult> {
        let limit = query.limit.unwrap_or(self.config.default_limit);
        let mut entities: Vec<ScoredEntity> = Vec::new();
        let mut memories: Vec<ScoredMemory> = Vec::new();

        // Explicit names: exact case-insensitive resolution, relevance 1.0.
        for name in &query.entities {
            match store.find_entity_by_name(user, name)? {
                Some(entity) => entities.push(ScoredEntity {
                    entity,
                    relevance: 1.0,
                }),
                None => debug!(name = %name, "explicit entity name did not resolve"),
            }
        }

        // Free-text query: substring search over both record kinds. A
        // multi-word query that matches nothing verbatim falls back to
        // per-keyword search so question phrasing still finds records.
        if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let mut needles = vec![text.to_string()];
            if store.search_memories(user, text, 1)?.is_empty()
                && store.search_entities(user, text, 1)?.is_empty()
            {
                needles = keywords(text);
            }

            for needle in &needles {
                for entity in store.search_entities(user, needle, limit)? {
                    if entities.iter().any(|e| e.entity.id == entity.id) {
                        continue;
                    }
                    let relevance = self.score_entity(&entity, now);
                    entities.push(ScoredEntity { entity, relevance });
                }
                for memory in store.search_memories(user, needle, limit)? {
                    if memories.iter().any(|m| m.memory.id == memory.id) {
                        continue;
                    }
                    let relevance = self.score_memory(&memory, now);
                    memories.push(ScoredMemory { memory, relevance });
                }
            }

            // Vector blend: similarity acts as the relevance of hits the
            // substring pass missed.
            if let Some(embedding) = query_embedding {
                for hit in vector.rank(store, user, embedding, limit)? {
                    if memories.iter().any(|m| m.memory.id == hit.memory.id) {
                        continue;
                    }
                    memories.push(ScoredMemory {
                        memory: hit.memory,
                        relevance: hit.similarity.clamp(0.0, 1.0),
                    });
                }
            }
        }

        // A bare time-range query still surfaces memories from the window.
        if let Some(range) = &query.time_range {
            for memory in store.memories_in_range(user, range, limit)? {
                if memories.iter().any(|m| m.memory.id == memory.id) {
                    continue;
                }
                let relevance = self.score_memory(&memory, now);
                memories.push(ScoredMemory { memory, relevance });
            }
        }

        // Hard filters.
        if let Some(kind) = query.entity_kind {
            entities.retain(|e| e.entity.kind == kind);
        }
        if let Some(range) = &query.time_range {
            memories.retain(|m| m.memory.timestamp.is_some_and(|ts| range.contains(ts)));
        }

        // Relationships ride along with the entities that surfaced.
        let mut relationships: Vec<ScoredRelationship> = Vec::new();
        for scored in &entities {
            for relationship in store.relationships_for_entity(user, scored.entity.id)? {
                if relationships
                    .iter()
                    .any(|r| r.relationship.id == relationship.id)
                {
                    continue;
                }
                relationships.push(ScoredRelationship {
                    relationship,
                    relevance: (scored.relevance * 0.9).clamp(0.0, 1.0),
                });
            }
        }

        entities.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        memories.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entities.truncate(limit);
        memories.truncate(limit);

        // Returned memories count as recalled.
        for scored in &mut memories {
            scored.memory.record_access(now);
            if let Err(e) = store.update_memory(&scored.memory) {
                warn!(memory = %scored.memory.id, error = %e, "access bookkeeping failed");
            }
        }

        let confidence = result_confidence(&entities, &memories);

        Ok(SearchResult {
            entities,
            memories,
            relationships,
            confidence,
            answer: None,
        })
    }

    /// Answer a natural-language question.
    ///
    /// The question is classified by interrogative, any time phrase is
    /// mapped to a concrete window, and capitalized non-sentence-initial
    /// tokens become candidate entity names. The answer is synthesized
    /// from templates per classification; finding nothing yields a fixed
    /// "no information" answer rather than an error.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::execute`].
    pub async fn query_answer(
        &self,
        store: &MemoryStore,
        vector: &VectorIndex,
        user: &UserId,
        question: &str,
        now: DateTime<Utc>,
    ) -> Result<SearchResult> {
        let embedding = if vector.is_enabled() {
            Some(vector.generate_embedding(question).await?)
        } else {
            None
        };
        self.answer_with_embedding(
            store,
            vector,
            user,
            question,
            None,
            None,
            None,
            embedding.as_ref(),
            now,
        )
    }

    /// Synchronous core of [`Self::query_answer`], with the extra hard
    /// filters the `recall` surface exposes (entity kind, explicit time
    /// range, result limit). An explicit time range wins over one parsed
    /// from the question.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::execute_with_embedding`].
    #[allow(clippy::too_many_arguments)]
    pub fn answer_with_embedding(
        &self,
        store: &MemoryStore,
        vector: &VectorIndex,
        user: &UserId,
        question: &str,
        entity_kind: Option<EntityKind>,
        time_range: Option<TimeRange>,
        limit: Option<usize>,
        query_embedding: Option<&crate::types::Embedding>,
        now: DateTime<Utc>,
    ) -> Result<SearchResult> {
        let class = classify_question(question);
        let time_range = time_range.or_else(|| parse_time_reference(question, now));
        let candidates = capitalized_candidates(question);

        let query = SearchQuery {
            text: Some(question.to_string()),
            entities: candidates,
            entity_kind,
            time_range,
            limit,
        };

        let mut result =
            self.execute_with_embedding(store, vector, user, &query, query_embedding, now)?;
        result.answer = Some(synthesize_answer(store, user, class, &result));
        Ok(result)
    }

    /// Breadth-first search for a relationship chain between two entities.
    ///
    /// Edges are traversed undirected; the first-found shortest path wins
    /// ties by discovery order.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::NoPath`] when no chain of at most
    /// `max_depth` edges connects the endpoints — explicitly not an
    /// empty-but-successful result — or [`EngramError::Database`] on
    /// store failures.
    pub fn find_path(
        &self,
        store: &MemoryStore,
        user: &UserId,
        source: EntityId,
        target: EntityId,
        max_depth: Option<usize>,
    ) -> Result<Vec<Relationship>> {
        let max_depth = max_depth.unwrap_or(self.config.max_path_depth);
        if source == target {
            return Ok(Vec::new());
        }

        let edges = store.all_relationships(user)?;
        let mut adjacency: HashMap<EntityId, Vec<&Relationship>> = HashMap::new();
        for edge in &edges {
            adjacency.entry(edge.source_id).or_default().push(edge);
            adjacency.entry(edge.target_id).or_default().push(edge);
        }

        let mut visited: HashSet<EntityId> = HashSet::from([source]);
        let mut queue: VecDeque<(EntityId, Vec<&Relationship>)> = VecDeque::new();
        queue.push_back((source, Vec::new()));

        while let Some((current, path)) = queue.pop_front() {
            if path.len() >= max_depth {
                continue;
            }
            for edge in adjacency.get(&current).into_iter().flatten() {
                let Some(next) = edge.other_end(current) else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(edge);
                if next == target {
                    return Ok(next_path.into_iter().cloned().collect());
                }
                queue.push_back((next, next_path));
            }
        }

        Err(EngramError::NoPath {
            from: source,
            target,
            max_depth,
        })
    }

    // ------------------------------------------------------------------
    // Relevance scoring
    // ------------------------------------------------------------------

    /// Entity relevance: 0.5 base, +0.1 for >5 mentions, +0.1 more for
    /// >10, +0.1 when mentioned within the recent window, plus
    /// importance/100, clamped to 1.0.
    fn score_entity(&self, entity: &Entity, now: DateTime<Utc>) -> f32 {
        let mut score = 0.5;
        if entity.mention_count > 5 {
            score += 0.1;
        }
        if entity.mention_count > 10 {
            score += 0.1;
        }
        if now - entity.last_mentioned < Duration::days(self.config.recent_window_days) {
            score += 0.1;
        }
        score += f32::from(entity.importance) / 100.0;
        score.min(1.0)
    }

    /// Memory relevance: 0.5 base plus importance/20, +0.1 for >5
    /// accesses, +0.1 when accessed within the recent window, clamped.
    fn score_memory(&self, memory: &Memory, now: DateTime<Utc>) -> f32 {
        let mut score = 0.5 + f32::from(memory.importance) / 20.0;
        if memory.access_count > 5 {
            score += 0.1;
        }
        if now - memory.last_accessed < Duration::days(self.config.recent_window_days) {
            score += 0.1;
        }
        score.min(1.0)
    }
}

/// Words too common to be useful as standalone search needles.
const QUERY_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "about", "at", "did", "do", "does", "for", "from",
    "have", "her", "him", "his", "how", "i", "in", "is", "it", "like", "me",
    "my", "of", "on", "or", "she", "the", "them", "they", "this", "that", "to",
    "was", "we", "were", "what", "when", "where", "which", "who", "why", "with",
    "you",
];

fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !QUERY_STOPWORDS.contains(&t.as_str()))
        .fold(Vec::new(), |mut acc, t| {
            if !acc.contains(&t) {
                acc.push(t);
            }
            acc
        })
}

fn result_confidence(entities: &[ScoredEntity], memories: &[ScoredMemory]) -> f32 {
    let sum: f32 = entities.iter().map(|e| e.relevance).sum::<f32>()
        + memories.iter().map(|m| m.relevance).sum::<f32>();
    let count = entities.len() + memories.len();
    if count == 0 {
        0.0
    } else {
        (sum / count as f32).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Question analysis
// ---------------------------------------------------------------------------

/// Classify a question by the interrogative it contains.
#[must_use]
pub fn classify_question(question: &str) -> QuestionClass {
    let lower = question.to_lowercase();
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|t| t == word)
    };
    if has_word("who") {
        QuestionClass::Who
    } else if has_word("where") {
        QuestionClass::Where
    } else if has_word("when") {
        QuestionClass::When
    } else if has_word("what") {
        QuestionClass::What
    } else {
        QuestionClass::General
    }
}

/// Map a relative time phrase in `text` to a concrete `[start, end)`
/// window anchored at `now`. Returns `None` when no phrase is present.
#[must_use]
pub fn parse_time_reference(text: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    TimeRange::from_phrase(text, now)
}

/// Capitalized tokens that are not sentence-initial become candidate
/// entity names ("Where does Sarah work?" → ["Sarah"]).
#[must_use]
pub fn capitalized_candidates(question: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut sentence_start = true;
    for raw in question.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() {
            continue;
        }
        let capitalized = token.chars().next().is_some_and(char::is_uppercase)
            && token.chars().skip(1).any(char::is_lowercase);
        if capitalized && !sentence_start && !out.iter().any(|o| o == token) {
            out.push(token.to_string());
        }
        sentence_start = raw.ends_with(['.', '!', '?']);
    }
    out
}

// ---------------------------------------------------------------------------
// Answer synthesis
// ---------------------------------------------------------------------------

const NO_INFORMATION: &str = "I don't have any information about that yet.";

fn synthesize_answer(
    store: &MemoryStore,
    user: &UserId,
    class: QuestionClass,
    result: &SearchResult,
) -> String {
    if result.entities.is_empty() && result.memories.is_empty() {
        return NO_INFORMATION.to_string();
    }

    match class {
        QuestionClass::Who => answer_who(result),
        QuestionClass::Where => answer_where(store, user, result),
        QuestionClass::When => answer_when(result),
        QuestionClass::What => answer_what(result),
        QuestionClass::General => answer_general(result),
    }
}

fn answer_who(result: &SearchResult) -> String {
    let people: Vec<&str> = result
        .entities
        .iter()
        .filter(|e| e.entity.kind == EntityKind::Person)
        .map(|e| e.entity.name.as_str())
        .collect();
    if !people.is_empty() {
        return format!("You mentioned {}.", people.join(", "));
    }

    // Fall back to event-flavored memories.
    if let Some(memory) = result.memories.iter().find(|m| {
        let lower = m.memory.content.to_lowercase();
        lower.contains("met") || lower.contains("saw")
    }) {
        return memory.memory.content.clone();
    }

    answer_general(result)
}

fn answer_where(store: &MemoryStore, user: &UserId, result: &SearchResult) -> String {
    if let Some(place) = result
        .entities
        .iter()
        .find(|e| e.entity.kind == EntityKind::Place)
    {
        return format!("Possibly at {}.", place.entity.name);
    }

    // A livesIn/locatedIn/worksAt edge can answer a where-question.
    if let Some(edge) = result.relationships.iter().find(|r| {
        matches!(
            r.relationship.kind,
            RelationKind::LivesIn | RelationKind::LocatedIn | RelationKind::WorksAt
        )
    }) {
        let rel = &edge.relationship;
        let source = entity_name(store, user, rel.source_id);
        let target = entity_name(store, user, rel.target_id);
        let verb = match rel.kind {
            RelationKind::LivesIn => "lives in",
            RelationKind::WorksAt => "works at",
            _ => "is located in",
        };
        return format!("{source} {verb} {target}.");
    }

    answer_general(result)
}

fn answer_when(result: &SearchResult) -> String {
    if let Some(time) = result
        .entities
        .iter()
        .find(|e| e.entity.kind == EntityKind::TimeReference)
    {
        return format!("Around {}.", time.entity.name);
    }

    for memory in &result.memories {
        if let Some(ts) = memory.memory.timestamp {
            return format!("On {}.", ts.format("%Y-%m-%d"));
        }
        if let Some(date_text) = &memory.memory.date_text {
            return format!("It was {date_text}.");
        }
    }

    answer_general(result)
}

fn answer_what(result: &SearchResult) -> String {
    if let Some(memory) = result.memories.first() {
        return memory.memory.content.clone();
    }
    if let Some(entity) = result.entities.first() {
        if !entity.entity.description.is_empty() {
            return entity.entity.description.clone();
        }
        return format!("You've mentioned {}.", entity.entity.name);
    }
    NO_INFORMATION.to_string()
}

fn answer_general(result: &SearchResult) -> String {
    let mut parts: Vec<String> = Vec::new();
    let names: Vec<&str> = result
        .entities
        .iter()
        .take(3)
        .map(|e| e.entity.name.as_str())
        .collect();
    if !names.is_empty() {
        parts.push(format!("Here's what I know about {}.", names.join(", ")));
    }
    if let Some(memory) = result.memories.first() {
        parts.push(memory.memory.content.clone());
    }
    if parts.is_empty() {
        NO_INFORMATION.to_string()
    } else {
        parts.join(" ")
    }
}

fn entity_name(store: &MemoryStore, user: &UserId, id: EntityId) -> String {
    store
        .get_entity(user, id)
        .ok()
        .flatten()
        .map_or_else(|| "someone".to_string(), |e| e.name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, PersistenceConfig};
    use crate::types::MemoryKind;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(&PersistenceConfig::default()).expect("open")
    }

    fn user() -> UserId {
        UserId::new("test_user")
    }

    fn engine() -> SearchEngine {
        SearchEngine::new(SearchConfig::default())
    }

    fn no_vector() -> VectorIndex {
        VectorIndex::new(&EmbeddingConfig {
            enabled: false,
            ..EmbeddingConfig::default()
        })
    }

    fn insert_entity(store: &MemoryStore, name: &str, kind: EntityKind) -> Entity {
        let entity = Entity::new(user(), kind, name, 0.8, Utc::now());
        store.insert_entity(&entity).expect("insert");
        entity
    }

    fn insert_memory(store: &MemoryStore, content: &str, kind: MemoryKind) -> Memory {
        let memory = Memory::new(user(), content, kind, 5, 0.8, Utc::now());
        store.insert_memory(&memory).expect("insert");
        memory
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    #[test]
    fn entity_scoring_follows_formula() {
        let engine = engine();
        let now = Utc::now();
        let mut entity = Entity::new(user(), EntityKind::Person, "Sarah", 0.8, now);

        // Fresh entity: 0.5 base + 0.1 recent + 5/100 importance.
        let score = engine.score_entity(&entity, now);
        assert!((score - 0.65).abs() < 1e-6, "got {score}");

        entity.mention_count = 6;
        assert!((engine.score_entity(&entity, now) - 0.75).abs() < 1e-6);

        entity.mention_count = 11;
        assert!((engine.score_entity(&entity, now) - 0.85).abs() < 1e-6);

        entity.importance = 10;
        entity.mention_count = 50;
        assert!((engine.score_entity(&entity, now) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn entity_score_is_clamped_at_one() {
        let engine = engine();
        let now = Utc::now();
        let mut entity = Entity::new(user(), EntityKind::Person, "Sarah", 0.8, now);
        entity.mention_count = 100;
        entity.importance = 10;
        // 0.5 + 0.1 + 0.1 + 0.1 + 0.1 = 0.9; add more via importance caps at 1.0.
        assert!(engine.score_entity(&entity, now) <= 1.0);
    }

    #[test]
    fn memory_scoring_follows_formula() {
        let engine = engine();
        let now = Utc::now();
        let mut memory = Memory::new(user(), "x", MemoryKind::Fact, 5, 0.8, now);

        // 0.5 + 5/20 + 0.1 recent-access.
        let score = engine.score_memory(&memory, now);
        assert!((score - 0.85).abs() < 1e-6, "got {score}");

        memory.access_count = 6;
        assert!((engine.score_memory(&memory, now) - 0.95).abs() < 1e-6);

        memory.set_importance(10);
        assert!((engine.score_memory(&memory, now) - 1.0).abs() < 1e-6);
    }

    // ------------------------------------------------------------------
    // Question analysis
    // ------------------------------------------------------------------

    #[test]
    fn classification_maps_interrogatives() {
        assert_eq!(classify_question("Who did I meet?"), QuestionClass::Who);
        assert_eq!(classify_question("Where does Sarah work?"), QuestionClass::Where);
        assert_eq!(classify_question("When did we meet?"), QuestionClass::When);
        assert_eq!(classify_question("What do I like?"), QuestionClass::What);
        assert_eq!(classify_question("Tell me about Sarah"), QuestionClass::General);
    }

    #[test]
    fn time_reference_windows_are_half_open() {
        let now = Utc::now();
        let range = parse_time_reference("who did I meet yesterday?", now).expect("range");
        assert_eq!(range.end - range.start, Duration::days(1));
        assert!(range.end <= now);
        assert!(!range.contains(range.end));

        let week = parse_time_reference("what happened last week", now).expect("range");
        assert_eq!(week.end - week.start, Duration::days(7));

        assert!(parse_time_reference("what do I like?", now).is_none());
    }

    #[test]
    fn capitalized_candidates_skip_sentence_starts() {
        let candidates = capitalized_candidates("Where does Sarah work?");
        assert_eq!(candidates, vec!["Sarah".to_string()]);

        // "Did" opens the sentence; "Marco" and "Sarah" do not.
        let candidates = capitalized_candidates("Did Marco meet Sarah? Maybe.");
        assert_eq!(candidates, vec!["Marco".to_string(), "Sarah".to_string()]);

        // Acronyms are not treated as names.
        let candidates = capitalized_candidates("Is the NASA launch today?");
        assert!(candidates.is_empty());
    }

    // ------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn explicit_names_resolve_at_full_relevance() {
        let store = store();
        insert_entity(&store, "Sarah", EntityKind::Person);

        let result = engine()
            .execute(
                &store,
                &no_vector(),
                &user(),
                &SearchQuery {
                    entities: vec!["sarah".to_string()],
                    ..SearchQuery::default()
                },
                Utc::now(),
            )
            .await
            .expect("execute");

        assert_eq!(result.entities.len(), 1);
        assert!((result.entities[0].relevance - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn text_query_matches_substrings_and_bumps_access() {
        let store = store();
        let memory = insert_memory(&store, "I love hiking in Yosemite", MemoryKind::Preference);
        insert_memory(&store, "Bought new shoes", MemoryKind::Fact);

        let result = engine()
            .execute(
                &store,
                &no_vector(),
                &user(),
                &SearchQuery {
                    text: Some("hiking".to_string()),
                    ..SearchQuery::default()
                },
                Utc::now(),
            )
            .await
            .expect("execute");

        assert_eq!(result.memories.len(), 1);
        assert!(result.memories[0].memory.content.contains("hiking"));

        // The recall itself was recorded.
        let reloaded = store
            .get_memory(&user(), memory.id)
            .expect("get")
            .expect("Some");
        assert_eq!(reloaded.access_count, 1);
    }

    #[tokio::test]
    async fn entity_kind_is_a_hard_filter() {
        let store = store();
        insert_entity(&store, "Yosemite Park", EntityKind::Place);
        insert_entity(&store, "Yosemite Climbing Club", EntityKind::Organization);

        let result = engine()
            .execute(
                &store,
                &no_vector(),
                &user(),
                &SearchQuery {
                    text: Some("Yosemite".to_string()),
                    entity_kind: Some(EntityKind::Place),
                    ..SearchQuery::default()
                },
                Utc::now(),
            )
            .await
            .expect("execute");

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity.kind, EntityKind::Place);
    }

    #[tokio::test]
    async fn time_range_is_a_hard_filter() {
        let store = store();
        let now = Utc::now();

        let mut recent = Memory::new(user(), "met Sarah", MemoryKind::Event, 5, 0.8, now);
        recent.timestamp = Some(now - Duration::hours(5));
        store.insert_memory(&recent).expect("insert");

        let mut old = Memory::new(user(), "met Marco", MemoryKind::Event, 5, 0.8, now);
        old.timestamp = Some(now - Duration::days(40));
        store.insert_memory(&old).expect("insert");

        let mut undated = Memory::new(user(), "met Ana", MemoryKind::Event, 5, 0.8, now);
        undated.timestamp = None;
        store.insert_memory(&undated).expect("insert");

        let result = engine()
            .execute(
                &store,
                &no_vector(),
                &user(),
                &SearchQuery {
                    text: Some("met".to_string()),
                    time_range: Some(TimeRange {
                        start: now - Duration::days(7),
                        end: now,
                    }),
                    ..SearchQuery::default()
                },
                Utc::now(),
            )
            .await
            .expect("execute");

        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].memory.id, recent.id);
    }

    #[tokio::test]
    async fn relationships_ride_along_at_discounted_relevance() {
        let store = store();
        let sarah = insert_entity(&store, "Sarah", EntityKind::Person);
        let google = insert_entity(&store, "Google", EntityKind::Organization);
        let rel = Relationship::new(
            user(),
            sarah.id,
            google.id,
            RelationKind::WorksAt,
            0.8,
            Utc::now(),
        );
        store.insert_relationship(&rel).expect("insert");

        let result = engine()
            .execute(
                &store,
                &no_vector(),
                &user(),
                &SearchQuery {
                    entities: vec!["Sarah".to_string()],
                    ..SearchQuery::default()
                },
                Utc::now(),
            )
            .await
            .expect("execute");

        assert_eq!(result.relationships.len(), 1);
        assert!((result.relationships[0].relevance - 0.9).abs() < 1e-6);
    }

    // ------------------------------------------------------------------
    // Question answering
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn empty_store_yields_no_information_answer() {
        let result = engine()
            .query_answer(&store(), &no_vector(), &user(), "Who is Sarah?", Utc::now())
            .await
            .expect("answer");
        assert_eq!(result.answer.as_deref(), Some(NO_INFORMATION));
    }

    #[tokio::test]
    async fn who_answer_prefers_person_entities() {
        let store = store();
        insert_entity(&store, "Sarah", EntityKind::Person);

        let result = engine()
            .query_answer(&store, &no_vector(), &user(), "Who is Sarah?", Utc::now())
            .await
            .expect("answer");
        let answer = result.answer.expect("answer");
        assert!(answer.contains("Sarah"), "answer: {answer}");
    }

    #[tokio::test]
    async fn where_answer_uses_relationship_edges() {
        let store = store();
        let sarah = insert_entity(&store, "Sarah", EntityKind::Person);
        let lisbon = insert_entity(&store, "Lisbon", EntityKind::Place);
        let rel = Relationship::new(
            user(),
            sarah.id,
            lisbon.id,
            RelationKind::LivesIn,
            0.8,
            Utc::now(),
        );
        store.insert_relationship(&rel).expect("insert");

        let result = engine()
            .query_answer(
                &store,
                &no_vector(),
                &user(),
                "Where does Sarah live?",
                Utc::now(),
            )
            .await
            .expect("answer");
        let answer = result.answer.expect("answer");
        // The place entity itself was not a text match, so the edge answers.
        assert!(
            answer.contains("Lisbon"),
            "expected the edge to answer, got: {answer}"
        );
    }

    #[tokio::test]
    async fn what_answer_returns_top_memory_content() {
        let store = store();
        insert_memory(&store, "I love hiking in Yosemite", MemoryKind::Preference);

        let result = engine()
            .query_answer(
                &store,
                &no_vector(),
                &user(),
                "What do I like? hiking",
                Utc::now(),
            )
            .await
            .expect("answer");
        let answer = result.answer.expect("answer");
        assert!(answer.contains("hiking"), "answer: {answer}");
    }

    #[tokio::test]
    async fn when_answer_uses_date_text() {
        let store = store();
        let mut memory = Memory::new(
            user(),
            "met Sarah at the cafe",
            MemoryKind::Event,
            5,
            0.8,
            Utc::now(),
        );
        memory.date_text = Some("yesterday".to_string());
        store.insert_memory(&memory).expect("insert");

        let result = engine()
            .query_answer(
                &store,
                &no_vector(),
                &user(),
                "When did I meet her? met",
                Utc::now(),
            )
            .await
            .expect("answer");
        let answer = result.answer.expect("answer");
        assert!(answer.contains("yesterday"), "answer: {answer}");
    }

    // ------------------------------------------------------------------
    // Graph traversal
    // ------------------------------------------------------------------

    #[test]
    fn keywords_drop_stopwords_and_duplicates() {
        let words = keywords("What do I like? I like hiking and hiking boots");
        assert_eq!(words, vec!["hiking".to_string(), "boots".to_string()]);
    }

    #[test]
    fn find_path_returns_shortest_chain() {
        let store = store();
        let a = insert_entity(&store, "Ana", EntityKind::Person);
        let b = insert_entity(&store, "Ben", EntityKind::Person);
        let c = insert_entity(&store, "Cara", EntityKind::Person);

        // a - b and b - c; a and c only connect through b.
        for (s, t) in [(a.id, b.id), (b.id, c.id)] {
            store
                .insert_relationship(&Relationship::new(
                    user(),
                    s,
                    t,
                    RelationKind::Knows,
                    0.8,
                    Utc::now(),
                ))
                .expect("insert");
        }

        let path = engine()
            .find_path(&store, &user(), a.id, c.id, None)
            .expect("path");
        assert_eq!(path.len(), 2, "a→b→c is the shortest chain");

        // Direction of edges must not matter for traversal.
        let path = engine()
            .find_path(&store, &user(), c.id, a.id, None)
            .expect("path");
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn find_path_without_chain_is_a_failure() {
        let store = store();
        let a = insert_entity(&store, "Ana", EntityKind::Person);
        let b = insert_entity(&store, "Ben", EntityKind::Person);

        let err = engine()
            .find_path(&store, &user(), a.id, b.id, None)
            .expect_err("no path");
        assert!(matches!(err, EngramError::NoPath { .. }));
    }

    #[test]
    fn find_path_respects_depth_limit() {
        let store = store();
        let ids: Vec<EntityId> = (0..5)
            .map(|i| insert_entity(&store, &format!("Node{i}"), EntityKind::Person).id)
            .collect();
        for pair in ids.windows(2) {
            store
                .insert_relationship(&Relationship::new(
                    user(),
                    pair[0],
                    pair[1],
                    RelationKind::Knows,
                    0.8,
                    Utc::now(),
                ))
                .expect("insert");
        }

        // 4 hops needed, default depth is 3.
        let err = engine()
            .find_path(&store, &user(), ids[0], ids[4], None)
            .expect_err("too deep");
        assert!(matches!(err, EngramError::NoPath { max_depth: 3, .. }));

        let path = engine()
            .find_path(&store, &user(), ids[0], ids[4], Some(4))
            .expect("path");
        assert_eq!(path.len(), 4);
    }
}
