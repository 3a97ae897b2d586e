//! Rule-based extraction pipeline — conversational text → records.
//!
//! A fixed battery of pattern matchers scans the input for people, places,
//! organizations, time references, relationship statements, and
//! first-person memories. Each pattern carries a fixed confidence; matches
//! scoring below the configured minimum are discarded before anything is
//! persisted.
//!
//! Deliberately not NLP: no tokenizer, no learned NER. The patterns are
//! the documented design, tuned for first-person conversational English.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::model::{Entity, Memory, Relationship};
use crate::store::MemoryStore;
use crate::types::{
    EntityId, EntityKind, IdSet, MemoryId, MemoryKind, RelationKind, RelationshipId, TimeRange,
    UserId,
};

// ---------------------------------------------------------------------------
// Per-pattern confidences
// ---------------------------------------------------------------------------

const CONF_PERSON_MET: f32 = 0.8;
const CONF_PERSON_POSSESSIVE: f32 = 0.9;
const CONF_PERSON_SPEECH: f32 = 0.7;
const CONF_PERSON_VERB: f32 = 0.7;
const CONF_PLACE_SUFFIX: f32 = 0.85;
const CONF_PLACE_BARE: f32 = 0.6;
const CONF_ORG_LEGAL: f32 = 0.9;
const CONF_ORG_WORKS_AT: f32 = 0.8;
const CONF_TIME_RELATIVE: f32 = 0.85;
const CONF_TIME_WEEKDAY: f32 = 0.8;
const CONF_TIME_MONTH: f32 = 0.7;
const CONF_REL_VERB: f32 = 0.85;
const CONF_REL_FRIEND: f32 = 0.8;
const CONF_MEM_PREFERENCE: f32 = 0.8;
const CONF_MEM_GOAL: f32 = 0.8;
const CONF_MEM_FACT: f32 = 0.7;
const CONF_MEM_EVENT: f32 = 0.75;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static PERSON_PATTERNS: LazyLock<Vec<(Regex, f32)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b(?:met with|met|meeting with) ([A-Z][a-z]+(?: [A-Z][a-z]+)?)")
                .expect("person pattern"),
            CONF_PERSON_MET,
        ),
        (
            Regex::new(
                r"\bmy (?:friend|colleague|coworker|boss|neighbor|sister|brother|mother|father|cousin|roommate|partner) ([A-Z][a-z]+(?: [A-Z][a-z]+)?)",
            )
            .expect("person pattern"),
            CONF_PERSON_POSSESSIVE,
        ),
        (
            Regex::new(r"\b([A-Z][a-z]+) (?:said|told me|mentioned|asked|suggested)")
                .expect("person pattern"),
            CONF_PERSON_SPEECH,
        ),
        (
            Regex::new(r"\b(?:talked to|spoke with|spoke to|saw|called) ([A-Z][a-z]+(?: [A-Z][a-z]+)?)")
                .expect("person pattern"),
            CONF_PERSON_MET,
        ),
        (
            Regex::new(r"\b([A-Z][a-z]+) (?:works?|worked|lives?|lived|moved) ")
                .expect("person pattern"),
            CONF_PERSON_VERB,
        ),
    ]
});

static PLACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:at|in|to|near|from) (?:the )?([A-Z][A-Za-z']*(?: [A-Z][A-Za-z']*)*)")
        .expect("place pattern")
});

/// Suffix hints marking a proper-noun run as a physical place.
const PLACE_SUFFIXES: &[&str] = &[
    "Cafe", "Café", "Street", "Avenue", "Road", "Boulevard", "Park", "Building",
    "Restaurant", "Bar", "Gym", "Library", "Museum", "Airport", "Station",
    "Beach", "Mall", "Hotel", "Square", "Bridge", "Tower", "Market",
];

static ORG_LEGAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z]*(?: [A-Z][A-Za-z]*)* (?:Inc|Corp|Corporation|LLC|Ltd|GmbH|Co)\.?)\b")
        .expect("org pattern")
});

static ORG_WORKS_AT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:works?|worked|working) (?:at|for) (?:the )?([A-Z][A-Za-z]*(?: [A-Z][A-Za-z]*)*)")
        .expect("org pattern")
});

static TIME_RELATIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(yesterday|today|tomorrow|last week|next week|last month|next month|last year|this morning|this afternoon|this evening|this weekend|last night)\b",
    )
    .expect("time pattern")
});

static TIME_WEEKDAY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday)\b")
        .expect("time pattern")
});

static TIME_MONTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\b",
    )
    .expect("time pattern")
});

static REL_WORKS_AT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?: [A-Z][a-z]+)?) works? at (?:the )?([A-Z][A-Za-z]*(?: [A-Z][A-Za-z]*)*)")
        .expect("relationship pattern")
});

static REL_LIVES_IN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?: [A-Z][a-z]+)?) lives? in (?:the )?([A-Z][A-Za-z]*(?: [A-Z][A-Za-z]*)*)")
        .expect("relationship pattern")
});

static REL_FRIENDS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+) is friends with ([A-Z][a-z]+)")
        .expect("relationship pattern")
});

static REL_FRIENDS_AND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+) and ([A-Z][a-z]+) are friends")
        .expect("relationship pattern")
});

static MEM_PREFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bI (?:really )?(?:like|love|enjoy|prefer|hate|dislike)\b")
        .expect("memory pattern")
});

static MEM_GOAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bI (?:want to|would like to|hope to)\b").expect("memory pattern")
});

static MEM_PLAN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bI (?:plan to|am planning to|intend to|am going to)\b")
        .expect("memory pattern")
});

static MEM_FACT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bI(?:'m| am) (?:a|an) ").expect("memory pattern")
});

static MEM_EVENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:met|saw|visited|attended)\b").expect("memory pattern"));

/// Words that look like proper nouns but never name a person or place.
const STOPLIST: &[&str] = &[
    "I", "He", "She", "It", "We", "You", "They", "The", "This", "That", "These",
    "Those", "My", "Our", "Your", "Their", "His", "Her", "Its", "There", "Then",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December", "God", "Ok", "Okay", "Yes", "No",
];

fn in_stoplist(name: &str) -> bool {
    STOPLIST.iter().any(|s| s.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// Extraction output types
// ---------------------------------------------------------------------------

/// A candidate entity produced by the pattern battery.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    /// Name as matched in the text.
    pub name: String,
    /// Inferred kind.
    pub kind: EntityKind,
    /// Fixed per-pattern confidence.
    pub confidence: f32,
}

/// A candidate relationship between two already-extracted entity names.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
    /// Name of the edge source, as extracted.
    pub source_name: String,
    /// Name of the edge target, as extracted.
    pub target_name: String,
    /// Edge label.
    pub kind: RelationKind,
    /// Fixed per-pattern confidence.
    pub confidence: f32,
}

/// A candidate memory snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMemory {
    /// Snippet content (the matched sentence).
    pub content: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Compaction grouping bucket.
    pub category: String,
    /// Importance in [1, 10].
    pub importance: u8,
    /// Fixed per-pattern confidence.
    pub confidence: f32,
    /// Names of extracted entities mentioned in the snippet.
    pub entity_names: Vec<String>,
    /// Raw time phrase found in the snippet, if any.
    pub date_text: Option<String>,
}

/// Everything one extraction pass found.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// Candidate entities, de-duplicated by (lowercased name, kind).
    pub entities: Vec<ExtractedEntity>,
    /// Candidate relationships. Both endpoints are names that appear in
    /// `entities` — relationships never introduce new entities.
    pub relationships: Vec<ExtractedRelationship>,
    /// Candidate memories.
    pub memories: Vec<ExtractedMemory>,
    /// Mean confidence over everything extracted; 0.0 when nothing matched.
    pub overall_confidence: f32,
}

impl ExtractionResult {
    /// Whether the pass found nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.memories.is_empty()
    }
}

/// IDs written by a persist pass, plus per-item failures.
///
/// A failed write for one item is recorded and skipped; the batch always
/// completes (partial-failure tolerant, no rollback).
#[derive(Debug, Clone, Default)]
pub struct StoredExtraction {
    /// Entities created or updated.
    pub entities: Vec<EntityId>,
    /// Relationships created or updated.
    pub relationships: Vec<RelationshipId>,
    /// Memories created.
    pub memories: Vec<MemoryId>,
    /// One message per item that failed to persist.
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The rule-based extraction pipeline.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractionConfig,
}

impl Extractor {
    /// Create an extractor with the given configuration.
    #[must_use]
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Run the pattern battery over `text` without touching the store.
    #[must_use]
    pub fn extract(&self, text: &str) -> ExtractionResult {
        let mut entities = Vec::new();

        // --- People ---
        for (pattern, confidence) in PERSON_PATTERNS.iter() {
            for caps in pattern.captures_iter(text) {
                if let Some(name) = caps.get(1) {
                    push_entity(
                        &mut entities,
                        name.as_str(),
                        EntityKind::Person,
                        *confidence,
                    );
                }
            }
        }

        // --- Places ---
        for caps in PLACE_PATTERN.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                let name = name.as_str();
                let confidence = if has_place_suffix(name) {
                    CONF_PLACE_SUFFIX
                } else {
                    CONF_PLACE_BARE
                };
                push_entity(&mut entities, name, EntityKind::Place, confidence);
            }
        }

        // --- Organizations ---
        for caps in ORG_LEGAL_PATTERN.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_entity(
                    &mut entities,
                    name.as_str(),
                    EntityKind::Organization,
                    CONF_ORG_LEGAL,
                );
            }
        }
        for caps in ORG_WORKS_AT_PATTERN.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_entity(
                    &mut entities,
                    name.as_str(),
                    EntityKind::Organization,
                    CONF_ORG_WORKS_AT,
                );
            }
        }

        // --- Time references ---
        for (pattern, confidence) in [
            (&*TIME_RELATIVE_PATTERN, CONF_TIME_RELATIVE),
            (&*TIME_WEEKDAY_PATTERN, CONF_TIME_WEEKDAY),
            (&*TIME_MONTH_PATTERN, CONF_TIME_MONTH),
        ] {
            for caps in pattern.captures_iter(text) {
                if let Some(name) = caps.get(1) {
                    push_time_entity(&mut entities, name.as_str(), confidence);
                }
            }
        }

        // Dedup by (lowercased name, kind), keeping the strongest confidence,
        // then drop anything under the floor.
        let entities = dedup_entities(entities);
        let entities: Vec<_> = entities
            .into_iter()
            .filter(|e| e.confidence >= self.config.min_confidence)
            .collect();

        // A place reading of a name is dropped when an organization reading
        // of the same name survived (the org patterns are more specific).
        let entities = prefer_organizations(entities);

        // --- Relationships (never introduce new entities) ---
        let relationships = self.extract_relationships(text, &entities);

        // --- Memories ---
        let memories = self.extract_memories(text, &entities);

        let overall_confidence = mean_confidence(&entities, &relationships, &memories);

        ExtractionResult {
            entities,
            relationships,
            memories,
            overall_confidence,
        }
    }

    fn extract_relationships(
        &self,
        text: &str,
        entities: &[ExtractedEntity],
    ) -> Vec<ExtractedRelationship> {
        let known: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let is_known =
            |name: &str| known.iter().any(|k| k.eq_ignore_ascii_case(name));

        let mut out: Vec<ExtractedRelationship> = Vec::new();
        let mut push = |source: &str, target: &str, kind: RelationKind, confidence: f32| {
            // Both participants must already be extracted entities.
            if !is_known(source) || !is_known(target) {
                return;
            }
            if confidence < self.config.min_confidence {
                return;
            }
            let duplicate = out.iter().any(|r| {
                r.source_name.eq_ignore_ascii_case(source)
                    && r.target_name.eq_ignore_ascii_case(target)
                    && r.kind == kind
            });
            if !duplicate {
                out.push(ExtractedRelationship {
                    source_name: source.to_string(),
                    target_name: target.to_string(),
                    kind,
                    confidence,
                });
            }
        };

        for caps in REL_WORKS_AT_PATTERN.captures_iter(text) {
            if let (Some(s), Some(t)) = (caps.get(1), caps.get(2)) {
                push(s.as_str(), t.as_str(), RelationKind::WorksAt, CONF_REL_VERB);
            }
        }
        for caps in REL_LIVES_IN_PATTERN.captures_iter(text) {
            if let (Some(s), Some(t)) = (caps.get(1), caps.get(2)) {
                push(s.as_str(), t.as_str(), RelationKind::LivesIn, CONF_REL_VERB);
            }
        }
        for pattern in [&*REL_FRIENDS_PATTERN, &*REL_FRIENDS_AND_PATTERN] {
            for caps in pattern.captures_iter(text) {
                if let (Some(s), Some(t)) = (caps.get(1), caps.get(2)) {
                    push(s.as_str(), t.as_str(), RelationKind::FriendOf, CONF_REL_FRIEND);
                }
            }
        }

        out
    }

    fn extract_memories(
        &self,
        text: &str,
        entities: &[ExtractedEntity],
    ) -> Vec<ExtractedMemory> {
        let mut out = Vec::new();

        for sentence in split_sentences(text) {
            let classified = if MEM_PREFERENCE_PATTERN.is_match(sentence) {
                Some((MemoryKind::Preference, "preferences", 6, CONF_MEM_PREFERENCE))
            } else if MEM_GOAL_PATTERN.is_match(sentence) {
                Some((MemoryKind::Goal, "goals", 7, CONF_MEM_GOAL))
            } else if MEM_PLAN_PATTERN.is_match(sentence) {
                Some((MemoryKind::Plan, "plans", 6, CONF_MEM_GOAL))
            } else if MEM_EVENT_PATTERN.is_match(sentence) {
                Some((MemoryKind::Event, "events", 5, CONF_MEM_EVENT))
            } else if MEM_FACT_PATTERN.is_match(sentence) {
                Some((MemoryKind::Fact, "personal", 5, CONF_MEM_FACT))
            } else {
                None
            };

            let Some((kind, category, importance, confidence)) = classified else {
                continue;
            };
            if confidence < self.config.min_confidence {
                continue;
            }

            let entity_names: Vec<String> = entities
                .iter()
                .filter(|e| e.kind != EntityKind::TimeReference)
                .filter(|e| contains_ignore_case(sentence, &e.name))
                .map(|e| e.name.clone())
                .collect();

            let date_text = TIME_RELATIVE_PATTERN
                .find(sentence)
                .or_else(|| TIME_WEEKDAY_PATTERN.find(sentence))
                .or_else(|| TIME_MONTH_PATTERN.find(sentence))
                .map(|m| m.as_str().to_string());

            out.push(ExtractedMemory {
                content: sentence.to_string(),
                kind,
                category: category.to_string(),
                importance,
                confidence,
                entity_names,
                date_text,
            });
        }

        out
    }

    /// Extract from `text` and persist everything through `store`.
    ///
    /// Entity resolution is find-or-create by case-insensitive name;
    /// relationships are find-or-create by (source, target, kind); memories
    /// are always newly created and linked to resolved entity IDs.
    ///
    /// A failed write is logged, recorded in the result, and skipped — the
    /// rest of the batch continues.
    ///
    /// # Errors
    ///
    /// This function itself never fails; per-item failures land in
    /// [`StoredExtraction::errors`]. The `Result` covers future stores that
    /// may fail to begin a pass at all.
    pub fn process_and_store(
        &self,
        store: &MemoryStore,
        user: &UserId,
        text: &str,
        conversation_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StoredExtraction> {
        let extraction = self.extract(text);
        let mut outcome = StoredExtraction::default();
        let mut name_to_id: HashMap<String, EntityId> = HashMap::new();

        // --- Entities: find-or-create by case-insensitive name ---
        for candidate in &extraction.entities {
            let key = candidate.name.to_lowercase();
            match store.find_entity_by_name(user, &candidate.name) {
                Ok(Some(mut existing)) => {
                    existing.record_mention(candidate.confidence, now);
                    match store.update_entity(&existing) {
                        Ok(()) => {
                            name_to_id.insert(key, existing.id);
                            outcome.entities.push(existing.id);
                        }
                        Err(e) => {
                            warn!(name = %candidate.name, error = %e, "entity update failed");
                            outcome.errors.push(format!(
                                "entity '{}': {e}",
                                candidate.name
                            ));
                        }
                    }
                }
                Ok(None) => {
                    let mut entity = Entity::new(
                        user.clone(),
                        candidate.kind,
                        candidate.name.clone(),
                        candidate.confidence,
                        now,
                    );
                    if let Some(conversation) = conversation_id {
                        entity = entity.with_source(conversation);
                    }
                    match store.insert_entity(&entity) {
                        Ok(()) => {
                            name_to_id.insert(key, entity.id);
                            outcome.entities.push(entity.id);
                        }
                        Err(e) => {
                            warn!(name = %candidate.name, error = %e, "entity insert failed");
                            outcome.errors.push(format!(
                                "entity '{}': {e}",
                                candidate.name
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!(name = %candidate.name, error = %e, "entity lookup failed");
                    outcome
                        .errors
                        .push(format!("entity '{}': {e}", candidate.name));
                }
            }
        }

        // --- Relationships: find-or-create by (source, target, kind) ---
        for candidate in &extraction.relationships {
            let source = name_to_id.get(&candidate.source_name.to_lowercase());
            let target = name_to_id.get(&candidate.target_name.to_lowercase());
            let (Some(&source), Some(&target)) = (source, target) else {
                // An endpoint's write failed earlier; skip quietly.
                continue;
            };

            let stored = store
                .find_relationship(user, source, target, &candidate.kind)
                .and_then(|existing| match existing {
                    Some(mut rel) => {
                        rel.record_mention(candidate.confidence, now);
                        store.update_relationship(&rel).map(|()| rel.id)
                    }
                    None => {
                        let rel = Relationship::new(
                            user.clone(),
                            source,
                            target,
                            candidate.kind.clone(),
                            candidate.confidence,
                            now,
                        );
                        store.insert_relationship(&rel).map(|()| rel.id)
                    }
                });
            match stored {
                Ok(id) => outcome.relationships.push(id),
                Err(e) => {
                    warn!(
                        source = %candidate.source_name,
                        target = %candidate.target_name,
                        error = %e,
                        "relationship write failed"
                    );
                    outcome.errors.push(format!(
                        "relationship '{} -{}-> {}': {e}",
                        candidate.source_name, candidate.kind, candidate.target_name
                    ));
                }
            }
        }

        // --- Memories: always newly created ---
        for candidate in &extraction.memories {
            let mut linked = IdSet::new();
            for name in &candidate.entity_names {
                if let Some(&id) = name_to_id.get(&name.to_lowercase()) {
                    linked.insert(id);
                }
            }

            let mut memory = Memory::new(
                user.clone(),
                candidate.content.clone(),
                candidate.kind,
                candidate.importance,
                candidate.confidence,
                now,
            )
            .with_category(candidate.category.clone())
            .with_entities(linked);
            if let Some(date_text) = &candidate.date_text {
                // Relative phrases are resolvable right now; anything else
                // is kept verbatim for later interpretation.
                match TimeRange::from_phrase(date_text, now) {
                    Some(range) => {
                        memory = memory.with_event_time(range.start, date_text.clone());
                    }
                    None => memory.date_text = Some(date_text.clone()),
                }
            }
            if let Some(conversation) = conversation_id {
                memory = memory.with_source(conversation);
            }

            match store.insert_memory(&memory) {
                Ok(()) => outcome.memories.push(memory.id),
                Err(e) => {
                    warn!(error = %e, "memory insert failed");
                    outcome
                        .errors
                        .push(format!("memory '{}': {e}", candidate.content));
                }
            }
        }

        debug!(
            user = %user,
            entities = outcome.entities.len(),
            relationships = outcome.relationships.len(),
            memories = outcome.memories.len(),
            failures = outcome.errors.len(),
            "extraction pass stored"
        );

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn push_entity(out: &mut Vec<ExtractedEntity>, name: &str, kind: EntityKind, confidence: f32) {
    let name = name.trim();
    if name.is_empty() || in_stoplist(name) {
        return;
    }
    out.push(ExtractedEntity {
        name: name.to_string(),
        kind,
        confidence,
    });
}

fn push_time_entity(out: &mut Vec<ExtractedEntity>, name: &str, confidence: f32) {
    // Time references bypass the stoplist: weekdays and months are the
    // whole point here.
    let name = name.trim();
    if name.is_empty() {
        return;
    }
    out.push(ExtractedEntity {
        name: name.to_string(),
        kind: EntityKind::TimeReference,
        confidence,
    });
}

fn dedup_entities(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut out: Vec<ExtractedEntity> = Vec::new();
    for entity in entities {
        let key = entity.name.to_lowercase();
        if let Some(existing) = out
            .iter_mut()
            .find(|e| e.name.to_lowercase() == key && e.kind == entity.kind)
        {
            if entity.confidence > existing.confidence {
                existing.confidence = entity.confidence;
            }
        } else {
            out.push(entity);
        }
    }
    out
}

fn prefer_organizations(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let org_names: Vec<String> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Organization)
        .map(|e| e.name.to_lowercase())
        .collect();
    entities
        .into_iter()
        .filter(|e| {
            e.kind != EntityKind::Place || !org_names.contains(&e.name.to_lowercase())
        })
        .collect()
}

fn has_place_suffix(name: &str) -> bool {
    name.rsplit(' ')
        .next()
        .is_some_and(|last| PLACE_SUFFIXES.contains(&last))
}

fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn mean_confidence(
    entities: &[ExtractedEntity],
    relationships: &[ExtractedRelationship],
    memories: &[ExtractedMemory],
) -> f32 {
    let sum: f32 = entities.iter().map(|e| e.confidence).sum::<f32>()
        + relationships.iter().map(|r| r.confidence).sum::<f32>()
        + memories.iter().map(|m| m.confidence).sum::<f32>();
    let count = entities.len() + relationships.len() + memories.len();
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
