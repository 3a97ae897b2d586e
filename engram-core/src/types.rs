//! Core type definitions for the engram memory system.
//!
//! Identifier newtypes, the closed kind sets for entities / relationships /
//! memories, the ordered-deduplicated [`IdSet`], and the [`Embedding`]
//! vector with its packed byte codec.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Owner of a slice of the store. Every record is scoped to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user ID from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The anonymous/default tenant. Kept as an intentional fallback for
    /// single-user deployments; every API still takes an explicit `UserId`.
    #[must_use]
    pub fn default_tenant() -> Self {
        Self("default_user".to_string())
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common behaviour shared by the UUID-backed identifier newtypes.
///
/// Lets [`IdSet`] and the persistence layer stay generic over which kind
/// of record an identifier names.
pub trait Identifier: Copy + Eq + std::hash::Hash {
    /// Wrap a raw UUID.
    fn from_uuid(raw: Uuid) -> Self;
    /// The raw UUID.
    fn as_uuid(&self) -> Uuid;
}

/// Unique identifier for an [`crate::model::Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifier for EntityId {
    fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Unique identifier for a [`crate::model::Relationship`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipId(pub Uuid);

impl RelationshipId {
    /// Create a new random relationship ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RelationshipId {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifier for RelationshipId {
    fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Unique identifier for a [`crate::model::Memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifier for MemoryId {
    fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Unique identifier for a stored embedding row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingId(pub Uuid);

impl EmbeddingId {
    /// Create a new random embedding ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EmbeddingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EmbeddingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Kind Sets
// ---------------------------------------------------------------------------

/// What kind of thing an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A person.
    Person,
    /// A place (city, venue, street, …).
    Place,
    /// An organization (company, club, institution).
    Organization,
    /// An event.
    Event,
    /// An abstract concept or topic.
    Concept,
    /// A stated preference.
    Preference,
    /// A goal or aspiration.
    Goal,
    /// A reference to a point or span of time.
    TimeReference,
    /// Anything that doesn't fit the closed set.
    Other,
}

impl EntityKind {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Place => "place",
            Self::Organization => "organization",
            Self::Event => "event",
            Self::Concept => "concept",
            Self::Preference => "preference",
            Self::Goal => "goal",
            Self::TimeReference => "time_reference",
            Self::Other => "other",
        }
    }

    /// Parse the database string form. Unknown strings fold into `Other`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "person" => Self::Person,
            "place" => Self::Place,
            "organization" => Self::Organization,
            "event" => Self::Event,
            "concept" => Self::Concept,
            "preference" => Self::Preference,
            "goal" => Self::Goal,
            "time_reference" => Self::TimeReference,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of snippet a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A standalone fact.
    Fact,
    /// A stated preference ("I like …").
    Preference,
    /// Something that happened.
    Event,
    /// An intention ("I plan to …").
    Plan,
    /// An observation about the world.
    Observation,
    /// A goal ("I want to …").
    Goal,
    /// A fact about a relationship between entities.
    Relationship,
}

impl MemoryKind {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Event => "event",
            Self::Plan => "plan",
            Self::Observation => "observation",
            Self::Goal => "goal",
            Self::Relationship => "relationship",
        }
    }

    /// Parse the database string form. Unknown strings fold into `Fact`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "preference" => Self::Preference,
            "event" => Self::Event,
            "plan" => Self::Plan,
            "observation" => Self::Observation,
            "goal" => Self::Goal,
            "relationship" => Self::Relationship,
            _ => Self::Fact,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The typed label on an edge between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Employment: person → organization.
    WorksAt,
    /// Residence: person → place.
    LivesIn,
    /// Friendship (non-directional).
    FriendOf,
    /// Containment / location: thing → place.
    LocatedIn,
    /// Generic acquaintance.
    Knows,
    /// Affinity: person → anything.
    Likes,
    /// Any edge label outside the closed set.
    Other(String),
}

impl RelationKind {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorksAt => "worksAt",
            Self::LivesIn => "livesIn",
            Self::FriendOf => "friendOf",
            Self::LocatedIn => "locatedIn",
            Self::Knows => "knows",
            Self::Likes => "likes",
            Self::Other(s) => s,
        }
    }

    /// Parse the database string form.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "worksAt" => Self::WorksAt,
            "livesIn" => Self::LivesIn,
            "friendOf" => Self::FriendOf,
            "locatedIn" => Self::LocatedIn,
            "knows" => Self::Knows,
            "likes" => Self::Likes,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this kind of edge has an inherent direction.
    #[must_use]
    pub fn is_directional(&self) -> bool {
        !matches!(self, Self::FriendOf | Self::Knows)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IdSet — ordered, de-duplicated identifier list
// ---------------------------------------------------------------------------

/// An insertion-ordered, de-duplicated list of identifiers.
///
/// This replaces delimiter-joined ID strings as a set container: membership
/// ignores insertion order, duplicates are rejected on insert, and the
/// textual codec tolerates arbitrary whitespace around separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSet<T>(Vec<T>);

impl<T: Identifier> IdSet<T> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert an identifier. Returns `false` if it was already present.
    pub fn insert(&mut self, id: T) -> bool {
        if self.0.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, id: &T) -> bool {
        self.0.contains(id)
    }

    /// Merge every identifier from `other` into this set.
    pub fn union(&mut self, other: &Self) {
        for id in &other.0 {
            self.insert(*id);
        }
    }

    /// Number of identifiers in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// View as a slice in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Comma-joined string form for storage in a TEXT column.
    #[must_use]
    pub fn to_delimited(&self) -> String {
        self.0
            .iter()
            .map(|id| id.as_uuid().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a delimited string form. Tokens are split on commas, trimmed
    /// of arbitrary surrounding whitespace, and de-duplicated; tokens that
    /// are not valid UUIDs are skipped.
    #[must_use]
    pub fn from_delimited(raw: &str) -> Self {
        let mut set = Self::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Ok(uuid) = Uuid::parse_str(token) {
                set.insert(T::from_uuid(uuid));
            }
        }
        set
    }
}

impl<T: Identifier> Default for IdSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identifier> FromIterator<T> for IdSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Cosine similarity between two embeddings.
    /// Returns 0.0 on dimension mismatch or if either vector has zero norm.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Pack into little-endian f32 bytes for BLOB storage.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Unpack from little-endian f32 bytes.
    ///
    /// A byte length that is not a multiple of 4 is treated as a corrupt
    /// row and yields `None` — there is no partial decode.
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self(values))
    }
}

// ---------------------------------------------------------------------------
// Relevance Score
// ---------------------------------------------------------------------------

/// Relevance score attached to a search result, orderable for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelevanceScore(pub OrderedFloat<f32>);

impl RelevanceScore {
    /// Create a relevance score, clamped to [0, 1].
    #[must_use]
    pub fn new(score: f32) -> Self {
        Self(OrderedFloat(score.clamp(0.0, 1.0)))
    }

    /// The raw score value.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0.into_inner()
    }
}

// ---------------------------------------------------------------------------
// Time Range
// ---------------------------------------------------------------------------

/// A half-open `[start, end)` window of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether `ts` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Map a relative time phrase inside `text` to a concrete window
    /// anchored at `now`. Returns `None` when no known phrase is present.
    ///
    /// Calendar phrases resolve against the UTC day boundary; "last week"
    /// and friends are rolling windows ending at `now`.
    #[must_use]
    pub fn from_phrase(text: &str, now: DateTime<Utc>) -> Option<Self> {
        let lower = text.to_lowercase();
        let day = chrono::Duration::days(1);
        let today_start = now.date_naive().and_hms_opt(0, 0, 0)?.and_utc();

        if lower.contains("yesterday") || lower.contains("last night") {
            Some(Self {
                start: today_start - day,
                end: today_start,
            })
        } else if lower.contains("today")
            || lower.contains("this morning")
            || lower.contains("this afternoon")
            || lower.contains("this evening")
        {
            Some(Self {
                start: today_start,
                end: today_start + day,
            })
        } else if lower.contains("tomorrow") {
            Some(Self {
                start: today_start + day,
                end: today_start + day + day,
            })
        } else if lower.contains("last week") || lower.contains("this week") {
            Some(Self {
                start: now - chrono::Duration::days(7),
                end: now,
            })
        } else if lower.contains("last month") || lower.contains("this month") {
            Some(Self {
                start: now - chrono::Duration::days(30),
                end: now,
            })
        } else if lower.contains("last year") {
            Some(Self {
                start: now - chrono::Duration::days(365),
                end: now,
            })
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idset_deduplicates_and_keeps_order() {
        let a = MemoryId::new();
        let b = MemoryId::new();
        let mut set = IdSet::new();

        assert!(set.insert(a));
        assert!(set.insert(b));
        assert!(!set.insert(a), "duplicate insert must be rejected");

        assert_eq!(set.len(), 2);
        let ordered: Vec<_> = set.iter().copied().collect();
        assert_eq!(ordered, vec![a, b]);
    }

    #[test]
    fn idset_delimited_round_trip() {
        let ids: Vec<EntityId> = (0..3).map(|_| EntityId::new()).collect();
        let set: IdSet<EntityId> = ids.iter().copied().collect();

        let text = set.to_delimited();
        let parsed = IdSet::<EntityId>::from_delimited(&text);
        assert_eq!(set, parsed);
    }

    #[test]
    fn idset_parse_tolerates_whitespace() {
        let a = EntityId::new();
        let b = EntityId::new();
        let raw = format!("  {} ,{}  , ", a.0, b.0);

        let set = IdSet::<EntityId>::from_delimited(&raw);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
        assert!(set.contains(&b));
    }

    #[test]
    fn idset_parse_skips_garbage_tokens() {
        let a = EntityId::new();
        let raw = format!("{}, not-a-uuid, ", a.0);
        let set = IdSet::<EntityId>::from_delimited(&raw);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn idset_union_merges_without_duplicates() {
        let shared = MemoryId::new();
        let left: IdSet<MemoryId> = [shared, MemoryId::new()].into_iter().collect();
        let right: IdSet<MemoryId> = [shared, MemoryId::new()].into_iter().collect();

        let mut merged = left.clone();
        merged.union(&right);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn cosine_self_similarity_is_one() {
        let a = Embedding(vec![0.3, -0.2, 0.9]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = Embedding(vec![1.0, 2.0, 3.0]);
        let b = Embedding(vec![-1.0, 0.5, 2.0]);
        assert!((a.cosine_similarity(&b) - b.cosine_similarity(&a)).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_norm_is_zero() {
        let zero = Embedding(vec![0.0, 0.0]);
        let a = Embedding(vec![1.0, 0.0]);
        assert_eq!(zero.cosine_similarity(&a), 0.0);
    }

    #[test]
    fn embedding_byte_codec_round_trip() {
        let original = Embedding(vec![1.5, -0.25, 0.0, 1e-7]);
        let bytes = original.to_le_bytes();
        let decoded = Embedding::from_le_bytes(&bytes).expect("decode");
        assert_eq!(original, decoded);
    }

    #[test]
    fn embedding_rejects_truncated_bytes() {
        let bytes = vec![0u8; 7];
        assert!(Embedding::from_le_bytes(&bytes).is_none());
    }

    #[test]
    fn relation_kind_string_round_trip() {
        for kind in [
            RelationKind::WorksAt,
            RelationKind::LivesIn,
            RelationKind::FriendOf,
            RelationKind::Other("mentorOf".to_string()),
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn entity_kind_unknown_folds_to_other() {
        assert_eq!(EntityKind::parse("spaceship"), EntityKind::Other);
    }

    #[test]
    fn relevance_score_clamps() {
        assert_eq!(RelevanceScore::new(1.7).value(), 1.0);
        assert_eq!(RelevanceScore::new(-0.2).value(), 0.0);
    }
}
