//! Memory — a single fact/event/preference snippet in the episodic log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EmbeddingId, EntityId, IdSet, MemoryId, MemoryKind, UserId};

/// One extracted or authored snippet of knowledge, linked to zero or more
/// entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning user.
    pub user_id: UserId,
    /// The snippet text. Once compressed, this holds the summary — the
    /// original wording is destroyed by design.
    pub content: String,
    /// Condensed form, filled by compaction.
    pub summary: String,
    /// What kind of snippet this is.
    pub kind: MemoryKind,
    /// Grouping bucket for compaction ("general" when unset).
    pub category: String,
    /// Entities this memory refers to.
    pub entity_ids: IdSet<EntityId>,
    /// When the described event happened, if known.
    pub timestamp: Option<DateTime<Utc>>,
    /// The raw time phrase the timestamp was parsed from, if any.
    pub date_text: Option<String>,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    /// Importance in [1, 10]. Always clamped.
    pub importance: u8,
    /// How many times this memory has been recalled.
    pub access_count: u32,
    /// Last recall time.
    pub last_accessed: DateTime<Utc>,
    /// Whether compaction has replaced the content with a summary.
    pub is_compressed: bool,
    /// Source memories, when this record was synthesized by compaction.
    pub compressed_from: IdSet<MemoryId>,
    /// Stored embedding row, if the memory has been indexed.
    pub embedding_id: Option<EmbeddingId>,
    /// Conversation the memory came from, if known.
    pub source_conversation: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new memory.
    #[must_use]
    pub fn new(
        user_id: UserId,
        content: impl Into<String>,
        kind: MemoryKind,
        importance: u8,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MemoryId::new(),
            user_id,
            content: content.into(),
            summary: String::new(),
            kind,
            category: "general".to_string(),
            entity_ids: IdSet::new(),
            timestamp: None,
            date_text: None,
            confidence: confidence.clamp(0.0, 1.0),
            importance: importance.clamp(1, 10),
            access_count: 0,
            last_accessed: now,
            is_compressed: false,
            compressed_from: IdSet::new(),
            embedding_id: None,
            source_conversation: None,
            created_at: now,
        }
    }

    /// Set the compaction grouping bucket.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !category.is_empty() {
            self.category = category;
        }
        self
    }

    /// Link the memory to a set of entities.
    #[must_use]
    pub fn with_entities(mut self, entity_ids: IdSet<EntityId>) -> Self {
        self.entity_ids = entity_ids;
        self
    }

    /// Attach an event time and the phrase it was parsed from.
    #[must_use]
    pub fn with_event_time(mut self, timestamp: DateTime<Utc>, date_text: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp);
        self.date_text = Some(date_text.into());
        self
    }

    /// Attach the source conversation.
    #[must_use]
    pub fn with_source(mut self, conversation_id: impl Into<String>) -> Self {
        self.source_conversation = Some(conversation_id.into());
        self
    }

    /// Record a recall of this memory.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Set importance, clamped to [1, 10].
    pub fn set_importance(&mut self, importance: u8) {
        self.importance = importance.clamp(1, 10);
    }

    /// Destructively compress: the summary replaces the content, and the
    /// original wording is gone for good.
    pub fn mark_compressed(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        self.content = summary.clone();
        self.summary = summary;
        self.is_compressed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(importance: u8) -> Memory {
        Memory::new(
            UserId::new("u1"),
            "I love hiking in Yosemite",
            MemoryKind::Preference,
            importance,
            0.8,
            Utc::now(),
        )
    }

    #[test]
    fn importance_clamps_to_valid_range() {
        assert_eq!(sample(0).importance, 1);
        assert_eq!(sample(5).importance, 5);
        assert_eq!(sample(200).importance, 10);
    }

    #[test]
    fn record_access_bumps_count_and_clock() {
        let mut memory = sample(5);
        let later = memory.last_accessed + chrono::Duration::hours(3);

        memory.record_access(later);
        assert_eq!(memory.access_count, 1);
        assert_eq!(memory.last_accessed, later);

        // Stale clock never rewinds last_accessed.
        memory.record_access(later - chrono::Duration::days(1));
        assert_eq!(memory.access_count, 2);
        assert_eq!(memory.last_accessed, later);
    }

    #[test]
    fn compression_destroys_original_content() {
        let mut memory = sample(3);
        let original = memory.content.clone();

        memory.mark_compressed("3 preferences about the outdoors");

        assert!(memory.is_compressed);
        assert_eq!(memory.content, memory.summary);
        assert_ne!(memory.content, original);
    }

    #[test]
    fn empty_category_keeps_default_bucket() {
        let memory = sample(5).with_category("");
        assert_eq!(memory.category, "general");

        let memory = sample(5).with_category("work");
        assert_eq!(memory.category, "work");
    }
}
