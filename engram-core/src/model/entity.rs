//! Entity — a named thing tracked across conversations.
//!
//! Entities act as a permanent identity registry: they are created on
//! first mention and updated on every subsequent one, but no automatic
//! code path deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityKind, UserId};

/// A named person / place / organization / concept known about one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier.
    pub id: EntityId,
    /// Owning user.
    pub user_id: UserId,
    /// What kind of thing this is.
    pub kind: EntityKind,
    /// Canonical name. Unique per user, case-insensitively, for resolution.
    pub name: String,
    /// Alternate names, insertion-ordered, de-duplicated case-insensitively.
    pub aliases: Vec<String>,
    /// Free-text description.
    pub description: String,
    /// How many times this entity has been mentioned.
    pub mention_count: u32,
    /// When the entity was first mentioned. Set once, never overwritten.
    pub first_mentioned: DateTime<Utc>,
    /// When the entity was last mentioned. Monotonically non-decreasing.
    pub last_mentioned: DateTime<Utc>,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    /// User-settable importance in [1, 10].
    pub importance: u8,
    /// Conversation the entity was first extracted from, if known.
    pub source_conversation: Option<String>,
}

impl Entity {
    /// Create a new entity from its first mention.
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: EntityKind,
        name: impl Into<String>,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            user_id,
            kind,
            name: name.into(),
            aliases: Vec::new(),
            description: String::new(),
            mention_count: 1,
            first_mentioned: now,
            last_mentioned: now,
            confidence: confidence.clamp(0.0, 1.0),
            importance: 5,
            source_conversation: None,
        }
    }

    /// Attach the conversation this entity was extracted from.
    #[must_use]
    pub fn with_source(mut self, conversation_id: impl Into<String>) -> Self {
        self.source_conversation = Some(conversation_id.into());
        self
    }

    /// Record another mention of this entity.
    ///
    /// `first_mentioned` is never touched; `last_mentioned` only moves
    /// forward; confidence keeps the strongest evidence seen so far.
    ///
    /// The surrounding read-then-write is not an atomic increment: two
    /// concurrent extractions resolving the same name can under-count
    /// mentions. That approximation is accepted rather than guarded.
    pub fn record_mention(&mut self, confidence: f32, now: DateTime<Utc>) {
        self.mention_count = self.mention_count.saturating_add(1);
        if now > self.last_mentioned {
            self.last_mentioned = now;
        }
        let confidence = confidence.clamp(0.0, 1.0);
        if confidence > self.confidence {
            self.confidence = confidence;
        }
    }

    /// Add an alternate name, ignoring duplicates of the canonical name or
    /// an existing alias (case-insensitive).
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        let alias = alias.into();
        let lower = alias.to_lowercase();
        if self.name.to_lowercase() == lower {
            return;
        }
        if self.aliases.iter().any(|a| a.to_lowercase() == lower) {
            return;
        }
        self.aliases.push(alias);
    }

    /// Whether `name` matches the canonical name or any alias
    /// (case-insensitive).
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.name.to_lowercase() == lower
            || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }

    /// Set importance, clamped to [1, 10].
    pub fn set_importance(&mut self, importance: u8) {
        self.importance = importance.clamp(1, 10);
    }
}
