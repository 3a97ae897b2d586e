//! Relationship — a typed, optionally-directional edge between entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EntityId, RelationKind, RelationshipId, UserId};

/// A typed edge between two entities owned by the same user.
///
/// (user, source, target, kind) is unique: re-extracting the same fact
/// updates mention metadata on the existing edge instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: RelationshipId,
    /// Owning user.
    pub user_id: UserId,
    /// Edge origin.
    pub source_id: EntityId,
    /// Edge destination.
    pub target_id: EntityId,
    /// Edge label.
    pub kind: RelationKind,
    /// Whether source → target ordering carries meaning.
    pub directional: bool,
    /// How many times this edge has been extracted.
    pub mention_count: u32,
    /// First extraction time. Set once.
    pub first_mentioned: DateTime<Utc>,
    /// Latest extraction time. Monotonically non-decreasing.
    pub last_mentioned: DateTime<Utc>,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    /// Free-form edge properties.
    pub properties: BTreeMap<String, String>,
}

impl Relationship {
    /// Create a new edge from its first extraction.
    #[must_use]
    pub fn new(
        user_id: UserId,
        source_id: EntityId,
        target_id: EntityId,
        kind: RelationKind,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Self {
        let directional = kind.is_directional();
        Self {
            id: RelationshipId::new(),
            user_id,
            source_id,
            target_id,
            kind,
            directional,
            mention_count: 1,
            first_mentioned: now,
            last_mentioned: now,
            confidence: confidence.clamp(0.0, 1.0),
            properties: BTreeMap::new(),
        }
    }

    /// Record another extraction of the same edge.
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

    /// The entity on the other end of the edge, if `id` is one endpoint.
    #[must_use]
    pub fn other_end(&self, id: EntityId) -> Option<EntityId> {
        if self.source_id == id {
            Some(self.target_id)
        } else if self.target_id == id {
            Some(self.source_id)
        } else {
            None
        }
    }
}
