//! Error types for the engram core library.

use thiserror::Error;

/// Top-level error type for all engram operations.
#[derive(Error, Debug)]
pub enum EngramError {
    /// An entity with the given name or ID was not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// A memory with the given ID was not found.
    #[error("Memory not found: {0}")]
    MemoryNotFound(crate::MemoryId),

    /// A relationship with the given ID was not found.
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(crate::RelationshipId),

    /// A required field was missing or invalid (e.g. empty content).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The vector subsystem is not configured/enabled.
    #[error("Embedding provider is disabled")]
    ProviderDisabled,

    /// An embedding or chat provider failed (network/API error).
    #[error("Provider failure: {0}")]
    Provider(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No relationship chain connects two entities within the search depth.
    #[error("No path between {from} and {target} within depth {max_depth}")]
    NoPath {
        /// Traversal origin.
        from: crate::EntityId,
        /// Traversal target.
        target: crate::EntityId,
        /// Depth limit that was exhausted.
        max_depth: usize,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngramError>;
