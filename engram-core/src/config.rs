//! Configuration for the engram memory system.
//!
//! Maps directly to `engram.toml`; every subsystem gets its own section
//! with serde-level field defaults so a partial file is always valid.

use serde::{Deserialize, Serialize};

/// Top-level engram configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Extraction pipeline settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Search engine settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Vector subsystem settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Compaction / forgetting policy.
    #[serde(default)]
    pub compaction: CompactionConfig,
    /// Persistence / database settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngramConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `EngramError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::EngramError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Extraction pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Matches scoring below this confidence are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Timeout for detached background extraction, in seconds.
    #[serde(default = "default_background_timeout")]
    pub background_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            background_timeout_secs: 30,
        }
    }
}

/// Search engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result limit when the caller does not supply one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Window (in days) for the "recently mentioned/accessed" score bonus.
    #[serde(default = "default_recent_days")]
    pub recent_window_days: i64,
    /// Depth limit for graph path traversal.
    #[serde(default = "default_path_depth")]
    pub max_path_depth: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            recent_window_days: 7,
            max_path_depth: 3,
        }
    }
}

/// Vector subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Whether the vector subsystem is enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider name: "local", "ollama", "openai". Unrecognized names
    /// fall back to "local".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Dimensionality of the local provider. Remote providers fix their
    /// own dimension by model.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Embedding model name for remote providers.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL for the Ollama provider.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    /// Base URL for the OpenAI-compatible provider.
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    /// Bearer token for the OpenAI-compatible provider, if any.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout for remote providers, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Hard cap on how many stored embeddings one search scans,
    /// most-recent-first.
    #[serde(default = "default_scan_cap")]
    pub scan_cap: usize,
    /// Results below this similarity are dropped from vector search.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Capacity of the in-memory embedding cache (entries).
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "local".to_string(),
            dimensions: 384,
            model: "nomic-embed-text".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
            scan_cap: 500,
            min_similarity: 0.5,
            cache_size: 1024,
        }
    }
}

/// Compaction / forgetting policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Memories untouched for this many days become compression candidates.
    #[serde(default = "default_compress_after")]
    pub compress_after_days: i64,
    /// Compressed memories older than this many days become deletion
    /// candidates.
    #[serde(default = "default_delete_after")]
    pub delete_after_days: i64,
    /// Only memories at or below this importance are compressed.
    #[serde(default = "default_min_importance_to_keep")]
    pub min_importance_to_keep: u8,
    /// Only compressed memories at or below this importance are deleted.
    #[serde(default = "default_delete_max_importance")]
    pub delete_max_importance: u8,
    /// Upper bound on candidates considered per run.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            compress_after_days: 90,
            delete_after_days: 365,
            min_importance_to_keep: 3,
            delete_max_importance: 2,
            max_batch: 100,
        }
    }
}

/// Persistence / database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable SQLite WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
    /// How many rotating backups to keep.
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
            backup_count: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_min_confidence() -> f32 {
    0.6
}

fn default_background_timeout() -> u64 {
    30
}

fn default_limit() -> usize {
    10
}

fn default_recent_days() -> i64 {
    7
}

fn default_path_depth() -> usize {
    3
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_scan_cap() -> usize {
    500
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_cache_size() -> usize {
    1024
}

fn default_compress_after() -> i64 {
    90
}

fn default_delete_after() -> i64 {
    365
}

fn default_min_importance_to_keep() -> u8 {
    3
}

fn default_delete_max_importance() -> u8 {
    2
}

fn default_max_batch() -> usize {
    100
}

fn default_busy_timeout() -> u32 {
    5000
}

fn default_backup_count() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
