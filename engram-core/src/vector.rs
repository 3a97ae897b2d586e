//! Vector embedding subsystem — providers, index, and similarity search.
//!
//! Providers form a closed set behind one capability surface
//! {name, dimensions, generate}: a deterministic local provider
//! (hash-seeded per-token vectors, summed and L2-normalized) and two
//! remote HTTP providers (Ollama, OpenAI-compatible). Selection is by
//! configured name with the local provider as the guaranteed fallback.
//!
//! Search is a bruteforce cosine scan over a bounded, most-recent-first
//! working set of stored embeddings. That is the documented design for
//! this store's scale, not a missing ANN index.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{EngramError, Result};
use crate::model::Memory;
use crate::store::MemoryStore;
use crate::types::{Embedding, EmbeddingId, MemoryId, UserId};

// ---------------------------------------------------------------------------
// Local provider — deterministic, no external calls
// ---------------------------------------------------------------------------

/// Deterministic local embedding provider.
///
/// Each lowercased token seeds a fixed RNG that emits one vector; token
/// vectors are summed and L2-normalized. Stable across runs and processes,
/// with no network dependency. Lower quality than a real model — shared
/// tokens are all it can see.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }

    /// Embed a text. Empty or non-alphanumeric input yields a zero vector.
    #[must_use]
    pub fn generate(&self, text: &str) -> Embedding {
        let mut sum = vec![0.0_f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let mut rng = StdRng::seed_from_u64(hasher.finish());
            for v in &mut sum {
                *v += rng.gen_range(-1.0..1.0);
            }
        }

        let norm: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Embedding(sum);
        }
        for v in &mut sum {
            *v /= norm;
        }
        Embedding(sum)
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

// ---------------------------------------------------------------------------
// Remote providers — one HTTP POST per embedding
// ---------------------------------------------------------------------------

/// Ollama embedding provider (`POST /api/embeddings`).
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingProvider {
    base_url: String,
    model: String,
    dims: usize,
    timeout: Duration,
    http: reqwest::Client,
}

impl OllamaEmbeddingProvider {
    /// Create a provider against an Ollama server.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dims: usize, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            dims,
            timeout,
            http: reqwest::Client::new(),
        }
    }

    /// Request one embedding. Failures propagate — there is no silent
    /// fallback to another provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Provider`] on network or API failure.
    pub async fn generate(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EngramError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngramError::Provider(format!(
                "ollama returned HTTP {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngramError::Provider(e.to_string()))?;
        parse_float_array(&json["embedding"])
    }
}

/// OpenAI-compatible embedding provider (`POST /v1/embeddings`).
///
/// The bearer token is optional: local network deployments of the same
/// API shape often run without auth.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider against an OpenAI-compatible server.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dims: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dims,
            timeout,
            http: reqwest::Client::new(),
        }
    }

    /// Request one embedding.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Provider`] on network or API failure.
    pub async fn generate(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut request = self.http.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngramError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngramError::Provider(format!(
                "embeddings API returned HTTP {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngramError::Provider(e.to_string()))?;
        parse_float_array(&json["data"][0]["embedding"])
    }
}

fn parse_float_array(value: &serde_json::Value) -> Result<Embedding> {
    let array = value
        .as_array()
        .ok_or_else(|| EngramError::Provider("response carried no embedding array".to_string()))?;
    let mut out = Vec::with_capacity(array.len());
    for v in array {
        let f = v
            .as_f64()
            .ok_or_else(|| EngramError::Provider("non-numeric embedding element".to_string()))?;
        out.push(f as f32);
    }
    Ok(Embedding(out))
}

// ---------------------------------------------------------------------------
// Backend — closed provider set with guaranteed fallback
// ---------------------------------------------------------------------------

/// The closed set of embedding providers.
#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    /// Deterministic local provider.
    Local(HashEmbeddingProvider),
    /// Ollama HTTP provider.
    Ollama(OllamaEmbeddingProvider),
    /// OpenAI-compatible HTTP provider.
    OpenAi(OpenAiEmbeddingProvider),
}

impl EmbeddingBackend {
    /// Select a backend from configuration. Unrecognized provider names
    /// fall back to the local provider.
    #[must_use]
    pub fn select(config: &EmbeddingConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        match config.provider.as_str() {
            "local" => Self::Local(HashEmbeddingProvider::new(config.dimensions)),
            "ollama" => Self::Ollama(OllamaEmbeddingProvider::new(
                config.ollama_url.clone(),
                config.model.clone(),
                config.dimensions,
                timeout,
            )),
            "openai" => Self::OpenAi(OpenAiEmbeddingProvider::new(
                config.openai_url.clone(),
                config.api_key.clone(),
                config.model.clone(),
                config.dimensions,
                timeout,
            )),
            other => {
                warn!(provider = other, "unrecognized embedding provider, using local");
                Self::Local(HashEmbeddingProvider::new(config.dimensions))
            }
        }
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Ollama(_) => "ollama",
            Self::OpenAi(_) => "openai",
        }
    }

    /// Embedding dimensionality this provider produces.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        match self {
            Self::Local(p) => p.dims,
            Self::Ollama(p) => p.dims,
            Self::OpenAi(p) => p.dims,
        }
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::Provider`] on remote failure. The local
    /// provider never fails.
    pub async fn generate(&self, text: &str) -> Result<Embedding> {
        match self {
            Self::Local(p) => Ok(p.generate(text)),
            Self::Ollama(p) => p.generate(text).await,
            Self::OpenAi(p) => p.generate(text).await,
        }
    }
}

// ---------------------------------------------------------------------------
// VectorIndex
// ---------------------------------------------------------------------------

/// A memory ranked by similarity to a query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The matching memory.
    pub memory: Memory,
    /// Cosine similarity to the query embedding.
    pub similarity: f32,
}

/// Embedding index over memories: persists vectors through the store and
/// keeps a bounded in-memory cache.
///
/// The cache is a performance layer only, never a source of truth; it is
/// rebuilt lazily as memories are re-indexed or re-scanned, not rehydrated
/// eagerly at startup. One `RwLock` guards it: search takes the read lock,
/// indexing takes the write lock.
pub struct VectorIndex {
    backend: EmbeddingBackend,
    cache: RwLock<LruCache<MemoryId, Embedding>>,
    enabled: bool,
    scan_cap: usize,
    min_similarity: f32,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("backend", &self.backend.name())
            .field("enabled", &self.enabled)
            .field("scan_cap", &self.scan_cap)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Build the index from configuration.
    #[must_use]
    pub fn new(config: &EmbeddingConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend: EmbeddingBackend::select(config),
            cache: RwLock::new(LruCache::new(capacity)),
            enabled: config.enabled,
            scan_cap: config.scan_cap,
            min_similarity: config.min_similarity,
        }
    }

    /// Whether the subsystem is configured on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Provider name in use.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Embed a query or memory text.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ProviderDisabled`] when the subsystem is off,
    /// or [`EngramError::Provider`] on remote failure.
    pub async fn generate_embedding(&self, text: &str) -> Result<Embedding> {
        if !self.enabled {
            return Err(EngramError::ProviderDisabled);
        }
        self.backend.generate(text).await
    }

    /// Persist an already-computed vector for a memory, stamp the memory
    /// row with its embedding ID, and update the cache.
    ///
    /// Idempotent per (memory, content): re-indexing overwrites the stored
    /// vector and cache entry, so concurrent or repeated calls converge on
    /// the same state. Split from [`Self::index_memory`] so callers that
    /// serialize store access can embed without holding their store lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ProviderDisabled`] when the subsystem is off,
    /// or [`EngramError::Database`] if persisting the vector fails.
    pub fn store_vector(
        &self,
        store: &MemoryStore,
        user: &UserId,
        memory_id: MemoryId,
        vector: Embedding,
        now: DateTime<Utc>,
    ) -> Result<EmbeddingId> {
        if !self.enabled {
            return Err(EngramError::ProviderDisabled);
        }
        let embedding_id = EmbeddingId::new();

        store.put_embedding(embedding_id, memory_id, self.backend.name(), &vector, now)?;
        if let Some(mut memory) = store.get_memory(user, memory_id)? {
            memory.embedding_id = Some(embedding_id);
            store.update_memory(&memory)?;
        }

        self.cache.write().put(memory_id, vector);
        debug!(memory = %memory_id, provider = self.backend.name(), "memory indexed");
        Ok(embedding_id)
    }

    /// Embed `content` and persist it — [`Self::generate_embedding`]
    /// followed by [`Self::store_vector`].
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ProviderDisabled`] when the subsystem is off,
    /// [`EngramError::Provider`] on remote failure, or
    /// [`EngramError::Database`] if persisting the vector fails.
    pub async fn index_memory(
        &self,
        store: &MemoryStore,
        user: &UserId,
        memory_id: MemoryId,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<EmbeddingId> {
        let vector = self.generate_embedding(content).await?;
        self.store_vector(store, user, memory_id, vector, now)
    }

    /// Rank a user's memories against an already-computed query embedding.
    ///
    /// Scans a bounded most-recent-first batch of stored embeddings, skips
    /// vectors whose dimension does not match the query, keeps results
    /// above the configured similarity floor, and returns the top `limit`
    /// in descending order.
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ProviderDisabled`] when the subsystem is off,
    /// or [`EngramError::Database`] on store failures.
    pub fn rank(
        &self,
        store: &MemoryStore,
        user: &UserId,
        query_vector: &Embedding,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        if !self.enabled {
            return Err(EngramError::ProviderDisabled);
        }
        let candidates = store.recent_embedded_memories(user, self.scan_cap)?;

        let mut hits: Vec<VectorHit> = {
            let cache = self.cache.read();
            candidates
                .iter()
                .filter_map(|(memory, stored)| {
                    // Cached vector wins when present; `peek` keeps this a
                    // pure read under the shared lock.
                    let vector = cache.peek(&memory.id).unwrap_or(stored);
                    if vector.dimensions() != query_vector.dimensions() {
                        return None;
                    }
                    let similarity = query_vector.cosine_similarity(vector);
                    (similarity > self.min_similarity).then(|| VectorHit {
                        memory: memory.clone(),
                        similarity,
                    })
                })
                .collect()
        };

        // Backfill the cache outside the read lock.
        {
            let mut cache = self.cache.write();
            for (memory, stored) in candidates {
                if cache.peek(&memory.id).is_none() {
                    cache.put(memory.id, stored);
                }
            }
        }

        hits.sort_by_key(|hit| std::cmp::Reverse(OrderedFloat(hit.similarity)));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Embed `query` and rank — [`Self::generate_embedding`] followed by
    /// [`Self::rank`].
    ///
    /// # Errors
    ///
    /// Returns [`EngramError::ProviderDisabled`] when the subsystem is off;
    /// provider failures during query embedding propagate to the caller.
    pub async fn search(
        &self,
        store: &MemoryStore,
        user: &UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let query_vector = self.generate_embedding(query).await?;
        self.rank(store, user, &query_vector, limit)
    }

    /// Like [`Self::search`], but re-filtered by a caller-supplied
    /// similarity threshold. Requests `2 × limit` candidates first, then
    /// trims.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::search`].
    pub async fn search_with_threshold(
        &self,
        store: &MemoryStore,
        user: &UserId,
        query: &str,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<VectorHit>> {
        let mut hits = self.search(store, user, query, limit * 2).await?;
        hits.retain(|hit| hit.similarity >= min_similarity);
        hits.truncate(limit);
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::types::MemoryKind;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(&PersistenceConfig::default()).expect("open")
    }

    fn user() -> UserId {
        UserId::new("test_user")
    }

    fn local_index(min_similarity: f32) -> VectorIndex {
        VectorIndex::new(&EmbeddingConfig {
            min_similarity,
            ..EmbeddingConfig::default()
        })
    }

    fn insert_memory(store: &MemoryStore, content: &str) -> Memory {
        let memory = Memory::new(user(), content, MemoryKind::Fact, 5, 0.8, Utc::now());
        store.insert_memory(&memory).expect("insert");
        memory
    }

    #[test]
    fn hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.generate("I love hiking in Yosemite");
        let b = provider.generate("I love hiking in Yosemite");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_provider_output_is_unit_length() {
        let provider = HashEmbeddingProvider::new(64);
        let emb = provider.generate("some text with several tokens");
        let norm: f32 = emb.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "expected unit norm, got {norm}");
    }

    #[test]
    fn hash_provider_empty_text_is_zero_vector() {
        let provider = HashEmbeddingProvider::new(16);
        let emb = provider.generate("  …  ");
        assert!(emb.0.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn token_overlap_scores_higher_than_disjoint() {
        let provider = HashEmbeddingProvider::new(128);
        let query = provider.generate("hiking");
        let related = provider.generate("hiking boots");
        let unrelated = provider.generate("quarterly revenue report");

        assert!(query.cosine_similarity(&related) > query.cosine_similarity(&unrelated));
    }

    #[test]
    fn unknown_provider_falls_back_to_local() {
        let backend = EmbeddingBackend::select(&EmbeddingConfig {
            provider: "quantum".to_string(),
            ..EmbeddingConfig::default()
        });
        assert_eq!(backend.name(), "local");
    }

    #[test]
    fn backend_reports_configured_dimensions() {
        let backend = EmbeddingBackend::select(&EmbeddingConfig {
            dimensions: 128,
            ..EmbeddingConfig::default()
        });
        assert_eq!(backend.dimensions(), 128);
    }

    #[tokio::test]
    async fn disabled_subsystem_refuses_everything() {
        let index = VectorIndex::new(&EmbeddingConfig {
            enabled: false,
            ..EmbeddingConfig::default()
        });
        let store = store();
        let memory = insert_memory(&store, "anything");

        assert!(matches!(
            index.generate_embedding("x").await,
            Err(EngramError::ProviderDisabled)
        ));
        assert!(matches!(
            index
                .index_memory(&store, &user(), memory.id, "anything", Utc::now())
                .await,
            Err(EngramError::ProviderDisabled)
        ));
        assert!(matches!(
            index.search(&store, &user(), "x", 5).await,
            Err(EngramError::ProviderDisabled)
        ));
    }

    #[tokio::test]
    async fn index_persists_vector_and_stamps_memory() {
        let index = local_index(0.5);
        let store = store();
        let memory = insert_memory(&store, "I love hiking in Yosemite");

        let embedding_id = index
            .index_memory(&store, &user(), memory.id, &memory.content, Utc::now())
            .await
            .expect("index");

        let stored = store.get_embedding(memory.id).expect("get").expect("Some");
        assert_eq!(stored.dimensions(), 384);

        let reloaded = store
            .get_memory(&user(), memory.id)
            .expect("get")
            .expect("Some");
        assert_eq!(reloaded.embedding_id, Some(embedding_id));
    }

    #[tokio::test]
    async fn exact_match_is_found_and_unrelated_is_cut() {
        let index = local_index(0.5);
        let store = store();

        let target = insert_memory(&store, "hiking in Yosemite");
        let noise = insert_memory(&store, "quarterly revenue spreadsheet totals");
        for memory in [&target, &noise] {
            index
                .index_memory(&store, &user(), memory.id, &memory.content, Utc::now())
                .await
                .expect("index");
        }

        let hits = index
            .search(&store, &user(), "hiking in Yosemite", 10)
            .await
            .expect("search");

        assert_eq!(hits.len(), 1, "only the exact match clears the 0.5 floor");
        assert_eq!(hits[0].memory.id, target.id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn results_are_ranked_descending() {
        let index = local_index(0.05);
        let store = store();

        let close = insert_memory(&store, "hiking boots");
        let far = insert_memory(&store, "hiking boots and tent and map and compass");
        for memory in [&close, &far] {
            index
                .index_memory(&store, &user(), memory.id, &memory.content, Utc::now())
                .await
                .expect("index");
        }

        let hits = index
            .search(&store, &user(), "hiking boots", 10)
            .await
            .expect("search");

        assert!(hits.len() >= 2);
        assert!(hits[0].similarity >= hits[1].similarity);
        assert_eq!(hits[0].memory.id, close.id);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_skipped() {
        let index = local_index(0.0);
        let store = store();

        let indexed = insert_memory(&store, "hiking in Yosemite");
        index
            .index_memory(&store, &user(), indexed.id, &indexed.content, Utc::now())
            .await
            .expect("index");

        // A stale row from a different provider with another dimension.
        let foreign = insert_memory(&store, "hiking in Yosemite");
        store
            .put_embedding(
                EmbeddingId::new(),
                foreign.id,
                "other",
                &Embedding(vec![1.0, 0.0, 0.0]),
                Utc::now(),
            )
            .expect("put");

        let hits = index
            .search(&store, &user(), "hiking in Yosemite", 10)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, indexed.id);
    }

    #[tokio::test]
    async fn threshold_search_refilters() {
        let index = local_index(0.05);
        let store = store();

        let exact = insert_memory(&store, "morning run");
        let partial = insert_memory(&store, "morning run in the cold rain today");
        for memory in [&exact, &partial] {
            index
                .index_memory(&store, &user(), memory.id, &memory.content, Utc::now())
                .await
                .expect("index");
        }

        let strict = index
            .search_with_threshold(&store, &user(), "morning run", 10, 0.99)
            .await
            .expect("search");
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].memory.id, exact.id);
    }

    #[test]
    fn parse_float_array_rejects_junk() {
        assert!(parse_float_array(&serde_json::json!([0.1, 0.2])).is_ok());
        assert!(parse_float_array(&serde_json::json!("nope")).is_err());
        assert!(parse_float_array(&serde_json::json!([0.1, "x"])).is_err());
    }
}
