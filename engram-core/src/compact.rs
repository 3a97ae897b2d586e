//! Compaction — importance-weighted compression and eventual deletion.
//!
//! The compression pass folds groups of stale, low-importance memories
//! into one synthetic summary memory and destroys the originals' content
//! in place. The deletion pass later removes compressed memories that
//! have aged past the retention window. Both passes tolerate per-group
//! failures: errors are collected in the report and the run continues.
//!
//! Summary text comes from the chat collaborator when one is supplied;
//! any failure there falls back silently to the rule-based summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use engram_llm::{prompt, ChatClient};

use crate::config::CompactionConfig;
use crate::model::Memory;
use crate::store::MemoryStore;
use crate::types::{IdSet, MemoryKind, UserId};

/// Minimum group size before compression is worth a synthetic memory.
const MIN_GROUP_SIZE: usize = 3;

/// How many frequent terms the rule-based summary keeps.
const SUMMARY_TERMS: usize = 5;

/// Words ignored when picking the summary's frequent terms.
const SUMMARY_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "was", "were", "have", "had",
    "are", "but", "not", "you", "your", "them", "they", "she", "him", "his",
    "her", "its", "about", "from", "into", "when", "what", "where", "who",
];

/// Outcome of one compaction run. Always reports partial counts — a
/// failed group never aborts the whole run.
#[derive(Debug, Clone, Default)]
pub struct CompactionReport {
    /// Source memories marked compressed.
    pub compressed: usize,
    /// Memories permanently deleted.
    pub deleted: usize,
    /// One message per group or record that failed.
    pub errors: Vec<String>,
}

/// One planned unit of compression: a category bucket's eligible sources.
#[derive(Debug, Clone)]
pub struct CompressionGroup {
    /// Category the sources share.
    pub category: String,
    /// Stale, low-importance, never-compressed memories to fold.
    pub sources: Vec<Memory>,
}

/// The background compaction engine.
///
/// Intended to be driven by a single periodic ticker; overlapping runs
/// for the same user are the caller's responsibility to avoid.
#[derive(Debug, Clone)]
pub struct Compactor {
    config: CompactionConfig,
}

impl Compactor {
    /// Create a compactor with the given policy.
    #[must_use]
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Run one compression pass followed by one deletion pass.
    ///
    /// The two passes are not transactional with each other: memories
    /// compressed in this run only become deletion candidates on a later
    /// run, once they age past the retention window.
    pub async fn run(
        &self,
        store: &MemoryStore,
        chat: Option<&ChatClient>,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> CompactionReport {
        let mut report = CompactionReport::default();

        match self.plan(store, user, now) {
            Ok(groups) => {
                for group in groups {
                    let summary = self.summarize_group(chat, &group).await;
                    match self.apply(store, user, &group, &summary, now) {
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
                warn!(user = %user, error = %e, "stale-memory scan failed");
                report.errors.push(format!("scan: {e}"));
            }
        }

        self.delete_pass(store, user, now, &mut report);

        info!(
            user = %user,
            compressed = report.compressed,
            deleted = report.deleted,
            failures = report.errors.len(),
            "compaction run finished"
        );
        report
    }

    // ------------------------------------------------------------------
    // Compression pass, staged so callers can serialize store access
    // without holding a lock over the summarizer call
    // ------------------------------------------------------------------

    /// Select and group this run's compression work.
    ///
    /// Stale candidates (last accessed before the compress cutoff) are
    /// fetched ordered by ascending importance then age, capped at the
    /// batch limit, and bucketed by category; a bucket survives only if
    /// at least three of its members are expendable (importance at or
    /// below the keep threshold) and not already compressed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngramError::Database`] if the scan fails.
    pub fn plan(
        &self,
        store: &MemoryStore,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> crate::error::Result<Vec<CompressionGroup>> {
        let cutoff = now - Duration::days(self.config.compress_after_days);
        let candidates = store.stale_memories(user, cutoff, self.config.max_batch)?;

        let mut groups = Vec::new();
        for (category, group) in group_by_category(candidates) {
            if group.len() < MIN_GROUP_SIZE {
                continue;
            }
            let sources: Vec<Memory> = group
                .into_iter()
                .filter(|m| m.importance <= self.config.min_importance_to_keep)
                .filter(|m| !m.is_compressed)
                .collect();
            if sources.len() < MIN_GROUP_SIZE {
                continue;
            }
            groups.push(CompressionGroup { category, sources });
        }
        Ok(groups)
    }

    /// Produce the group summary, preferring the chat collaborator and
    /// falling back to the rule-based text on any failure. Touches no
    /// store state.
    pub async fn summarize_group(
        &self,
        chat: Option<&ChatClient>,
        group: &CompressionGroup,
    ) -> String {
        let sources: Vec<&Memory> = group.sources.iter().collect();
        if let Some(chat) = chat {
            let contents: Vec<&str> = sources.iter().map(|m| m.content.as_str()).collect();
            let (system, user_prompt) = prompt::summarize_memories(&contents);
            match chat.simple_chat(&system, &user_prompt).await {
                Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
                Ok(_) => debug!("chat summarizer returned empty text, using rule-based summary"),
                Err(e) => debug!(error = %e, "chat summarizer failed, using rule-based summary"),
            }
        }
        rule_based_summary(&sources)
    }

    /// Write one planned group: insert the synthetic memory, then mark
    /// every source compressed with its content replaced by `summary`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngramError::Database`] if any write fails; sources
    /// already rewritten stay rewritten (no rollback).
    pub fn apply(
        &self,
        store: &MemoryStore,
        user: &UserId,
        group: &CompressionGroup,
        summary: &str,
        now: DateTime<Utc>,
    ) -> crate::error::Result<usize> {
        let mut entity_ids = IdSet::new();
        let mut compressed_from = IdSet::new();
        let mut max_importance = 1;
        for memory in &group.sources {
            entity_ids.union(&memory.entity_ids);
            compressed_from.insert(memory.id);
            max_importance = max_importance.max(memory.importance);
        }

        let mut synthetic = Memory::new(
            user.clone(),
            summary,
            MemoryKind::Observation,
            max_importance.saturating_sub(1).max(1),
            1.0,
            now,
        )
        .with_category(group.category.clone())
        .with_entities(entity_ids);
        synthetic.summary = summary.to_string();
        synthetic.compressed_from = compressed_from;
        store.insert_memory(&synthetic)?;

        // Destructive by design: the sources keep their rows but lose
        // their original wording forever.
        let mut count = 0;
        for memory in &group.sources {
            let mut memory = memory.clone();
            memory.mark_compressed(summary);
            store.update_memory(&memory)?;
            count += 1;
        }

        debug!(
            category = %group.category,
            folded = count,
            synthetic = %synthetic.id,
            "group compressed"
        );
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Deletion pass
    // ------------------------------------------------------------------

    /// Delete compressed memories older than the retention cutoff with
    /// importance at or below the deletion threshold. Failures accumulate
    /// in the report.
    pub fn delete_pass(
        &self,
        store: &MemoryStore,
        user: &UserId,
        now: DateTime<Utc>,
        report: &mut CompactionReport,
    ) {
        let cutoff = now - Duration::days(self.config.delete_after_days);
        let deletable = match store.deletable_memories(
            user,
            cutoff,
            self.config.delete_max_importance,
        ) {
            Ok(deletable) => deletable,
            Err(e) => {
                warn!(user = %user, error = %e, "deletable-memory scan failed");
                report.errors.push(format!("delete scan: {e}"));
                return;
            }
        };

        for memory in deletable {
            match store.delete_memory(user, memory.id) {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(memory = %memory.id, error = %e, "deletion failed");
                    report.errors.push(format!("delete {}: {e}", memory.id));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping & rule-based summary
// ---------------------------------------------------------------------------

/// Bucket memories by category, preserving the store's ordering within
/// each bucket.
#[must_use]
pub fn group_by_category(memories: Vec<Memory>) -> BTreeMap<String, Vec<Memory>> {
    let mut groups: BTreeMap<String, Vec<Memory>> = BTreeMap::new();
    for memory in memories {
        let category = if memory.category.is_empty() {
            "general".to_string()
        } else {
            memory.category.clone()
        };
        groups.entry(category).or_default().push(memory);
    }
    groups
}

/// Offline summary: counts by memory kind plus the most frequent
/// non-stopword terms across the batch.
#[must_use]
pub fn rule_based_summary(sources: &[&Memory]) -> String {
    let mut kind_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for memory in sources {
        *kind_counts.entry(memory.kind.as_str()).or_default() += 1;
    }
    let kinds = kind_counts
        .iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect::<Vec<_>>()
        .join(", ");

    // Frequency count with first-seen order as the tie-breaker.
    let mut order: Vec<String> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for memory in sources {
        for token in memory
            .content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .filter(|t| !SUMMARY_STOPWORDS.contains(t))
        {
            if !counts.contains_key(token) {
                order.push(token.to_string());
            }
            *counts.entry(token.to_string()).or_default() += 1;
        }
    }
    order.sort_by_key(|t| std::cmp::Reverse(counts.get(t).copied().unwrap_or(0)));
    order.truncate(SUMMARY_TERMS);

    if order.is_empty() {
        format!("Compressed {} memories ({kinds}).", sources.len())
    } else {
        format!(
            "Compressed {} memories ({kinds}) about: {}.",
            sources.len(),
            order.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::types::{EntityId, MemoryId};

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(&PersistenceConfig::default()).expect("open")
    }

    fn user() -> UserId {
        UserId::new("test_user")
    }

    fn compactor() -> Compactor {
        Compactor::new(CompactionConfig::default())
    }

    fn stale_memory(
        store: &MemoryStore,
        content: &str,
        category: &str,
        importance: u8,
        now: DateTime<Utc>,
    ) -> Memory {
        let mut memory = Memory::new(user(), content, MemoryKind::Fact, importance, 0.8, now)
            .with_category(category);
        memory.last_accessed = now - Duration::days(120);
        memory.created_at = now - Duration::days(150);
        let mut ids = IdSet::new();
        ids.insert(EntityId::new());
        memory.entity_ids = ids;
        store.insert_memory(&memory).expect("insert");
        memory
    }

    #[test]
    fn grouping_by_category_splits_buckets() {
        let now = Utc::now();
        let memories = vec![
            Memory::new(user(), "a", MemoryKind::Fact, 5, 0.8, now).with_category("work"),
            Memory::new(user(), "b", MemoryKind::Fact, 5, 0.8, now).with_category("work"),
            Memory::new(user(), "c", MemoryKind::Fact, 5, 0.8, now).with_category("personal"),
        ];

        let groups = group_by_category(memories);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("work").map(Vec::len), Some(2));
        assert_eq!(groups.get("personal").map(Vec::len), Some(1));
    }

    #[test]
    fn rule_based_summary_counts_kinds_and_terms() {
        let now = Utc::now();
        let a = Memory::new(user(), "hiking in Yosemite valley", MemoryKind::Fact, 2, 0.8, now);
        let b = Memory::new(user(), "hiking boots purchase", MemoryKind::Preference, 2, 0.8, now);
        let c = Memory::new(user(), "hiking trail maps", MemoryKind::Fact, 2, 0.8, now);

        let summary = rule_based_summary(&[&a, &b, &c]);
        assert!(summary.contains("3 memories"), "summary: {summary}");
        assert!(summary.contains("2 fact"), "summary: {summary}");
        assert!(summary.contains("1 preference"), "summary: {summary}");
        assert!(
            summary.contains("hiking"),
            "most frequent term should lead: {summary}"
        );
    }

    #[tokio::test]
    async fn compression_folds_stale_low_importance_groups() {
        let store = store();
        let now = Utc::now();

        let sources: Vec<Memory> = (0..3)
            .map(|i| stale_memory(&store, &format!("old hiking note {i}"), "general", 2, now))
            .collect();

        let report = compactor().run(&store, None, &user(), now).await;
        assert_eq!(report.compressed, 3);
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);

        // Every source lost its original wording.
        for source in &sources {
            let reloaded = store
                .get_memory(&user(), source.id)
                .expect("get")
                .expect("Some");
            assert!(reloaded.is_compressed);
            assert!(!reloaded.content.contains("old hiking note"));
            assert_eq!(reloaded.content, reloaded.summary);
        }

        // One synthetic memory carries the union of links and provenance.
        let synthetic = store
            .search_memories(&user(), "Compressed 3 memories", 10)
            .expect("search")
            .into_iter()
            .find(|m| !m.is_compressed)
            .expect("synthetic memory");
        assert_eq!(synthetic.compressed_from.len(), 3);
        assert_eq!(synthetic.entity_ids.len(), 3);
        assert_eq!(synthetic.importance, 1, "max(2) - 1");
        for source in &sources {
            assert!(synthetic.compressed_from.contains(&source.id));
        }
    }

    #[tokio::test]
    async fn compressed_memories_never_recompress() {
        let store = store();
        let now = Utc::now();
        for i in 0..3 {
            stale_memory(&store, &format!("note {i}"), "general", 2, now);
        }

        let first = compactor().run(&store, None, &user(), now).await;
        assert_eq!(first.compressed, 3);

        // Second run sees the compressed sources plus the fresh synthetic
        // memory; nothing is eligible again.
        let second = compactor().run(&store, None, &user(), now).await;
        assert_eq!(second.compressed, 0);
    }

    #[tokio::test]
    async fn important_and_fresh_memories_survive() {
        let store = store();
        let now = Utc::now();

        // Stale but important.
        for i in 0..3 {
            stale_memory(&store, &format!("important {i}"), "general", 8, now);
        }
        // Low importance but fresh.
        for i in 0..3 {
            let memory =
                Memory::new(user(), format!("fresh {i}"), MemoryKind::Fact, 2, 0.8, now);
            store.insert_memory(&memory).expect("insert");
        }

        let report = compactor().run(&store, None, &user(), now).await;
        assert_eq!(report.compressed, 0);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn small_groups_are_left_alone() {
        let store = store();
        let now = Utc::now();
        stale_memory(&store, "lonely one", "general", 2, now);
        stale_memory(&store, "lonely two", "general", 2, now);

        let report = compactor().run(&store, None, &user(), now).await;
        assert_eq!(report.compressed, 0);
    }

    #[tokio::test]
    async fn deletion_requires_all_three_conditions() {
        let store = store();
        let now = Utc::now();
        let ancient = now - Duration::days(400);

        let mut deletable = Memory::new(user(), "gone", MemoryKind::Fact, 2, 0.8, now);
        deletable.mark_compressed("summary");
        deletable.created_at = ancient;
        deletable.last_accessed = now; // freshness is irrelevant to deletion
        store.insert_memory(&deletable).expect("insert");

        let mut uncompressed = Memory::new(user(), "stays", MemoryKind::Fact, 2, 0.8, now);
        uncompressed.created_at = ancient;
        store.insert_memory(&uncompressed).expect("insert");

        let mut important = Memory::new(user(), "stays too", MemoryKind::Fact, 9, 0.8, now);
        important.mark_compressed("summary");
        important.created_at = ancient;
        store.insert_memory(&important).expect("insert");

        let mut young = Memory::new(user(), "also stays", MemoryKind::Fact, 2, 0.8, now);
        young.mark_compressed("summary");
        young.created_at = now - Duration::days(100);
        store.insert_memory(&young).expect("insert");

        let report = compactor().run(&store, None, &user(), now).await;
        assert_eq!(report.deleted, 1);
        assert!(store
            .get_memory(&user(), deletable.id)
            .expect("get")
            .is_none());
        for survivor in [uncompressed.id, important.id, young.id] {
            assert!(store.get_memory(&user(), survivor).expect("get").is_some());
        }
    }

    #[tokio::test]
    async fn survivors_survive_repeated_runs() {
        let store = store();
        let now = Utc::now();

        let mut survivor = Memory::new(user(), "keeper", MemoryKind::Fact, 5, 0.8, now);
        survivor.mark_compressed("summary");
        survivor.created_at = now - Duration::days(400);
        store.insert_memory(&survivor).expect("insert");

        for _ in 0..5 {
            let report = compactor().run(&store, None, &user(), now).await;
            assert_eq!(report.deleted, 0);
        }
        assert!(store
            .get_memory(&user(), survivor.id)
            .expect("get")
            .is_some());
    }

    #[test]
    fn empty_summary_sources_still_format() {
        let now = Utc::now();
        let a = Memory::new(user(), "….", MemoryKind::Fact, 2, 0.8, now);
        let summary = rule_based_summary(&[&a]);
        assert!(summary.contains("1 memories") || summary.contains("1 fact"));
    }

    #[test]
    fn compressed_from_tracks_real_ids() {
        let mut set: IdSet<MemoryId> = IdSet::new();
        let id = MemoryId::new();
        set.insert(id);
        let text = set.to_delimited();
        assert!(IdSet::<MemoryId>::from_delimited(&text).contains(&id));
    }
}
