//! engram benchmark suite.
//!
//! Rough performance expectations for interactive use:
//!   extraction_single_turn ......... < 1ms
//!   embedding_generation_local ..... < 200μs
//!   cosine_scan_500_memories ....... < 5ms
//!   substring_search_1000_memories . < 5ms

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use engram_core::config::{EmbeddingConfig, ExtractionConfig, PersistenceConfig};
use engram_core::extract::Extractor;
use engram_core::model::Memory;
use engram_core::store::MemoryStore;
use engram_core::types::{MemoryKind, UserId};
use engram_core::vector::{HashEmbeddingProvider, VectorIndex};

const SAMPLE_TURN: &str = "I met Sarah at Blue Bottle Cafe yesterday. She works at Google. \
     I love hiking in Yosemite and I plan to visit Lisbon in October.";

fn user() -> UserId {
    UserId::new("bench_user")
}

fn seeded_store(count: usize) -> MemoryStore {
    let store = MemoryStore::open_in_memory(&PersistenceConfig::default()).expect("open");
    let now = Utc::now();
    for i in 0..count {
        let memory = Memory::new(
            user(),
            format!("Memory number {i} about topic {}", i % 17),
            MemoryKind::Fact,
            ((i % 10) + 1) as u8,
            0.8,
            now,
        );
        store.insert_memory(&memory).expect("insert");
    }
    store
}

/// Benchmark: one conversational turn through the pattern battery.
fn bench_extraction(c: &mut Criterion) {
    let extractor = Extractor::new(ExtractionConfig::default());

    c.bench_function("extraction_single_turn", |b| {
        b.iter(|| {
            let result = extractor.extract(black_box(SAMPLE_TURN));
            black_box(result);
        });
    });
}

/// Benchmark: deterministic local embedding of a typical snippet.
fn bench_embedding(c: &mut Criterion) {
    let provider = HashEmbeddingProvider::new(384);

    c.bench_function("embedding_generation_local", |b| {
        b.iter(|| {
            let embedding = provider.generate(black_box(SAMPLE_TURN));
            black_box(embedding);
        });
    });
}

/// Benchmark: bruteforce cosine scan over a full working set.
fn bench_cosine_scan(c: &mut Criterion) {
    let store = seeded_store(500);
    let index = VectorIndex::new(&EmbeddingConfig::default());
    let provider = HashEmbeddingProvider::new(384);
    let now = Utc::now();

    // Index every seeded memory up front.
    let memories = store
        .search_memories(&user(), "Memory number", 500)
        .expect("seeded");
    for memory in &memories {
        let vector = provider.generate(&memory.content);
        index
            .store_vector(&store, &user(), memory.id, vector, now)
            .expect("index");
    }

    let query = provider.generate("topic 7 memories");
    c.bench_function("cosine_scan_500_memories", |b| {
        b.iter(|| {
            let hits = index
                .rank(black_box(&store), &user(), black_box(&query), 10)
                .expect("rank");
            black_box(hits);
        });
    });
}

/// Benchmark: LIKE substring search over a larger store.
fn bench_substring_search(c: &mut Criterion) {
    let store = seeded_store(1000);

    c.bench_function("substring_search_1000_memories", |b| {
        b.iter(|| {
            let hits = store
                .search_memories(&user(), black_box("topic 7"), 10)
                .expect("search");
            black_box(hits);
        });
    });
}

criterion_group!(
    benches,
    bench_extraction,
    bench_embedding,
    bench_cosine_scan,
    bench_substring_search,
);
criterion_main!(benches);
