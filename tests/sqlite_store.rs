//! Tests for the SQLite index and conversation memory against a real
//! database file in a temp directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use ragchat::sqlite_memory::SqliteConversationMemory;
use ragchat::sqlite_store::SqliteIndex;
use ragchat::{db, migrate};
use ragchat_core::chunk::chunk_document;
use ragchat_core::embedding::HashEmbedder;
use ragchat_core::memory::{ConversationMemory, MemoryWindow};
use ragchat_core::models::{Chunk, Document, IndexEntry, MemoryTurn, Provenance};
use ragchat_core::pipeline::{BuildOptions, IndexBuilder};
use ragchat_core::retrieve::{RetrievalMode, Retriever, RetrieverParams};
use ragchat_core::store::{LexicalIndex, VectorIndex};
use sqlx::SqlitePool;
use tempfile::TempDir;

const DIMS: usize = 64;

async fn open_pool(tmp: &TempDir) -> SqlitePool {
    let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    pool
}

fn chunks_of(source: &str, text: &str) -> Vec<Chunk> {
    chunk_document(&Document::new(source, text), 500, 0).unwrap()
}

fn entries_of(embedder: &HashEmbedder, chunks: &[Chunk]) -> Vec<IndexEntry> {
    chunks
        .iter()
        .map(|c| IndexEntry {
            chunk: c.clone(),
            embedding: embedder.embed_one(&c.text),
            metadata: BTreeMap::new(),
        })
        .collect()
}

async fn seeded_index(tmp: &TempDir) -> SqliteIndex {
    let pool = open_pool(tmp).await;
    let index = SqliteIndex::new(pool, DIMS);
    let embedder = HashEmbedder::new(DIMS);

    let mut chunks = chunks_of("rust.md", "Rust ownership and borrowing rules");
    chunks.extend(chunks_of("ops.md", "Kubernetes pods and Docker images"));
    chunks.extend(chunks_of("ml.md", "Gradient descent trains neural networks"));

    VectorIndex::insert(&index, &entries_of(&embedder, &chunks))
        .await
        .unwrap();
    LexicalIndex::insert(&index, &chunks).await.unwrap();
    index
}

// ─── Vector index ───────────────────────────────────────────────────

#[tokio::test]
async fn test_vector_search_orders_by_similarity() {
    let tmp = TempDir::new().unwrap();
    let index = seeded_index(&tmp).await;
    let embedder = HashEmbedder::new(DIMS);

    let hits = VectorIndex::search(&index, &embedder.embed_one("docker kubernetes"), 3)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk.source, "ops.md");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(VectorIndex::len(&index).await.unwrap(), 3);
    assert_eq!(index.document_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_vector_search_limit() {
    let tmp = TempDir::new().unwrap();
    let index = seeded_index(&tmp).await;
    let embedder = HashEmbedder::new(DIMS);

    let hits = VectorIndex::search(&index, &embedder.embed_one("rust"), 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_vector_dimension_mismatch_rejected() {
    let tmp = TempDir::new().unwrap();
    let index = SqliteIndex::new(open_pool(&tmp).await, DIMS);
    let wrong = HashEmbedder::new(DIMS / 2);
    let chunks = chunks_of("a.md", "some text");

    assert!(VectorIndex::insert(&index, &entries_of(&wrong, &chunks))
        .await
        .is_err());
    assert!(VectorIndex::search(&index, &wrong.embed_one("text"), 5)
        .await
        .is_err());
    assert_eq!(VectorIndex::len(&index).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reinsert_replaces_entry() {
    let tmp = TempDir::new().unwrap();
    let index = SqliteIndex::new(open_pool(&tmp).await, DIMS);
    let embedder = HashEmbedder::new(DIMS);

    let chunks = chunks_of("a.md", "first version of the text");
    VectorIndex::insert(&index, &entries_of(&embedder, &chunks))
        .await
        .unwrap();

    let mut updated = chunks.clone();
    updated[0].text = "second version of the text".to_string();
    VectorIndex::insert(&index, &entries_of(&embedder, &updated))
        .await
        .unwrap();
    LexicalIndex::insert(&index, &updated).await.unwrap();
    LexicalIndex::insert(&index, &updated).await.unwrap();

    assert_eq!(VectorIndex::len(&index).await.unwrap(), 1);
    assert_eq!(LexicalIndex::len(&index).await.unwrap(), 1);
    let hits = VectorIndex::search(&index, &embedder.embed_one("second"), 5)
        .await
        .unwrap();
    assert_eq!(hits[0].chunk.text, "second version of the text");
}

#[tokio::test]
async fn test_ensure_embedding_rejects_dimension_change() {
    let tmp = TempDir::new().unwrap();
    let index = SqliteIndex::new(open_pool(&tmp).await, DIMS);

    index.ensure_embedding("hash-v1", DIMS).await.unwrap();
    assert_eq!(
        index.embedding_meta().await.unwrap(),
        Some(("hash-v1".to_string(), DIMS))
    );

    // Same dims, different model: allowed with a warning.
    index.ensure_embedding("other-model", DIMS).await.unwrap();

    let err = index.ensure_embedding("hash-v1", DIMS * 2).await.unwrap_err();
    assert!(err.to_string().contains("--force"));
}

// ─── Lexical index ──────────────────────────────────────────────────

#[tokio::test]
async fn test_lexical_search_matches_terms() {
    let tmp = TempDir::new().unwrap();
    let index = seeded_index(&tmp).await;

    let hits = LexicalIndex::search(&index, "ownership", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.source, "rust.md");

    let hits = LexicalIndex::search(&index, "no-such-term-anywhere", 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_lexical_search_tolerates_fts_syntax() {
    let tmp = TempDir::new().unwrap();
    let index = seeded_index(&tmp).await;

    for query in ["\"docker", "pods AND (", "NEAR(kubernetes", "*", "-docker:images"] {
        let result = LexicalIndex::search(&index, query, 10).await;
        assert!(result.is_ok(), "query {:?} failed: {:?}", query, result.err());
    }

    let hits = LexicalIndex::search(&index, "pods AND (", 10).await.unwrap();
    assert_eq!(hits[0].chunk.source, "ops.md");
}

#[tokio::test]
async fn test_lexical_search_blank_query() {
    let tmp = TempDir::new().unwrap();
    let index = seeded_index(&tmp).await;
    assert!(LexicalIndex::search(&index, "  ...  ", 10)
        .await
        .unwrap()
        .is_empty());
}

// ─── Build and retrieve ─────────────────────────────────────────────

#[tokio::test]
async fn test_build_then_hybrid_retrieve() {
    let tmp = TempDir::new().unwrap();
    let pool = open_pool(&tmp).await;
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let index = Arc::new(SqliteIndex::new(pool, DIMS));

    let builder = IndexBuilder::new(
        embedder.clone(),
        index.clone(),
        BuildOptions {
            chunk_size: 200,
            chunk_overlap: 20,
            batch_size: 4,
            workers: 2,
        },
    )
    .unwrap()
    .with_lexical(index.clone());

    let report = builder
        .build(vec![
            Document::new("a.md", "Tokio is an asynchronous runtime for Rust."),
            Document::new("b.md", "SQLite stores the whole database in one file."),
            Document::new("empty.md", ""),
        ])
        .await;
    assert_eq!(report.documents_indexed, 2);
    assert_eq!(report.documents_empty, 1);
    assert!(report.failures.is_empty());

    let retriever = Retriever::new(embedder, index.clone(), RetrieverParams::default())
        .with_lexical(index);

    let results = retriever
        .retrieve("sqlite database file", 2, RetrievalMode::Hybrid)
        .await
        .unwrap();
    assert_eq!(results[0].chunk.source, "b.md");
    assert_eq!(results[0].provenance, Provenance::Both);
    assert_eq!(results[0].vector_rank, Some(1));
    assert_eq!(results[0].lexical_rank, Some(1));
}

// ─── Conversation memory ────────────────────────────────────────────

#[tokio::test]
async fn test_memory_window_evicts_oldest() {
    let tmp = TempDir::new().unwrap();
    let memory = SqliteConversationMemory::new(
        open_pool(&tmp).await,
        MemoryWindow {
            max_turns: 2,
            summarize: false,
        },
    );

    for i in 1..=3 {
        memory
            .append("s", MemoryTurn::new(format!("q{}", i), format!("a{}", i)))
            .await
            .unwrap();
    }

    let turns = memory.read("s").await.unwrap();
    let queries: Vec<&str> = turns.iter().map(|t| t.query.as_str()).collect();
    assert_eq!(queries, vec!["q2", "q3"]);
    assert_eq!(memory.summary("s").await.unwrap(), None);
    assert!(memory.read("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_summary_persists_across_connections() {
    let tmp = TempDir::new().unwrap();
    let window = MemoryWindow {
        max_turns: 1,
        summarize: true,
    };

    {
        let pool = open_pool(&tmp).await;
        let memory = SqliteConversationMemory::new(pool.clone(), window);
        memory
            .append("s", MemoryTurn::new("what is rust", "a language"))
            .await
            .unwrap();
        memory
            .append("s", MemoryTurn::new("and tokio", "a runtime"))
            .await
            .unwrap();
        pool.close().await;
    }

    let memory = SqliteConversationMemory::new(open_pool(&tmp).await, window);
    let turns = memory.read("s").await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].query, "and tokio");
    let summary = memory.summary("s").await.unwrap().unwrap();
    assert!(summary.contains("what is rust"));
}

#[tokio::test]
async fn test_memory_clear_only_affects_session() {
    let tmp = TempDir::new().unwrap();
    let memory = SqliteConversationMemory::new(
        open_pool(&tmp).await,
        MemoryWindow {
            max_turns: 1,
            summarize: true,
        },
    );

    for session in ["a", "b"] {
        memory.append(session, MemoryTurn::new("q1", "r1")).await.unwrap();
        memory.append(session, MemoryTurn::new("q2", "r2")).await.unwrap();
    }

    memory.clear("a").await.unwrap();
    assert!(memory.read("a").await.unwrap().is_empty());
    assert_eq!(memory.summary("a").await.unwrap(), None);
    assert_eq!(memory.read("b").await.unwrap().len(), 1);
    assert!(memory.summary("b").await.unwrap().is_some());
}
