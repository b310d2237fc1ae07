//! Index abstractions for ragchat.
//!
//! The [`VectorIndex`] and [`LexicalIndex`] traits define the storage
//! operations the retrieval pipeline needs, enabling pluggable backends
//! (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, IndexEntry};

/// A chunk returned from one search list, with that list's raw score
/// (cosine similarity or BM25). Hits are returned best first.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Order hits best first, breaking score ties by chunk id.
pub fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Nearest-neighbour index over chunk embeddings.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Store entries, replacing any with the same chunk id |
/// | [`search`](VectorIndex::search) | Cosine similarity search |
/// | [`len`](VectorIndex::len) | Number of stored entries |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store entries. Every embedding must have the index's dimensionality;
    /// an entry whose chunk id already exists replaces the old one.
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Return up to `limit` hits ordered by descending cosine similarity,
    /// ties broken by chunk id.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkHit>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Term-based index over chunk text.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Store chunks, replacing any with the same chunk id.
    async fn insert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `limit` chunks sharing at least one term with `query`,
    /// best match first, ties broken by chunk id.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    async fn len(&self) -> Result<usize>;
}
