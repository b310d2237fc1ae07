//! In-memory index implementations for tests and embedded use.
//!
//! [`InMemoryVectorIndex`] is a brute-force cosine scan. [`InMemoryLexicalIndex`]
//! scores with Okapi BM25 (`k1 = 1.2`, `b = 0.75`). Both keep their entries
//! in a `BTreeMap` keyed by chunk id behind a `parking_lot::RwLock`.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, IndexEntry};
use crate::text::tokenize;

use super::{sort_hits, ChunkHit, LexicalIndex, VectorIndex};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// In-memory vector index with a fixed dimensionality.
pub struct InMemoryVectorIndex {
    dims: usize,
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dims) {
            bail!(
                "embedding for chunk {} has {} dimensions, index expects {}",
                bad.chunk.id,
                bad.embedding.len(),
                self.dims
            );
        }
        let mut stored = self.entries.write();
        for e in entries {
            stored.insert(e.chunk.id.clone(), e.clone());
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        if query.len() != self.dims {
            bail!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dims
            );
        }
        let stored = self.entries.read();
        let mut hits: Vec<ChunkHit> = stored
            .values()
            .map(|e| ChunkHit {
                chunk: e.chunk.clone(),
                score: cosine_similarity(query, &e.embedding) as f64,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}

struct LexicalDoc {
    chunk: Chunk,
    term_freq: HashMap<String, usize>,
    length: usize,
}

#[derive(Default)]
struct LexicalState {
    docs: BTreeMap<String, LexicalDoc>,
    doc_freq: HashMap<String, usize>,
    total_length: usize,
}

impl LexicalState {
    fn remove(&mut self, chunk_id: &str) {
        if let Some(old) = self.docs.remove(chunk_id) {
            self.total_length -= old.length;
            for term in old.term_freq.keys() {
                if let Some(df) = self.doc_freq.get_mut(term) {
                    *df -= 1;
                    if *df == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }
    }

    fn add(&mut self, chunk: &Chunk) {
        let tokens = tokenize(&chunk.text);
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for t in &tokens {
            *term_freq.entry(t.clone()).or_insert(0) += 1;
        }
        for term in term_freq.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += tokens.len();
        self.docs.insert(
            chunk.id.clone(),
            LexicalDoc {
                chunk: chunk.clone(),
                term_freq,
                length: tokens.len(),
            },
        );
    }
}

/// In-memory BM25 keyword index.
#[derive(Default)]
pub struct InMemoryLexicalIndex {
    state: RwLock<LexicalState>,
}

impl InMemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexicalIndex {
    async fn insert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write();
        for c in chunks {
            state.remove(&c.id);
            state.add(c);
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let state = self.state.read();
        let n = state.docs.len() as f64;
        if n == 0.0 || terms.is_empty() {
            return Ok(Vec::new());
        }
        let avg_len = (state.total_length as f64 / n).max(1.0);

        let mut hits = Vec::new();
        for doc in state.docs.values() {
            let mut score = 0.0;
            let mut matched = false;
            for term in &terms {
                let Some(&tf) = doc.term_freq.get(term) else {
                    continue;
                };
                matched = true;
                let df = state.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                let tf = tf as f64;
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * doc.length as f64 / avg_len);
                score += idf * tf * (BM25_K1 + 1.0) / (tf + norm);
            }
            if matched {
                hits.push(ChunkHit {
                    chunk: doc.chunk.clone(),
                    score,
                });
            }
        }
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().docs.len())
    }
}

/// Descending score, then ascending chunk id.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_document;
    use crate::models::Document;

    fn chunk(source: &str, text: &str) -> Chunk {
        chunk_document(&Document::new(source, text), 1000, 0)
            .unwrap()
            .remove(0)
    }

    fn entry(source: &str, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: chunk(source, text),
            embedding,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let index = InMemoryVectorIndex::new(2);
        index
            .insert(&[
                entry("a", "alpha", vec![1.0, 0.0]),
                entry("b", "beta", vec![0.0, 1.0]),
                entry("c", "gamma", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "alpha");
        assert_eq!(hits[1].chunk.text, "gamma");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_vector_insert_rejects_wrong_dims() {
        let index = InMemoryVectorIndex::new(3);
        let err = index
            .insert(&[entry("a", "alpha", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimensions"));
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_vector_insert_replaces_same_chunk() {
        let index = InMemoryVectorIndex::new(2);
        index.insert(&[entry("a", "alpha", vec![1.0, 0.0])]).await.unwrap();
        index.insert(&[entry("a", "alpha", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let hits = index.search(&[0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_bm25_prefers_rarer_terms() {
        let index = InMemoryLexicalIndex::new();
        index
            .insert(&[
                chunk("a", "rust rust ownership"),
                chunk("b", "rust borrowing"),
                chunk("c", "python generators"),
            ])
            .await
            .unwrap();

        let hits = index.search("ownership rust", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source, "a");

        assert!(index.search("haskell", 10).await.unwrap().is_empty());
        assert!(index.search("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_reinsert_updates_document_frequency() {
        let index = InMemoryLexicalIndex::new();
        index.insert(&[chunk("a", "tokio")]).await.unwrap();
        index.insert(&[chunk("a", "tokio")]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.state.read().doc_freq.get("tokio"), Some(&1));
    }
}
