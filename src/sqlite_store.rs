//! SQLite-backed [`VectorIndex`] and [`LexicalIndex`] implementation.
//!
//! One database file holds both indexes:
//!
//! - `chunks` stores chunk text and position, shared by both indexes.
//! - `chunk_vectors` stores embeddings as little-endian f32 BLOBs and is
//!   searched by a brute-force cosine scan.
//! - `chunks_fts` is an FTS5 table ranked with `bm25()`.
//! - `index_meta` records the embedding model and dimensionality the index
//!   was built with, so a query embedder of a different size is rejected.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use ragchat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragchat_core::models::{Chunk, IndexEntry};
use ragchat_core::store::{sort_hits, ChunkHit, LexicalIndex, VectorIndex};
use ragchat_core::text::tokenize;

/// SQLite implementation of both index traits.
pub struct SqliteIndex {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record the embedding model and dimensionality on first use and
    /// reject a mismatch afterwards.
    pub async fn ensure_embedding(&self, model: &str, dims: usize) -> Result<()> {
        let stored = self.embedding_meta().await?;
        match stored {
            Some((stored_model, stored_dims)) => {
                if stored_dims != dims {
                    bail!(
                        "index was built with {} ({} dims) but the configured embedder is {} ({} dims); \
                         rebuild with `ragchat build --force`",
                        stored_model,
                        stored_dims,
                        model,
                        dims
                    );
                }
                if stored_model != model {
                    tracing::warn!(
                        index_model = %stored_model,
                        model,
                        "embedding model differs from the one the index was built with"
                    );
                }
            }
            None => {
                let mut tx = self.pool.begin().await?;
                for (key, value) in [("embedding_model", model.to_string()), ("embedding_dims", dims.to_string())] {
                    sqlx::query(
                        "INSERT INTO index_meta (key, value) VALUES (?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// The `(model, dims)` pair the index was built with, if recorded.
    pub async fn embedding_meta(&self) -> Result<Option<(String, usize)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM index_meta WHERE key IN ('embedding_model', 'embedding_dims')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut model = None;
        let mut dims = None;
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                "embedding_model" => model = Some(value),
                "embedding_dims" => dims = Some(value.parse::<usize>()?),
                _ => {}
            }
        }
        Ok(model.zip(dims))
    }

    /// Number of distinct documents with at least one chunk.
    pub async fn document_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

async fn upsert_chunk(tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, source, chunk_index, overlap, text, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            document_id = excluded.document_id,
            source = excluded.source,
            chunk_index = excluded.chunk_index,
            overlap = excluded.overlap,
            text = excluded.text,
            hash = excluded.hash
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(&chunk.source)
    .bind(chunk.chunk_index as i64)
    .bind(chunk.overlap as i64)
    .bind(&chunk.text)
    .bind(&chunk.hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let chunk_index: i64 = row.get("chunk_index");
    let overlap: i64 = row.get("overlap");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        source: row.get("source"),
        chunk_index: chunk_index as usize,
        text: row.get("text"),
        overlap: overlap as usize,
        hash: row.get("hash"),
    }
}

/// Build an FTS5 query from free text: each distinct term quoted and
/// OR-joined. Returns `None` when the text has no terms.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in tokenize(text) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, entries: &[IndexEntry]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dims) {
            bail!(
                "embedding for chunk {} has {} dimensions, index expects {}",
                bad.chunk.id,
                bad.embedding.len(),
                self.dims
            );
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO documents (id, source, metadata_json, indexed_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    metadata_json = excluded.metadata_json,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&entry.chunk.document_id)
            .bind(&entry.chunk.source)
            .bind(&metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            upsert_chunk(&mut tx, &entry.chunk).await?;

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
                VALUES (?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&entry.chunk.document_id)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
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

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.source, c.chunk_index, c.overlap, c.text, c.hash,
                   cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ChunkHit {
                    chunk: chunk_from_row(row),
                    score: cosine_similarity(query, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[async_trait]
impl LexicalIndex for SqliteIndex {
    async fn insert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            upsert_chunk(&mut tx, chunk).await?;

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.source, c.chunk_index, c.overlap, c.text, c.hash,
                   bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank, c.id
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // bm25() is lower-is-better; flip it so hits read best first.
        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkHit {
                    chunk: chunk_from_row(row),
                    score: -rank,
                }
            })
            .collect();
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_and_dedupes_terms() {
        assert_eq!(
            fts_query("What's \"NEAR\"(x) or x?").as_deref(),
            Some("\"what\" OR \"s\" OR \"near\" OR \"x\" OR \"or\"")
        );
    }

    #[test]
    fn test_fts_query_without_terms() {
        assert_eq!(fts_query("?!  -- *"), None);
        assert_eq!(fts_query(""), None);
    }
}
