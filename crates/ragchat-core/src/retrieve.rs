//! Query-time retrieval in vector or hybrid mode.
//!
//! # Modes
//!
//! - **vector**: embed the query, cosine search the [`VectorIndex`],
//!   return the top `top_k` by similarity.
//! - **hybrid**: additionally search the [`LexicalIndex`] and fuse both
//!   lists with [`weighted_rank_fusion`](crate::fusion::weighted_rank_fusion). Both searches fetch
//!   `max(candidate_k, top_k)` hits and run concurrently.
//!
//! Results never contain duplicate chunk ids and are ordered by descending
//! score with deterministic tie-breaking.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::fusion::{vector_candidates, weighted_rank_fusion, FusionWeights, DEFAULT_RRF_K};
use crate::models::RetrievedCandidate;
use crate::store::{ChunkHit, LexicalIndex, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Vector,
    Hybrid,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Vector => write!(f, "vector"),
            RetrievalMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for RetrievalMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(RetrievalMode::Vector),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(RagError::InvalidConfig(format!(
                "unknown retrieval mode '{}': expected 'vector' or 'hybrid'",
                other
            ))),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetrieverParams {
    /// Hits fetched from each index before fusion and truncation.
    pub candidate_k: usize,
    /// Reciprocal-rank damping constant.
    pub rrf_k: f64,
    /// Per-list weights for hybrid fusion.
    pub weights: FusionWeights,
}

impl Default for RetrieverParams {
    fn default() -> Self {
        Self {
            candidate_k: 20,
            rrf_k: DEFAULT_RRF_K,
            weights: FusionWeights::default(),
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Option<Arc<dyn LexicalIndex>>,
    params: RetrieverParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        params: RetrieverParams,
    ) -> Self {
        Self {
            embedder,
            vectors,
            lexical: None,
            params,
        }
    }

    /// Attach a lexical index, enabling [`RetrievalMode::Hybrid`].
    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalIndex>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn supports(&self, mode: RetrievalMode) -> bool {
        mode == RetrievalMode::Vector || self.lexical.is_some()
    }

    /// Retrieve up to `top_k` candidates for `query`.
    ///
    /// A blank query or `top_k == 0` yields an empty result without
    /// touching the provider.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexEmpty`] when the vector index has no entries.
    /// - [`RagError::EmbeddingUnavailable`] when the query cannot be embedded.
    /// - [`RagError::InvalidConfig`] for hybrid mode without a lexical index.
    /// - [`RagError::Storage`] when an index query fails.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        mode: RetrievalMode,
    ) -> Result<Vec<RetrievedCandidate>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if !self.supports(mode) {
            return Err(RagError::InvalidConfig(
                "hybrid retrieval requires a lexical index".to_string(),
            ));
        }
        if self.vectors.is_empty().await.map_err(RagError::storage)? {
            return Err(RagError::IndexEmpty);
        }

        let pool = self.params.candidate_k.max(top_k);
        let mut candidates = match (mode, &self.lexical) {
            (RetrievalMode::Hybrid, Some(lexical)) => {
                let (vector_hits, lexical_hits) = futures::join!(
                    self.vector_search(query, pool),
                    lexical.search(query, pool)
                );
                let vector_hits = vector_hits?;
                let lexical_hits = lexical_hits.map_err(RagError::storage)?;
                tracing::debug!(
                    vector = vector_hits.len(),
                    lexical = lexical_hits.len(),
                    "fusing hybrid results"
                );
                weighted_rank_fusion(
                    &vector_hits,
                    &lexical_hits,
                    self.params.rrf_k,
                    self.params.weights,
                )
            }
            _ => vector_candidates(&self.vector_search(query, pool).await?),
        };

        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn vector_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;
        self.vectors
            .search(&query_vec, limit)
            .await
            .map_err(RagError::storage)
    }
}
