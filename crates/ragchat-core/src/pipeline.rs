//! The two orchestrated operations: index build and chat turn.
//!
//! # Build
//!
//! ```text
//! documents ──buffer_unordered(workers)──▶ chunk ─▶ embed (batch_size) ─▶ VectorIndex
//!                                                                   └──▶ LexicalIndex
//! ```
//!
//! Each document is indexed independently. A document that fails to chunk,
//! embed, or insert is recorded as [`RagError::Ingest`] in the
//! [`BuildReport`] and the build carries on with the rest.
//!
//! # Turn
//!
//! ```text
//! memory.read ─▶ retrieve ─▶ rerank ─▶ assemble (budget) ─▶ generate ─▶ memory.append
//! ```
//!
//! Memory is written only after generation succeeds.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::chunk::{chunk_document, validate_params};
use crate::embedding::{check_batch, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::GenerationProvider;
use crate::memory::ConversationSession;
use crate::models::{Document, IndexEntry, MemoryTurn, RetrievedCandidate};
use crate::prompt::{assemble, PromptTemplate};
use crate::rerank::{rerank, Reranker};
use crate::retrieve::{RetrievalMode, Retriever};
use crate::store::{LexicalIndex, VectorIndex};

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Documents processed concurrently.
    pub workers: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_size: 64,
            workers: 4,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BuildReport {
    pub documents_indexed: usize,
    /// Documents that produced no chunks (empty text).
    pub documents_empty: usize,
    pub chunks_indexed: usize,
    #[serde(skip)]
    pub failures: Vec<RagError>,
}

pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Option<Arc<dyn LexicalIndex>>,
    options: BuildOptions,
}

impl IndexBuilder {
    /// # Errors
    ///
    /// [`RagError::InvalidConfig`] for bad chunking parameters or a zero
    /// batch size or worker count.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        options: BuildOptions,
    ) -> Result<Self> {
        validate_params(options.chunk_size, options.chunk_overlap)?;
        if options.batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embedding batch_size must be greater than zero".to_string(),
            ));
        }
        if options.workers == 0 {
            return Err(RagError::InvalidConfig(
                "embedding workers must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            embedder,
            vectors,
            lexical: None,
            options,
        })
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalIndex>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    /// Index every document, best effort.
    pub async fn build(&self, documents: Vec<Document>) -> BuildReport {
        let total = documents.len();
        let results: Vec<(String, Result<usize>)> = stream::iter(documents)
            .map(|doc| async move {
                let result = self.index_document(&doc).await;
                (doc.source, result)
            })
            .buffer_unordered(self.options.workers)
            .collect()
            .await;

        let mut report = BuildReport::default();
        for (source, result) in results {
            match result {
                Ok(0) => {
                    tracing::debug!(source = %source, "document is empty, skipped");
                    report.documents_empty += 1;
                }
                Ok(n) => {
                    report.documents_indexed += 1;
                    report.chunks_indexed += n;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping document");
                    report.failures.push(e);
                }
            }
        }

        tracing::info!(
            documents = total,
            indexed = report.documents_indexed,
            chunks = report.chunks_indexed,
            failed = report.failures.len(),
            "index build finished"
        );
        report
    }

    async fn index_document(&self, doc: &Document) -> Result<usize> {
        let chunks = chunk_document(doc, self.options.chunk_size, self.options.chunk_overlap)
            .map_err(|e| RagError::ingest(&doc.source, e))?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let dims = self.embedder.dims();
        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.options.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| RagError::ingest(&doc.source, e))?;
            check_batch(&vectors, texts.len(), dims).map_err(|e| RagError::ingest(&doc.source, e))?;

            for (chunk, embedding) in batch.iter().zip(vectors) {
                entries.push(IndexEntry {
                    chunk: chunk.clone(),
                    embedding,
                    metadata: doc.metadata.clone(),
                });
            }
        }

        self.vectors
            .insert(&entries)
            .await
            .map_err(|e| RagError::ingest(&doc.source, e))?;
        if let Some(lexical) = &self.lexical {
            lexical
                .insert(&chunks)
                .await
                .map_err(|e| RagError::ingest(&doc.source, e))?;
        }

        tracing::debug!(source = %doc.source, chunks = chunks.len(), "indexed document");
        Ok(chunks.len())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    pub top_k: usize,
    pub mode: RetrievalMode,
    /// Candidates kept after re-ranking (or after retrieval, when disabled).
    pub rerank_top_n: usize,
    /// Prompt plus history, in characters.
    pub context_budget: usize,
    /// Read and write conversation memory.
    pub use_memory: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            mode: RetrievalMode::Vector,
            rerank_top_n: 4,
            context_budget: 6000,
            use_memory: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    /// Candidates that made it into the prompt, in prompt order.
    pub sources: Vec<RetrievedCandidate>,
    pub dropped_candidates: usize,
}

pub struct ChatPipeline {
    retriever: Retriever,
    reranker: Option<Arc<dyn Reranker>>,
    generator: Arc<dyn GenerationProvider>,
    template: PromptTemplate,
    options: TurnOptions,
}

impl ChatPipeline {
    /// # Errors
    ///
    /// [`RagError::InvalidConfig`] when the retriever cannot serve
    /// `options.mode` or a limit is zero.
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn GenerationProvider>,
        template: PromptTemplate,
        options: TurnOptions,
    ) -> Result<Self> {
        if !retriever.supports(options.mode) {
            return Err(RagError::InvalidConfig(
                "hybrid retrieval requires a lexical index".to_string(),
            ));
        }
        if options.top_k == 0 || options.rerank_top_n == 0 {
            return Err(RagError::InvalidConfig(
                "top_k and top_n must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            retriever,
            reranker: None,
            generator,
            template,
            options,
        })
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn options(&self) -> &TurnOptions {
        &self.options
    }

    /// Answer one query within `session`.
    ///
    /// # Errors
    ///
    /// Retrieval errors ([`RagError::IndexEmpty`],
    /// [`RagError::EmbeddingUnavailable`]), [`RagError::GenerationUnavailable`]
    /// when the provider fails, and [`RagError::Storage`] for memory failures.
    /// Memory is left untouched on any error.
    pub async fn turn(&self, session: &mut ConversationSession, query: &str) -> Result<TurnOutcome> {
        let (turns, summary) = if self.options.use_memory {
            let turns = session.read().await.map_err(RagError::storage)?;
            let summary = session.summary().await.map_err(RagError::storage)?;
            (turns, summary)
        } else {
            (Vec::new(), None)
        };

        let candidates = self
            .retriever
            .retrieve(query, self.options.top_k, self.options.mode)
            .await?;
        let retrieved = candidates.len();
        let candidates = rerank(
            self.reranker.as_deref(),
            query,
            candidates,
            self.options.rerank_top_n,
        )
        .await;

        let prompt = assemble(
            &self.template,
            query,
            candidates,
            &turns,
            summary.as_deref(),
            self.options.context_budget,
        );
        if prompt.dropped_candidates > 0 || prompt.dropped_turns > 0 {
            tracing::debug!(
                dropped_candidates = prompt.dropped_candidates,
                dropped_turns = prompt.dropped_turns,
                "trimmed prompt to fit context budget"
            );
        }

        let answer = self
            .generator
            .generate(&prompt.text, &prompt.history)
            .await
            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;

        if self.options.use_memory {
            session
                .append(MemoryTurn::new(query, answer.clone()))
                .await
                .map_err(RagError::storage)?;
        }

        tracing::info!(
            session = session.key(),
            retrieved,
            used = prompt.used.len(),
            model = self.generator.model_name(),
            "turn complete"
        );

        Ok(TurnOutcome {
            answer,
            sources: prompt.used,
            dropped_candidates: prompt.dropped_candidates,
        })
    }

    /// Retrieve (and re-rank, when configured) without generating.
    pub async fn search(
        &self,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
    ) -> Result<Vec<RetrievedCandidate>> {
        let candidates = self.retriever.retrieve(query, limit, mode).await?;
        Ok(rerank(self.reranker.as_deref(), query, candidates, limit).await)
    }
}
