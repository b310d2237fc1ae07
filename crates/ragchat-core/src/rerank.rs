//! Optional re-ranking stage.
//!
//! A [`Reranker`] assigns a secondary relevance score to each retrieved
//! candidate. [`rerank`] then reorders by that score and truncates to
//! `top_n`. It never introduces or duplicates candidates: the output is
//! always drawn from the input.
//!
//! When no re-ranker is configured, or the configured one fails, the stage
//! passes the retriever's order through unchanged, truncated to `top_n`.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::RetrievedCandidate;
use crate::text::tokenize;

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One relevance score per candidate, in input order. Higher is better.
    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievedCandidate],
    ) -> Result<Vec<f64>, ProviderError>;
}

/// Reorder `candidates` by re-ranker score and keep the best `top_n`.
///
/// Equal scores keep their retrieval order. A provider error or a score
/// vector of the wrong length is logged and treated as "no re-ranker".
pub async fn rerank(
    reranker: Option<&dyn Reranker>,
    query: &str,
    mut candidates: Vec<RetrievedCandidate>,
    top_n: usize,
) -> Vec<RetrievedCandidate> {
    let Some(reranker) = reranker else {
        candidates.truncate(top_n);
        return candidates;
    };
    if candidates.is_empty() || top_n == 0 {
        candidates.truncate(top_n);
        return candidates;
    }

    let scores = match reranker.score(query, &candidates).await {
        Ok(s) if s.len() == candidates.len() => s,
        Ok(s) => {
            tracing::warn!(
                reranker = reranker.name(),
                expected = candidates.len(),
                got = s.len(),
                "re-ranker returned wrong number of scores; keeping retrieval order"
            );
            candidates.truncate(top_n);
            return candidates;
        }
        Err(e) => {
            tracing::warn!(
                reranker = reranker.name(),
                error = %e,
                "re-ranker failed; keeping retrieval order"
            );
            candidates.truncate(top_n);
            return candidates;
        }
    };

    let mut scored: Vec<(f64, RetrievedCandidate)> = scores.into_iter().zip(candidates).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(top_n)
        .map(|(s, mut c)| {
            c.rerank_score = Some(s);
            c
        })
        .collect()
}

/// Local keyword-overlap re-ranker.
///
/// For each distinct query term found in the chunk, adds a term-frequency
/// weight damped by how late the term first appears, then normalises to
/// `[0, 1)` and adds a bonus proportional to the share of query terms
/// covered. Needs no network access.
#[derive(Debug, Default, Clone)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn score_text(query: &str, text: &str) -> f64 {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();
        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_terms = tokenize(text);
        let mut positions: HashMap<&str, (usize, usize)> = HashMap::new();
        for (pos, term) in doc_terms.iter().enumerate() {
            let entry = positions.entry(term.as_str()).or_insert((pos, 0));
            entry.1 += 1;
        }

        let length_norm = 1.0 / (1.0 + (doc_terms.len() as f64 / 50.0).sqrt());
        let mut raw = 0.0;
        let mut covered = 0usize;
        for term in &query_terms {
            if let Some(&(first, tf)) = positions.get(term.as_str()) {
                covered += 1;
                let position_weight = 1.0 / (1.0 + first as f64 * 0.1);
                raw += (tf as f64).sqrt() * position_weight * length_norm;
            }
        }

        let coverage = covered as f64 / query_terms.len() as f64;
        0.7 * raw / (raw + 1.0) + 0.3 * coverage
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievedCandidate],
    ) -> Result<Vec<f64>, ProviderError> {
        Ok(candidates
            .iter()
            .map(|c| Self::score_text(query, &c.chunk.text))
            .collect())
    }
}
