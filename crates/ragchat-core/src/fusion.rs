//! Reciprocal-rank fusion of vector and lexical result lists.
//!
//! Cosine similarities and BM25 scores live on unrelated scales, so the two
//! lists are combined by rank only. A chunk at 1-based rank `r` in a list
//! with weight `w` contributes `w / (r + k)`; its fused score is the sum over
//! the lists it appears in. Both weights default to 1.0, the plain
//! reciprocal-rank sum.
//!
//! Output ordering is total and deterministic: fused score descending, then
//! vector rank, then lexical rank (absent ranks sort last), then chunk id.

use std::collections::HashMap;

use crate::models::{Provenance, RetrievedCandidate};
use crate::store::ChunkHit;

/// Damping constant used when none is configured.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Per-list multipliers applied to reciprocal-rank terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f64,
    pub lexical: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 1.0,
            lexical: 1.0,
        }
    }
}

/// Fuse two ranked hit lists with equal weights.
pub fn reciprocal_rank_fusion(
    vector: &[ChunkHit],
    lexical: &[ChunkHit],
    k: f64,
) -> Vec<RetrievedCandidate> {
    weighted_rank_fusion(vector, lexical, k, FusionWeights::default())
}

/// Fuse two ranked hit lists into one candidate list.
///
/// Duplicate chunk ids within a single list keep only their first
/// (best-ranked) occurrence.
pub fn weighted_rank_fusion(
    vector: &[ChunkHit],
    lexical: &[ChunkHit],
    k: f64,
    weights: FusionWeights,
) -> Vec<RetrievedCandidate> {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<RetrievedCandidate> = Vec::new();

    let mut rank = 0;
    for hit in vector {
        if by_id.contains_key(&hit.chunk.id) {
            continue;
        }
        rank += 1;
        by_id.insert(hit.chunk.id.clone(), fused.len());
        fused.push(RetrievedCandidate {
            chunk: hit.chunk.clone(),
            score: weights.vector * rrf_term(rank, k),
            provenance: Provenance::Vector,
            vector_rank: Some(rank),
            lexical_rank: None,
            rerank_score: None,
        });
    }

    let mut rank = 0;
    for hit in lexical {
        if let Some(&i) = by_id.get(&hit.chunk.id) {
            let candidate = &mut fused[i];
            if candidate.lexical_rank.is_some() {
                continue;
            }
            rank += 1;
            candidate.score += weights.lexical * rrf_term(rank, k);
            candidate.lexical_rank = Some(rank);
            candidate.provenance = Provenance::Both;
            continue;
        }
        rank += 1;
        by_id.insert(hit.chunk.id.clone(), fused.len());
        fused.push(RetrievedCandidate {
            chunk: hit.chunk.clone(),
            score: weights.lexical * rrf_term(rank, k),
            provenance: Provenance::Lexical,
            vector_rank: None,
            lexical_rank: Some(rank),
            rerank_score: None,
        });
    }

    sort_candidates(&mut fused);
    fused
}

/// Wrap vector-only hits as candidates, keeping the raw cosine score.
pub fn vector_candidates(hits: &[ChunkHit]) -> Vec<RetrievedCandidate> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<RetrievedCandidate> = Vec::with_capacity(hits.len());
    for hit in hits {
        if !seen.insert(hit.chunk.id.as_str()) {
            continue;
        }
        out.push(RetrievedCandidate {
            chunk: hit.chunk.clone(),
            score: hit.score,
            provenance: Provenance::Vector,
            vector_rank: Some(out.len() + 1),
            lexical_rank: None,
            rerank_score: None,
        });
    }
    sort_candidates(&mut out);
    out
}

fn rrf_term(rank: usize, k: f64) -> f64 {
    1.0 / (rank as f64 + k)
}

fn sort_candidates(candidates: &mut [RetrievedCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| rank_key(a.vector_rank).cmp(&rank_key(b.vector_rank)))
            .then_with(|| rank_key(a.lexical_rank).cmp(&rank_key(b.lexical_rank)))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}
