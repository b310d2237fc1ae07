//! The `search` command: retrieval (and re-ranking) without generation.

use anyhow::Result;
use ragchat_core::models::RetrievedCandidate;
use ragchat_core::retrieve::RetrievalMode;
use ragchat_core::text::preview;

use crate::chat::{explain, ChatContext};
use crate::config::Config;

const EXCERPT_CHARS: usize = 160;

fn describe_ranks(c: &RetrievedCandidate) -> String {
    let mut parts = vec![c.provenance.as_str().to_string()];
    if let Some(rank) = c.vector_rank {
        parts.push(format!("vector #{}", rank));
    }
    if let Some(rank) = c.lexical_rank {
        parts.push(format!("lexical #{}", rank));
    }
    if let Some(score) = c.rerank_score {
        parts.push(format!("rerank {:.3}", score));
    }
    parts.join(", ")
}

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: Option<RetrievalMode>,
    limit: Option<usize>,
) -> Result<()> {
    let mode = mode.unwrap_or(config.retrieval.mode);
    let limit = limit.unwrap_or(config.retrieval.top_k);

    let ctx = ChatContext::open(config, false).await.map_err(explain)?;
    let results = ctx.pipeline.search(query, mode, limit).await;
    ctx.close().await;
    let results = results.map_err(|e| explain(e.into()))?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (chunk {})",
            i + 1,
            result.score,
            result.chunk.source,
            result.chunk.chunk_index
        );
        println!("    match: {}", describe_ranks(result));
        println!("    excerpt: \"{}\"", preview(&result.chunk.text, EXCERPT_CHARS));
        println!("    id: {}", result.chunk.id);
        println!();
    }
    Ok(())
}
