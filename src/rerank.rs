//! Re-ranker selection and the Cohere adapter.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ragchat_core::models::RetrievedCandidate;
use ragchat_core::rerank::{LexicalReranker, Reranker};
use ragchat_core::ProviderError;
use serde_json::{json, Value};

use crate::config::{RerankerConfig, RerankerProviderKind};
use crate::embedding::http_client;
use crate::retry::{api_key, post_json};

const COHERE_URL: &str = "https://api.cohere.com/v1/rerank";

/// Cross-encoder re-ranking through Cohere's `/v1/rerank`.
pub struct CohereReranker {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_attempts: u32,
}

impl CohereReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reranker.model required for the cohere provider"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key("COHERE_API_KEY")?,
            model,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    fn name(&self) -> &str {
        "cohere"
    }

    async fn score(
        &self,
        query: &str,
        candidates: &[RetrievedCandidate],
    ) -> Result<Vec<f64>, ProviderError> {
        let documents: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let body = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let json = post_json("Cohere", &self.client, COHERE_URL, &headers, &body, self.max_attempts).await?;
        parse_cohere_scores(&json, candidates.len())
    }
}

/// Map `results[].{index, relevance_score}` back to input order.
pub fn parse_cohere_scores(json: &Value, n: usize) -> Result<Vec<f64>, ProviderError> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| ProviderError::Fatal("Invalid Cohere response: missing results".to_string()))?;

    let mut scores = vec![0.0; n];
    for item in results {
        let index = item.get("index").and_then(|i| i.as_u64());
        let score = item.get("relevance_score").and_then(|s| s.as_f64());
        match (index, score) {
            (Some(i), Some(s)) if (i as usize) < n => scores[i as usize] = s,
            _ => {
                return Err(ProviderError::Fatal(
                    "Invalid Cohere response: bad result entry".to_string(),
                ))
            }
        }
    }
    Ok(scores)
}

/// The configured re-ranker, or `None` when re-ranking is disabled.
pub fn create_reranker(config: &RerankerConfig) -> Result<Option<Arc<dyn Reranker>>> {
    if !config.enabled {
        return Ok(None);
    }
    Ok(Some(match config.provider {
        RerankerProviderKind::Lexical => Arc::new(LexicalReranker),
        RerankerProviderKind::Cohere => Arc::new(CohereReranker::new(config)?),
    }))
}
