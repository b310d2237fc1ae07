//! HTTP embedding providers.
//!
//! Implements the core [`EmbeddingProvider`] trait for:
//! - **[`OpenAiEmbedder`]**: `POST /v1/embeddings` (also works with
//!   OpenAI-compatible gateways via `embedding.url`).
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama.
//! - **[`GeminiEmbedder`]**: `batchEmbedContents` on the Gemini API.
//! - **`LocalEmbedder`**: sentence-transformer models run in-process with
//!   fastembed. Needs the `local-embeddings-fastembed` feature; the model is
//!   downloaded on first use and no network calls happen afterwards.
//!
//! The [`HashEmbedder`] from `ragchat_core` is a feature-hashing stub for
//! tests and air-gapped smoke runs, not a semantic model.
//!
//! Every response is checked against the configured dimensionality; a
//! mismatch is a fatal provider error. Transient failures are retried
//! through [`crate::retry::post_json`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ragchat_core::embedding::{check_batch, EmbeddingProvider, HashEmbedder};
use ragchat_core::ProviderError;
use serde_json::{json, Value};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::retry::{api_key, post_json};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used by the local provider when `embedding.model` is unset.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Local models and their native dimensionality.
pub const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("bge-large-en-v1.5", 1024),
    ("nomic-embed-text-v1", 768),
    ("nomic-embed-text-v1.5", 768),
    ("multilingual-e5-small", 384),
    ("multilingual-e5-base", 768),
    ("multilingual-e5-large", 1024),
];

pub fn local_model_dims(name: &str) -> Option<usize> {
    LOCAL_MODELS
        .iter()
        .find(|(model, _)| *model == name)
        .map(|(_, dims)| *dims)
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// Required fields for a remote provider, already checked by `Config::validate`.
fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {:?} provider", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {:?} provider", config.provider))?;
    Ok((model, dims))
}

fn malformed(provider: &str, what: &str) -> ProviderError {
    ProviderError::Fatal(format!("Invalid {} response: {}", provider, what))
}

fn float_array(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_attempts: u32,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Fails if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: api_key("OPENAI_API_KEY")?,
            model,
            dims,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = json!({ "model": self.model, "input": texts });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let json = post_json(
            "OpenAI",
            &self.client,
            &format!("{}/v1/embeddings", self.base_url.trim_end_matches('/')),
            &headers,
            &body,
            self.max_attempts,
        )
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
pub fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(float_array)
            .ok_or_else(|| malformed("OpenAI", "missing embedding"))?;
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(pos as u64);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    max_attempts: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            model,
            dims,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = json!({ "model": self.model, "input": texts });
        let json = post_json(
            "Ollama",
            &self.client,
            &format!("{}/api/embed", self.base_url.trim_end_matches('/')),
            &[],
            &body,
            self.max_attempts,
        )
        .await?;

        let vectors = parse_ollama_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

pub fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("Ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| float_array(e).ok_or_else(|| malformed("Ollama", "embedding is not an array")))
        .collect()
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_attempts: u32,
}

impl GeminiEmbedder {
    /// # Errors
    ///
    /// Fails if `GEMINI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| GEMINI_URL.to_string()),
            api_key: api_key("GEMINI_API_KEY")?,
            model,
            dims,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model_path = format!("models/{}", self.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|t| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": t }] },
                    "outputDimensionality": self.dims,
                })
            })
            .collect();
        let body = json!({ "requests": requests });
        let headers = [("x-goog-api-key", self.api_key.clone())];
        let json = post_json(
            "Gemini",
            &self.client,
            &format!(
                "{}/v1beta/{}:batchEmbedContents",
                self.base_url.trim_end_matches('/'),
                model_path
            ),
            &headers,
            &body,
            self.max_attempts,
        )
        .await?;

        let vectors = parse_gemini_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

pub fn parse_gemini_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("Gemini", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.get("values")
                .and_then(float_array)
                .ok_or_else(|| malformed("Gemini", "missing values"))
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::Arc;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;
    use ragchat_core::embedding::{check_batch, EmbeddingProvider};
    use ragchat_core::ProviderError;

    use super::local_model_dims;
    use crate::config::EmbeddingConfig;

    fn fastembed_model(name: &str) -> Result<EmbeddingModel> {
        Ok(match name {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
            "nomic-embed-text-v1" => EmbeddingModel::NomicEmbedTextV1,
            "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
            "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
            "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
            "multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
            other => bail!("unknown local embedding model '{}'", other),
        })
    }

    /// In-process embedder. The ONNX model is loaded on the first batch
    /// and reused; batches run one at a time on the blocking pool.
    pub struct LocalEmbedder {
        name: String,
        model: EmbeddingModel,
        dims: usize,
        batch_size: usize,
        session: Arc<Mutex<Option<TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let name = config.local_model().to_string();
            let model = fastembed_model(&name)?;
            let dims = local_model_dims(&name).unwrap_or(384);
            Ok(Self {
                name,
                model,
                dims,
                batch_size: config.batch_size,
                session: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let session = self.session.clone();
            let model = self.model.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();
            let count = texts.len();

            let vectors = tokio::task::spawn_blocking(move || {
                let mut guard = session.lock();
                if guard.is_none() {
                    tracing::info!(model = ?model, "loading local embedding model");
                    let loaded = TextEmbedding::try_new(
                        InitOptions::new(model).with_show_download_progress(true),
                    )
                    .map_err(|e| {
                        ProviderError::Fatal(format!("Failed to initialize local embedding model: {}", e))
                    })?;
                    *guard = Some(loaded);
                }
                let Some(embedder) = guard.as_mut() else {
                    return Err(ProviderError::Fatal("local embedding model not loaded".to_string()));
                };
                embedder
                    .embed(texts, Some(batch_size))
                    .map_err(|e| ProviderError::Fatal(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| ProviderError::Fatal(format!("local embedding task failed: {}", e)))??;

            check_batch(&vectors, count, self.dims)?;
            Ok(vectors)
        }
    }
}

/// Create the embedder selected by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match config.provider {
        EmbeddingProviderKind::Openai => Arc::new(OpenAiEmbedder::new(config)?),
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(config)?),
        EmbeddingProviderKind::Gemini => Arc::new(GeminiEmbedder::new(config)?),
        #[cfg(feature = "local-embeddings-fastembed")]
        EmbeddingProviderKind::Local => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        EmbeddingProviderKind::Local => anyhow::bail!(
            "the local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        EmbeddingProviderKind::Hash => {
            let dims = config.resolved_dims().unwrap_or(256);
            Arc::new(HashEmbedder::new(dims))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_is_reordered_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_missing_data_is_fatal() {
        let err = parse_openai_response(&json!({ "error": "nope" })).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_ollama_response() {
        let json = json!({ "model": "nomic-embed-text", "embeddings": [[0.5, 0.25], [1.0, 2.0]] });
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1], vec![1.0, 2.0]);
    }

    #[test]
    fn test_gemini_response() {
        let json = json!({ "embeddings": [{ "values": [0.1, 0.2, 0.3] }] });
        let vecs = parse_gemini_response(&json).unwrap();
        assert_eq!(vecs[0].len(), 3);
        assert!(parse_gemini_response(&json!({ "embeddings": [{}] })).is_err());
    }

    #[test]
    fn test_local_model_table() {
        assert_eq!(local_model_dims(DEFAULT_LOCAL_MODEL), Some(384));
        assert_eq!(local_model_dims("bge-large-en-v1.5"), Some(1024));
        assert_eq!(local_model_dims("text-embedding-3-small"), None);
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    #[test]
    fn test_local_provider_requires_feature() {
        let config: EmbeddingConfig = toml::from_str("provider = \"local\"").unwrap();
        let err = create_embedder(&config).err().unwrap();
        assert!(err.to_string().contains("local-embeddings-fastembed"));
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[tokio::test]
    #[ignore = "downloads the all-minilm-l6-v2 model"]
    async fn test_local_embedder_ranks_paraphrase_above_unrelated() {
        use ragchat_core::embedding::cosine_similarity;

        let config: EmbeddingConfig = toml::from_str("provider = \"local\"").unwrap();
        let embedder = create_embedder(&config).unwrap();
        let texts = vec![
            "How do I reset my password?".to_string(),
            "Steps to recover account login credentials".to_string(),
            "The recipe calls for two cups of flour".to_string(),
        ];
        let vecs = embedder.embed(&texts).await.unwrap();
        assert_eq!(vecs[0].len(), 384);
        assert!(cosine_similarity(&vecs[0], &vecs[1]) > cosine_similarity(&vecs[0], &vecs[2]));
    }

    #[test]
    fn test_hash_provider_needs_no_credentials() {
        let config: EmbeddingConfig = toml::from_str("provider = \"hash\"\ndims = 32").unwrap();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.model_name(), ragchat_core::embedding::HashEmbedder::MODEL);
    }
}
