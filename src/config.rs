//! Configuration parsing and validation.
//!
//! ragchat is configured through a single TOML file (default
//! `./config/ragchat.toml`). Every option with a fixed set of choices is an
//! enum, so an unknown provider or mode is rejected while parsing.
//!
//! # Example
//!
//! ```toml
//! [index]
//! path = "./data/ragchat.sqlite"
//!
//! [loader]
//! root = "./docs"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [retrieval]
//! mode = "hybrid"
//! ```

use anyhow::{Context, Result};
use ragchat_core::fusion::FusionWeights;
use ragchat_core::retrieve::RetrievalMode;
use ragchat_core::RagError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::{local_model_dims, DEFAULT_LOCAL_MODEL, LOCAL_MODELS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding both indexes and persisted memory.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_loader_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            urls: Vec::new(),
            timeout_secs: default_loader_timeout_secs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_loader_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Openai,
    Ollama,
    Gemini,
    /// Sentence-transformer models run in-process through fastembed.
    Local,
    Hash,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Dimensionality to use. The hash embedder defaults to 256.
    pub fn resolved_dims(&self) -> Option<usize> {
        match self.provider {
            EmbeddingProviderKind::Hash => Some(self.dims.unwrap_or(256)),
            EmbeddingProviderKind::Local => self.dims.or_else(|| local_model_dims(self.local_model())),
            _ => self.dims,
        }
    }

    /// Model name for the local provider, defaulting to `all-minilm-l6-v2`.
    pub fn local_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    Openai,
    Ollama,
    Gemini,
    #[default]
    Disabled,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: GenerationProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProviderKind::Disabled,
            model: None,
            temperature: default_temperature(),
            url: None,
            max_attempts: default_max_attempts(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Multiplier on the vector list's reciprocal-rank terms in hybrid mode.
    #[serde(default = "default_fusion_weight")]
    pub vector_weight: f64,
    /// Multiplier on the lexical list's reciprocal-rank terms in hybrid mode.
    #[serde(default = "default_fusion_weight")]
    pub lexical_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Vector,
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            rrf_k: default_rrf_k(),
            vector_weight: default_fusion_weight(),
            lexical_weight: default_fusion_weight(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_candidate_k() -> usize {
    20
}
fn default_rrf_k() -> f64 {
    ragchat_core::fusion::DEFAULT_RRF_K
}
fn default_fusion_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankerProviderKind {
    #[default]
    Lexical,
    Cohere,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: RerankerProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: RerankerProviderKind::Lexical,
            model: None,
            top_n: default_top_n(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_top_n() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum turns kept per session.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Fold evicted turns into a running summary.
    #[serde(default)]
    pub summarize: bool,
    /// Store sessions in the index database so they survive restarts.
    #[serde(default)]
    pub persist: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_window(),
            summarize: false,
            persist: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_window() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    #[serde(default)]
    pub chat_template_path: Option<PathBuf>,
    /// Prompt plus history, in characters.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            chat_template_path: None,
            context_budget: default_context_budget(),
        }
    }
}

fn default_context_budget() -> usize {
    6000
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), RagError> {
        let invalid = |msg: String| Err(RagError::InvalidConfig(msg));

        ragchat_core::chunk::validate_params(self.chunking.chunk_size, self.chunking.chunk_overlap)?;

        let r = &self.retrieval;
        if r.top_k == 0 {
            return invalid("retrieval.top_k must be >= 1".into());
        }
        if r.candidate_k < r.top_k {
            return invalid(format!(
                "retrieval.candidate_k ({}) must be >= retrieval.top_k ({})",
                r.candidate_k, r.top_k
            ));
        }
        if !(r.rrf_k > 0.0) {
            return invalid("retrieval.rrf_k must be > 0".into());
        }
        for (name, w) in [("vector_weight", r.vector_weight), ("lexical_weight", r.lexical_weight)] {
            if !w.is_finite() || w < 0.0 {
                return invalid(format!("retrieval.{} must be >= 0", name));
            }
        }
        if r.vector_weight + r.lexical_weight == 0.0 {
            return invalid("retrieval.vector_weight and retrieval.lexical_weight cannot both be 0".into());
        }

        if self.reranker.enabled && self.reranker.top_n == 0 {
            return invalid("reranker.top_n must be >= 1".into());
        }
        if self.memory.window == 0 {
            return invalid("memory.window must be >= 1".into());
        }
        if self.prompt.context_budget == 0 {
            return invalid("prompt.context_budget must be > 0".into());
        }

        let e = &self.embedding;
        if e.batch_size == 0 || e.workers == 0 {
            return invalid("embedding.batch_size and embedding.workers must be >= 1".into());
        }
        if e.max_attempts == 0 || self.generation.max_attempts == 0 {
            return invalid("max_attempts must be >= 1".into());
        }
        if e.provider == EmbeddingProviderKind::Local {
            let Some(native) = local_model_dims(e.local_model()) else {
                return invalid(format!(
                    "unknown local embedding model '{}'; supported: {}",
                    e.local_model(),
                    LOCAL_MODELS.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ")
                ));
            };
            if e.dims.is_some_and(|d| d != native) {
                return invalid(format!(
                    "embedding.dims must be {} for local model '{}'",
                    native,
                    e.local_model()
                ));
            }
        } else if e.provider != EmbeddingProviderKind::Hash {
            if matches!(e.dims, None | Some(0)) {
                return invalid(format!(
                    "embedding.dims must be > 0 when provider is '{:?}'",
                    e.provider
                )
                .to_lowercase());
            }
            if e.model.is_none() {
                return invalid(
                    format!("embedding.model must be specified when provider is '{:?}'", e.provider)
                        .to_lowercase(),
                );
            }
        } else if e.dims == Some(0) {
            return invalid("embedding.dims must be > 0".into());
        }

        let g = &self.generation;
        if g.provider != GenerationProviderKind::Disabled && g.model.is_none() {
            return invalid(
                format!("generation.model must be specified when provider is '{:?}'", g.provider)
                    .to_lowercase(),
            );
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            return invalid("generation.temperature must be in [0.0, 2.0]".into());
        }

        if self.reranker.enabled
            && self.reranker.provider == RerankerProviderKind::Cohere
            && self.reranker.model.is_none()
        {
            return invalid("reranker.model must be specified for the cohere provider".into());
        }

        Ok(())
    }

    /// SQLite file holding the published index.
    pub fn index_path(&self) -> &Path {
        &self.index.path
    }

    pub fn fusion_weights(&self) -> FusionWeights {
        FusionWeights {
            vector: self.retrieval.vector_weight,
            lexical: self.retrieval.lexical_weight,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
