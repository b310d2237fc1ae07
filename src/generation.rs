//! HTTP generation providers.
//!
//! Each adapter sends the memory window as prior chat messages followed by
//! the assembled prompt as the final user message:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | [`OpenAiGenerator`] | `POST /v1/chat/completions` |
//! | [`OllamaGenerator`] | `POST /api/chat` (non-streaming) |
//! | [`GeminiGenerator`] | `POST /v1beta/models/{model}:generateContent` |
//!
//! `provider = "disabled"` maps to the core `DisabledGenerator`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ragchat_core::generation::{DisabledGenerator, GenerationProvider};
use ragchat_core::models::{ChatMessage, Role};
use ragchat_core::ProviderError;
use serde_json::{json, Value};

use crate::config::{GenerationConfig, GenerationProviderKind};
use crate::embedding::http_client;
use crate::retry::{api_key, post_json};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

fn required_model(config: &GenerationConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("generation.model required for {:?} provider", config.provider))
}

fn empty_answer(provider: &str) -> ProviderError {
    ProviderError::Fatal(format!("Invalid {} response: no content", provider))
}

/// OpenAI and Ollama share the `{role, content}` message shape.
fn role_content_messages(history: &[ChatMessage], prompt: &str) -> Vec<Value> {
    history
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.text }))
        .chain(std::iter::once(json!({ "role": "user", "content": prompt })))
        .collect()
}

// ============ OpenAI ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: api_key("OPENAI_API_KEY")?,
            model: required_model(config)?,
            temperature: config.temperature,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": role_content_messages(history, prompt),
            "temperature": self.temperature,
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let json = post_json(
            "OpenAI",
            &self.client,
            &format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')),
            &headers,
            &body,
            self.max_attempts,
        )
        .await?;
        parse_openai_answer(&json)
    }
}

pub fn parse_openai_answer(json: &Value) -> Result<String, ProviderError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| empty_answer("OpenAI"))
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            model: required_model(config)?,
            temperature: config.temperature,
            max_attempts: config.max_attempts,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": role_content_messages(history, prompt),
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = post_json(
            "Ollama",
            &self.client,
            &format!("{}/api/chat", self.base_url.trim_end_matches('/')),
            &[],
            &body,
            self.max_attempts,
        )
        .await?;
        parse_ollama_answer(&json)
    }
}

pub fn parse_ollama_answer(json: &Value) -> Result<String, ProviderError> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| empty_answer("Ollama"))
}

// ============ Gemini ============

pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.url.clone().unwrap_or_else(|| GEMINI_URL.to_string()),
            api_key: api_key("GEMINI_API_KEY")?,
            model: required_model(config)?,
            temperature: config.temperature,
            max_attempts: config.max_attempts,
        })
    }
}

/// Gemini calls the assistant role `model`.
fn gemini_contents(history: &[ChatMessage], prompt: &str) -> Vec<Value> {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": m.text }] })
        })
        .chain(std::iter::once(json!({ "role": "user", "parts": [{ "text": prompt }] })))
        .collect()
}

#[async_trait]
impl GenerationProvider for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let body = json!({
            "contents": gemini_contents(history, prompt),
            "generationConfig": { "temperature": self.temperature },
        });
        let headers = [("x-goog-api-key", self.api_key.clone())];
        let json = post_json(
            "Gemini",
            &self.client,
            &format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.model
            ),
            &headers,
            &body,
            self.max_attempts,
        )
        .await?;
        parse_gemini_answer(&json)
    }
}

pub fn parse_gemini_answer(json: &Value) -> Result<String, ProviderError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| empty_answer("Gemini"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(empty_answer("Gemini"));
    }
    Ok(text)
}

/// Create the generator selected by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    Ok(match config.provider {
        GenerationProviderKind::Openai => Arc::new(OpenAiGenerator::new(config)?),
        GenerationProviderKind::Ollama => Arc::new(OllamaGenerator::new(config)?),
        GenerationProviderKind::Gemini => Arc::new(GeminiGenerator::new(config)?),
        GenerationProviderKind::Disabled => Arc::new(DisabledGenerator),
    })
}
