//! Generation provider trait.
//!
//! A generation provider turns an assembled prompt plus the conversation
//! history into a response. Network-backed providers live in the `ragchat`
//! app crate.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::ChatMessage;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate a response. `history` is ordered oldest first and does not
    /// include the current query, which is already part of `prompt`.
    async fn generate(&self, prompt: &str, history: &[ChatMessage])
        -> Result<String, ProviderError>;
}

/// Placeholder used when `[generation] provider = "disabled"`.
///
/// Every call fails with a fatal error, so retrieval commands (`search`,
/// `build`) work without credentials while chat turns report
/// `GenerationUnavailable`.
#[derive(Debug, Default, Clone)]
pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _history: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Fatal(
            "generation is disabled; set [generation] provider in the config".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_generator_fails_fatally() {
        let err = DisabledGenerator.generate("hi", &[]).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
