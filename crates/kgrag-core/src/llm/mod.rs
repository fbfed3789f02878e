mod huggingface;
mod openai;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use thiserror::Error;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::network::ClientError;

pub use huggingface::HuggingFaceProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),
    #[error("Model request failed: {0}")]
    Client(#[from] ClientError),
    #[error("Model returned no completion")]
    EmptyResponse,
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

pub type CompletionResult<T> = Result<T, CompletionError>;

/// Text-in, text-out language model capability
///
/// Every pipeline stage that needs a model owns its prompt and its parser; the
/// provider behind this trait only moves text.
#[async_trait::async_trait]
pub trait Completion: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> CompletionResult<String>;
}

/// Build the provider selected in the configuration
pub fn provider_from_config(config: &LlmConfig) -> CompletionResult<Arc<dyn Completion>> {
    let provider: Arc<dyn Completion> = match config.provider {
        LlmProviderKind::HuggingFace => Arc::new(HuggingFaceProvider::new(config)?),
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
    };
    tracing::info!(
        "Using {:?} model {}",
        config.provider,
        provider.model_name()
    );
    Ok(provider)
}
