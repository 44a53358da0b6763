//! LLM integration for advice generation.
//!
//! `LlmProvider` is the seam; `OpenAiProvider` talks to the OpenAI
//! chat-completions API directly over reqwest.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override for the API base URL (tests, proxies).
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let provider = match &config.base_url {
        Some(url) => OpenAiProvider::with_base_url(config.api_key.clone(), &config.model, url),
        None => OpenAiProvider::new(config.api_key.clone(), &config.model),
    };
    tracing::info!("Using OpenAI (model: {})", config.model);
    Arc::new(provider)
}
