use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{AgentShError, Result};
use crate::llm::provider::LLMProvider;

pub mod openai_compatible;

pub use openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};

/// Build a provider from the resolved `[llm]` config section and an
/// already-resolved API key (callers read `ANTHROPIC_API_KEY` /
/// `OPENAI_API_KEY` / `OLLAMA_HOST` per spec §6, this function just wires
/// the result up).
pub fn build_provider(config: &LlmConfig, api_key: &str) -> Result<Arc<dyn LLMProvider>> {
    let mut provider_config = match config.provider.as_str() {
        "openai" => OpenAICompatibleConfig::openai(api_key),
        "anthropic" => OpenAICompatibleConfig::anthropic(api_key),
        "ollama" => OpenAICompatibleConfig::ollama(),
        "openrouter" => OpenAICompatibleConfig::openrouter(api_key),
        other => return Err(AgentShError::Config(format!("unknown LLM provider: {other}"))),
    };

    if !config.model.is_empty() {
        provider_config = provider_config.with_model(config.model.clone());
    }
    provider_config.timeout = std::time::Duration::from_secs(config.request_timeout_secs);
    provider_config.max_retries = config.max_retries;

    Ok(Arc::new(OpenAICompatibleProvider::new(
        provider_config,
        config.provider.clone(),
    )))
}
