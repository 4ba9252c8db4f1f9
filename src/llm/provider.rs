//! The provider-agnostic [`LLMProvider`] trait (spec §4.A).

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use super::types::{CompletionRequest, LLMResponse, StreamChunk};
use crate::error::{AgentShError, Result};

/// Type alias for a streaming response.
pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A provider-agnostic LLM client: blocking `invoke` and streaming
/// `stream`, regardless of which vendor's wire protocol backs it.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Complete a prompt and return the full response.
    async fn invoke(&self, request: CompletionRequest) -> Result<LLMResponse>;

    /// Stream a completion response.
    async fn stream(&self, request: CompletionRequest) -> Result<StreamResponse>;

    /// Context window limit for this provider/model pair.
    fn context_limit(&self) -> usize;

    /// Whether this provider supports function/tool calling.
    fn supports_tools(&self) -> bool;

    /// The provider's name, as used in error messages and config.
    fn provider_name(&self) -> &str;

    /// Pre-establish a connection. Default no-op; providers may override.
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating providers from a config-resolved name.
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn unknown_provider(name: &str) -> AgentShError {
        AgentShError::Config(format!("unknown LLM provider: {name}"))
    }
}
