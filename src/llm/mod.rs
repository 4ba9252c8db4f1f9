//! LLM Client Abstraction (spec §4.A): provider-agnostic messages, a
//! blocking/streaming provider trait, and a shared HTTP client pool.

pub mod http_pool;
pub mod provider;
pub mod providers;
pub mod types;

pub use http_pool::{HttpClientPool, HttpPoolConfig, PoolStats};
pub use provider::{LLMProvider, ProviderFactory, StreamResponse};
pub use providers::{build_provider, OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use types::{
    CompletionRequest, LLMResponse, Message, MessageRole, StopReason, StreamChunk, ToolCall,
    TokenUsage,
};
