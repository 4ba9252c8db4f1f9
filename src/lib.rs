//! `agentsh`: an AI-enhanced terminal agent execution core.
//!
//! A ReAct-style loop ([`agent`]) drives an LLM ([`llm`]) through a tool-use
//! protocol ([`tools`]), under layered security with human-in-the-loop
//! approval ([`security`]), backed by conversational and long-term memory
//! ([`memory`]) and a layered YAML/env configuration system ([`config`]).
//! The [`coordinator`] fans one goal across many devices' agent loops.

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod memory;
pub mod security;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use agentsh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentLoop, AgentResult, AgentStatus};
    pub use crate::config::AppConfig;
    pub use crate::coordinator::{Coordinator, DeviceTarget, FailurePolicy, OrchestrationResult, RolloutStrategy};
    pub use crate::error::{AgentShError, Result};
    pub use crate::llm::{LLMProvider, Message, MessageRole};
    pub use crate::memory::MemoryManager;
    pub use crate::security::{Role, SecurityController, User, ValidationResult};
    pub use crate::tools::{ExecutionContext, ToolRegistry, ToolResult, ToolRunner};
}
