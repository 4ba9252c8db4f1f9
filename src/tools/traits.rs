//! Tool Registry core types (spec §4.B): the tool definition, its result,
//! and the LLM-issued call that invokes it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::security::RiskLevel;

/// A capability the agent loop can invoke. Implementations hold no
/// registry-level metadata (risk, timeout, retries) — that lives on
/// [`ToolDefinition`], which wraps a handler in this trait.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with arguments already validated against its schema.
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;
}

/// Everything the registry and runner need to know about a tool, beyond how
/// to execute it.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Unique tool name, e.g. `"shell.run"`.
    pub name: String,
    /// Human-readable description used in LLM tool-use payloads.
    pub description: String,
    /// JSON Schema object describing the tool's accepted parameters.
    pub parameters: Value,
    pub risk_level: RiskLevel,
    pub requires_confirmation: bool,
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub plugin_name: Option<String>,
    pub handler: std::sync::Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: std::sync::Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            risk_level: RiskLevel::Safe,
            requires_confirmation: false,
            timeout_secs: 30.0,
            max_retries: 2,
            plugin_name: None,
            handler,
        }
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_requires_confirmation(mut self, requires: bool) -> Self {
        self.requires_confirmation = requires;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_plugin_name(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self
    }

    /// OpenAI function-calling schema shape (Shape A, spec §6).
    pub fn to_openai_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }

    /// Anthropic tool-use schema shape (Shape B, spec §6).
    pub fn to_anthropic_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Format the result the way it is shown to the LLM: the output, or
    /// `"(No output)"` on success with nothing to show; `"Error: ..."` on
    /// failure.
    pub fn to_llm_format(&self) -> String {
        if self.success {
            if self.output.is_empty() {
                "(No output)".to_owned()
            } else {
                self.output.clone()
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("Unknown error"))
        }
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_empty_output_renders_placeholder() {
        let result = ToolResult::ok("");
        assert_eq!(result.to_llm_format(), "(No output)");
    }

    #[test]
    fn successful_output_is_passed_through() {
        let result = ToolResult::ok("42 files");
        assert_eq!(result.to_llm_format(), "42 files");
    }

    #[test]
    fn failure_renders_error_prefix() {
        let result = ToolResult::err("permission denied");
        assert_eq!(result.to_llm_format(), "Error: permission denied");
    }

    #[test]
    fn failure_without_message_falls_back() {
        let result = ToolResult {
            success: false,
            error: None,
            ..Default::default()
        };
        assert_eq!(result.to_llm_format(), "Error: Unknown error");
    }
}
