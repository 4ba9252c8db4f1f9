//! Tool Registry (spec §4.B): a name-keyed collection of [`ToolDefinition`]s.
//! Unlike the teacher's registry, registering a duplicate name is a
//! construction error rather than a silent overwrite — a toolset or plugin
//! clobbering another's tool name is a bug, not a feature.

use std::{collections::HashMap, sync::Arc};

use crate::error::{AgentShError, Result};
use crate::security::RiskLevel;

use super::traits::ToolDefinition;

/// Central registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool`. Fails if a tool with the same name is already
    /// registered.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(AgentShError::Config(format!(
                "tool '{}' is already registered",
                tool.name
            )));
        }
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ToolDefinition>> {
        self.tools.values().cloned().collect()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn list_by_risk_level(&self, risk_level: RiskLevel) -> Vec<Arc<ToolDefinition>> {
        self.tools
            .values()
            .filter(|t| t.risk_level == risk_level)
            .cloned()
            .collect()
    }

    pub fn list_by_plugin(&self, plugin_name: &str) -> Vec<Arc<ToolDefinition>> {
        self.tools
            .values()
            .filter(|t| t.plugin_name.as_deref() == Some(plugin_name))
            .cloned()
            .collect()
    }

    /// All registered tools in OpenAI function-calling schema form.
    pub fn to_openai_schemas(&self) -> Vec<serde_json::Value> {
        self.tools.values().map(|t| t.to_openai_schema()).collect()
    }

    /// All registered tools in Anthropic tool-use schema form.
    pub fn to_anthropic_schemas(&self) -> Vec<serde_json::Value> {
        self.tools.values().map(|t| t.to_anthropic_schema()).collect()
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::super::traits::{ToolHandler, ToolResult};

    struct DummyHandler;

    #[async_trait]
    impl ToolHandler for DummyHandler {
        async fn execute(&self, _args: Value) -> std::result::Result<ToolResult, String> {
            Ok(ToolResult::ok("done"))
        }
    }

    fn dummy(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, "a test tool", json!({"type": "object"}), Arc::new(DummyHandler))
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("shell.run")).unwrap();
        assert!(registry.get("shell.run").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("shell.run")).unwrap();
        let err = registry.register(dummy("shell.run"));
        assert!(err.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_by_risk_level_filters() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("safe_tool")).unwrap();
        registry
            .register(dummy("risky_tool").with_risk_level(RiskLevel::High))
            .unwrap();
        assert_eq!(registry.list_by_risk_level(RiskLevel::High).len(), 1);
        assert_eq!(registry.list_by_risk_level(RiskLevel::Safe).len(), 1);
    }

    #[test]
    fn schemas_contain_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("shell.run")).unwrap();
        let openai = registry.to_openai_schemas();
        assert_eq!(openai.len(), 1);
        assert_eq!(openai[0]["function"]["name"], "shell.run");

        let anthropic = registry.to_anthropic_schemas();
        assert_eq!(anthropic[0]["name"], "shell.run");
    }

    #[test]
    fn unregister_removes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("shell.run")).unwrap();
        assert!(registry.unregister("shell.run"));
        assert!(registry.is_empty());
        assert!(!registry.unregister("shell.run"));
    }
}
