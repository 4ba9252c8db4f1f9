//! Tool Runner (spec §4.B): validates arguments, interposes the Security
//! Controller ahead of command-executing tools, executes with a timeout and
//! linear-backoff retries, and normalizes the result.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::security::{Role, SecurityContext, SecurityController, User, ValidationResult};

use super::registry::ToolRegistry;
use super::traits::{ToolCall, ToolResult};

/// Ambient execution context threaded through a tool call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub user_id: String,
    pub role: Option<Role>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub device_id: Option<String>,
    pub interactive: bool,
}

/// Tool names the runner treats as command-executing, and therefore routes
/// through the Security Controller before dispatch.
pub const COMMAND_TOOLS: &[&str] = &["shell.run", "shell.execute", "bash", "execute", "run_command"];

/// Executes tools with security checks, timeouts, and retries.
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    security: Option<Arc<SecurityController>>,
    default_timeout: Duration,
}

impl ToolRunner {
    pub fn new(registry: Arc<ToolRegistry>, security: Option<Arc<SecurityController>>) -> Self {
        Self {
            registry,
            security,
            default_timeout: Duration::from_secs(30),
        }
    }

    pub async fn execute(&self, tool_name: &str, arguments: Value, context: &ExecutionContext) -> ToolResult {
        let start = std::time::Instant::now();

        let Some(tool) = self.registry.get(tool_name) else {
            return ToolResult::err(format!("Unknown tool: {tool_name}"));
        };

        info!(tool = tool_name, risk_level = %tool.risk_level, "executing tool");

        if let Some(reason) = validate_arguments(&tool.parameters, &arguments) {
            return ToolResult::err(reason).with_duration_ms(elapsed_ms(start));
        }

        if let Some(security) = &self.security {
            if COMMAND_TOOLS.contains(&tool_name) {
                if let Some(command) = arguments.get("command").and_then(Value::as_str) {
                    if let Some(blocked) = self.check_security(security, command, context).await {
                        return blocked.with_duration_ms(elapsed_ms(start));
                    }
                }
            }
        }

        let timeout = if tool.timeout_secs > 0.0 {
            Duration::from_secs_f64(tool.timeout_secs)
        } else {
            self.default_timeout
        };

        let mut last_error = String::from("Unknown error");

        for attempt in 0..=tool.max_retries {
            match tokio::time::timeout(timeout, tool.handler.execute(arguments.clone())).await {
                Ok(Ok(mut result)) => {
                    result.duration_ms = elapsed_ms(start);
                    if result.success {
                        debug!(tool = tool_name, duration_ms = result.duration_ms, "tool succeeded");
                        return result;
                    }
                    last_error = result.error.clone().unwrap_or_else(|| "Unknown error".into());
                }
                Ok(Err(message)) => {
                    last_error = message;
                }
                Err(_) => {
                    warn!(tool = tool_name, timeout_secs = timeout.as_secs_f64(), "tool execution timed out");
                    return ToolResult::err(format!("Tool timed out after {}s", timeout.as_secs_f64()))
                        .with_duration_ms(elapsed_ms(start));
                }
            }

            if attempt < tool.max_retries {
                debug!(tool = tool_name, attempt, error = %last_error, "tool failed, retrying");
                tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
            }
        }

        ToolResult::err(last_error).with_duration_ms(elapsed_ms(start))
    }

    pub async fn execute_batch(&self, calls: &[ToolCall], context: &ExecutionContext, parallel: bool) -> Vec<ToolResult> {
        if parallel {
            let futures = calls
                .iter()
                .map(|call| self.execute(&call.name, call.arguments.clone(), context));
            futures::future::join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(&call.name, call.arguments.clone(), context).await);
            }
            results
        }
    }

    async fn check_security(&self, security: &SecurityController, command: &str, context: &ExecutionContext) -> Option<ToolResult> {
        let user = User::new(
            if context.user_id.is_empty() { "agent" } else { &context.user_id },
            if context.user_id.is_empty() { "agent" } else { &context.user_id },
            context.role.unwrap_or(Role::Operator),
        );
        let security_ctx = SecurityContext {
            device_id: context.device_id.clone(),
            cwd: Some(context.cwd.clone()),
            env: context.env.clone(),
            interactive: context.interactive,
        };

        let decision = security.validate_and_approve(command, &user, &security_ctx).await;
        match decision.result {
            ValidationResult::Allow => None,
            ValidationResult::Blocked => Some(ToolResult::err(format!("Security: {}", decision.reason))),
            ValidationResult::ApprovalRequired => {
                Some(ToolResult::err(format!("Approval required: {}", decision.reason)))
            }
        }
    }
}

fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Validate `arguments` against a tool's JSON Schema: required properties
/// present, declared types respected. Not a full JSON Schema implementation
/// — just the subset the teacher's tools actually declare.
fn validate_arguments(schema: &Value, arguments: &Value) -> Option<String> {
    let required = schema.get("required").and_then(Value::as_array);
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = required {
        for param in required {
            let Some(name) = param.as_str() else { continue };
            if arguments.get(name).is_none() {
                return Some(format!("Missing required parameter: {name}"));
            }
        }
    }

    if let (Some(properties), Some(args)) = (properties, arguments.as_object()) {
        for (name, value) in args {
            let Some(expected_type) = properties.get(name).and_then(|p| p.get("type")).and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(value, expected_type) {
                return Some(format!("Invalid type for '{name}': expected {expected_type}"));
            }
        }
    }

    None
}

fn type_matches(value: &Value, expected_type: &str) -> bool {
    match expected_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}
