//! End-to-end scenarios driving the public API: an LLM double scripted with
//! fixed replies, a minimal `shell.run` tool, and (where the scenario calls
//! for it) a real file-backed audit log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use agentsh::error::{AgentShError, Result as AgentResult};
use agentsh::llm::{CompletionRequest, LLMProvider, LLMResponse, StopReason, StreamResponse, ToolCall};
use agentsh::prelude::*;
use agentsh::security::{ApprovalFlow, ApprovalRequest, ApprovalResponse, ApprovalResult, AuditAction, AuditLogger, AutoApprover, PolicyManager, RiskLevel, SecurityPolicy};
use agentsh::tools::ToolDefinition;

struct ScriptedLlm {
    responses: Mutex<VecDeque<LLMResponse>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<LLMResponse>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn invoke(&self, _request: CompletionRequest) -> AgentResult<LLMResponse> {
        let mut responses = self.responses.lock().unwrap();
        Ok(responses.pop_front().unwrap_or(LLMResponse {
            content: "done".into(),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
            model: "test".into(),
        }))
    }

    async fn stream(&self, _request: CompletionRequest) -> AgentResult<StreamResponse> {
        unimplemented!("not exercised by these scenarios")
    }

    fn context_limit(&self) -> usize {
        8192
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

fn text_reply(text: &str) -> LLMResponse {
    LLMResponse {
        content: text.into(),
        tool_calls: vec![],
        stop_reason: StopReason::EndTurn,
        input_tokens: 0,
        output_tokens: 0,
        model: "test".into(),
    }
}

fn tool_call_reply(id: &str, command: &str) -> LLMResponse {
    LLMResponse {
        content: String::new(),
        tool_calls: vec![ToolCall { id: id.into(), name: "shell.run".into(), arguments: json!({"command": command}) }],
        stop_reason: StopReason::ToolUse,
        input_tokens: 0,
        output_tokens: 0,
        model: "test".into(),
    }
}

struct EchoHandler;

#[async_trait]
impl agentsh::tools::ToolHandler for EchoHandler {
    async fn execute(&self, args: Value) -> std::result::Result<agentsh::tools::ToolResult, String> {
        Ok(agentsh::tools::ToolResult::ok(args.get("command").and_then(Value::as_str).unwrap_or("").to_owned()))
    }
}

fn shell_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry
        .register(ToolDefinition::new(
            "shell.run",
            "run a shell command",
            json!({"type": "object", "required": ["command"], "properties": {"command": {"type": "string"}}}),
            Arc::new(EchoHandler),
        ))
        .unwrap();
    Arc::new(registry)
}

fn exec_ctx() -> ExecutionContext {
    ExecutionContext { cwd: "/tmp".into(), ..Default::default() }
}

fn audit_logger() -> (Arc<AuditLogger>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.ndjson");
    let logger = AuditLogger::new(path, "session-1".into(), 10 * 1024 * 1024).unwrap();
    (Arc::new(logger), dir)
}

/// Scenario 1: a safe shell command flows straight to a final answer that
/// reflects the tool's output.
#[tokio::test]
async fn safe_shell_command_completes_in_two_steps() {
    let llm = ScriptedLlm::new(vec![tool_call_reply("1", "ls"), text_reply("Contains foo and bar.")]);
    let security = Arc::new(SecurityController::new(
        Arc::new(PolicyManager::new(SecurityPolicy::standard())),
        Arc::new(AutoApprover::default()),
        None,
    ));
    let agent = AgentLoop::new(Arc::new(llm), shell_registry(), Some(security), AgentConfig::default());
    let user = User::new("u1", "Alice", Role::Operator);

    let result = agent.run("list current directory", &user, &exec_ctx()).await;

    assert!(result.success);
    assert_eq!(result.total_steps, 2);
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].risk_level, Some(RiskLevel::Safe));
    assert!(result.response.contains("foo") && result.response.contains("bar"));
}

/// Scenario 2: a command matching a CRITICAL pattern is blocked outright,
/// and the block is recorded in the audit log with the matching risk level.
#[tokio::test]
async fn blocked_destructive_command_is_audited_as_critical() {
    let llm = ScriptedLlm::new(vec![tool_call_reply("1", "rm -rf /"), text_reply("I cannot do that.")]);
    let (audit, _dir) = audit_logger();
    let security = Arc::new(SecurityController::new(
        Arc::new(PolicyManager::new(SecurityPolicy::standard())),
        Arc::new(AutoApprover::default()),
        Some(audit.clone()),
    ));
    let agent = AgentLoop::new(Arc::new(llm), shell_registry(), Some(security), AgentConfig::default());
    let user = User::new("u1", "Alice", Role::Admin);

    let result = agent.run("delete everything", &user, &exec_ctx()).await;

    assert!(result.success);
    assert_eq!(result.response, "I cannot do that.");
    assert!(!result.tool_calls[0].result.success);

    let blocked: Vec<_> = audit.get_by_action(AuditAction::CommandBlocked, 10);
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].risk_level, Some(RiskLevel::Critical));
}

/// Scenario 3: a HIGH-risk command a role may run with approval is approved
/// and executed, with exactly one `COMMAND_APPROVED` audit entry.
///
/// Per the role×risk matrix, HIGH is BLOCK for OPERATOR and APPROVE for
/// ADMIN; this uses ADMIN so the command actually reaches the approval gate.
#[tokio::test]
async fn high_risk_command_approved_then_executed() {
    let llm = ScriptedLlm::new(vec![tool_call_reply("1", "rm -rf ./build"), text_reply("Removed the build directory.")]);
    let (audit, _dir) = audit_logger();
    let security = Arc::new(SecurityController::new(
        Arc::new(PolicyManager::new(SecurityPolicy::standard())),
        Arc::new(AutoApprover::new(vec![RiskLevel::High])),
        Some(audit.clone()),
    ));
    let agent = AgentLoop::new(Arc::new(llm), shell_registry(), Some(security), AgentConfig::default());
    let user = User::new("u1", "Bob", Role::Admin);

    let result = agent.run("remove the build directory recursively", &user, &exec_ctx()).await;

    assert!(result.success);
    assert_eq!(result.tool_calls.len(), 1);
    assert!(result.tool_calls[0].result.success);
    assert_eq!(result.tool_calls[0].risk_level, Some(RiskLevel::High));

    let approved = audit.get_by_action(AuditAction::CommandApproved, 10);
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].risk_level, Some(RiskLevel::High));
}

/// An approval flow that always edits the command once, then (on the
/// edit-loop guard's re-entry) would edit again — exercising the
/// re-entry-once livelock guard.
struct AlwaysEdits {
    edited_to: String,
}

#[async_trait]
impl ApprovalFlow for AlwaysEdits {
    async fn request_approval(&self, _request: &ApprovalRequest) -> ApprovalResponse {
        ApprovalResponse {
            result: ApprovalResult::Edited,
            command: self.edited_to.clone(),
            approver: "bob".into(),
            timestamp: chrono::Utc::now(),
            reason: None,
        }
    }
}

/// Scenario 4: an approval response that edits the command re-enters the
/// pipeline once; the edited command (still HIGH) is then auto-denied by
/// the livelock guard rather than prompted a second time, and the audit
/// log shows the edit.
#[tokio::test]
async fn edited_approval_is_denied_on_second_pass_and_audited() {
    let llm = ScriptedLlm::new(vec![tool_call_reply("1", "rm -rf ./build"), text_reply("Could not remove it.")]);
    let (audit, _dir) = audit_logger();
    let security = Arc::new(SecurityController::new(
        Arc::new(PolicyManager::new(SecurityPolicy::standard())),
        Arc::new(AlwaysEdits { edited_to: "rm -rf ./build-tmp".into() }),
        Some(audit.clone()),
    ));
    let agent = AgentLoop::new(Arc::new(llm), shell_registry(), Some(security), AgentConfig::default());
    let user = User::new("u1", "Bob", Role::Admin);

    let result = agent.run("remove the build directory recursively", &user, &exec_ctx()).await;

    assert!(result.success);
    assert!(!result.tool_calls[0].result.success);

    let denied = audit.get_by_action(AuditAction::CommandDenied, 10);
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].risk_level, Some(RiskLevel::High));
}

/// Scenario 5: a rate-limit error on the first LLM call is recovered from;
/// the second call succeeds and the loop reports one extra step for the
/// recovery pass.
#[tokio::test]
async fn rate_limit_error_recovers_on_second_attempt() {
    struct FlakyOnce {
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl LLMProvider for FlakyOnce {
        async fn invoke(&self, _request: CompletionRequest) -> AgentResult<LLMResponse> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(AgentShError::RateLimit { provider: "test".into(), retry_after_secs: None });
            }
            Ok(text_reply("All good now."))
        }

        async fn stream(&self, _request: CompletionRequest) -> AgentResult<StreamResponse> {
            unimplemented!("not exercised by this scenario")
        }

        fn context_limit(&self) -> usize {
            8192
        }

        fn supports_tools(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "flaky-once"
        }
    }

    let llm = FlakyOnce { failed: std::sync::atomic::AtomicBool::new(false) };
    let security = Arc::new(SecurityController::new(
        Arc::new(PolicyManager::new(SecurityPolicy::standard())),
        Arc::new(AutoApprover::default()),
        None,
    ));
    let agent = AgentLoop::new(Arc::new(llm), shell_registry(), Some(security), AgentConfig::default());
    let user = User::new("u1", "Alice", Role::Operator);

    let result = agent.run("do something simple", &user, &exec_ctx()).await;

    assert!(result.success);
    assert_eq!(result.response, "All good now.");
    assert!(result.total_steps >= 2);
}
