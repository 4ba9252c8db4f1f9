//! `AgentLoop` — the step-bounded ReAct state machine driving one goal
//! through the LLM, the tool registry, and human-in-the-loop security
//! (spec §4.F).
//!
//! ```text
//!            ┌─────────────────────────────────────┐
//!            │                                     ▼
//!    [ready]─►[agent]──►{decide}──► tools ──► agent ─► …
//!                          │ \──► approval ──► {tools | agent}
//!                          │ \──► recovery ──► agent
//!                          └──► end
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::AgentShError;
use crate::llm::{CompletionRequest, LLMProvider, Message, StopReason, ToolCall as LlmToolCall};
use crate::security::{SecurityContext, SecurityController, User, ValidationResult};
use crate::tools::{ExecutionContext, ToolRegistry, ToolResult, ToolRunner, COMMAND_TOOLS};

use super::state::{AgentResult, AgentState, AgentStatus, PendingApproval, ToolCallRecord};

/// Runtime configuration for an `AgentLoop` run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_steps: usize,
    pub max_recovery_attempts: usize,
    pub overall_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_owned(),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            max_steps: 20,
            max_recovery_attempts: 2,
            overall_timeout_secs: 300,
        }
    }
}

/// Drives one goal through the ReAct loop for a single device/session.
pub struct AgentLoop {
    llm: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    runner: Arc<ToolRunner>,
    security: Option<Arc<SecurityController>>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        registry: Arc<ToolRegistry>,
        security: Option<Arc<SecurityController>>,
        config: AgentConfig,
    ) -> Self {
        // The loop owns the security decision explicitly (triage + approval
        // nodes below); the runner it drives is given no SecurityController
        // of its own so a tool call is never evaluated for risk twice.
        let runner = Arc::new(ToolRunner::new(registry.clone(), None));
        Self { llm, registry, runner, security, config }
    }

    /// Run `goal` to completion (or exhaustion) under `user`/`exec_ctx`.
    pub async fn run(&self, goal: &str, user: &User, exec_ctx: &ExecutionContext) -> AgentResult {
        let mut state = AgentState::new(self.config.max_steps, self.config.max_recovery_attempts);
        state.messages.push(Message::system(self.build_system_prompt(exec_ctx)));
        state.messages.push(Message::user(goal));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.overall_timeout_secs);

        'outer: loop {
            if tokio::time::Instant::now() >= deadline {
                state.cancelled = true;
                break;
            }

            self.agent_node(&mut state, user, exec_ctx).await;

            // Drain whatever the agent step queued (approvals, then the tool
            // calls they release) until there's nothing left to do without
            // another LLM turn.
            loop {
                match self.decide(&state) {
                    Route::End => break 'outer,
                    Route::Agent => break,
                    Route::Recovery => {
                        self.recovery_node(&mut state);
                        break;
                    }
                    Route::Approval => self.approval_node(&mut state, user, exec_ctx).await,
                    Route::Tools => self.tools_node(&mut state, user, exec_ctx).await,
                }
            }

            if state.terminal || state.cancelled {
                break;
            }
        }

        let status = if state.cancelled {
            AgentStatus::Cancelled
        } else if state.error.is_some() {
            AgentStatus::Error
        } else if state.step_count >= state.max_steps && state.final_result.is_none() {
            AgentStatus::MaxStepsReached
        } else {
            AgentStatus::Success
        };

        if state.final_result.is_none() {
            state.final_result = Some(match status {
                AgentStatus::MaxStepsReached => "maximum steps reached before a final answer".to_owned(),
                AgentStatus::Cancelled => "cancelled".to_owned(),
                _ => state.error.as_ref().map(AgentShError::render).unwrap_or_default(),
            });
        }

        AgentResult::from_state(&state, status)
    }

    fn build_system_prompt(&self, exec_ctx: &ExecutionContext) -> String {
        let tool_names = self.registry.list_names().join(", ");
        format!(
            "You are an autonomous shell agent with access to the following tools: {tools}.\n\
             Working directory: {cwd}\n\
             Device: {device}\n\
             Current time (UTC): {now}\n\
             Use tools to accomplish the user's goal, one reasoned step at a time. \
             When you have a final answer, respond without requesting further tool calls.",
            tools = if tool_names.is_empty() { "(none registered)".to_owned() } else { tool_names },
            cwd = exec_ctx.cwd,
            device = exec_ctx.device_id.as_deref().unwrap_or("local"),
            now = Utc::now().to_rfc3339(),
        )
    }

    // ─── agent node ──────────────────────────────────────────────────

    async fn agent_node(&self, state: &mut AgentState, user: &User, exec_ctx: &ExecutionContext) {
        state.step_count += 1;
        info!(step = state.step_count, "agent node invoked");

        let request = CompletionRequest::new(self.config.model.clone(), state.messages.clone())
            .with_tools(self.registry.to_openai_schemas());
        let request = match self.config.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        };
        let request = match self.config.max_tokens {
            Some(t) => request.with_max_tokens(t),
            None => request,
        };

        match self.llm.invoke(request).await {
            Ok(response) => {
                if response.stop_reason == StopReason::MaxTokens {
                    state.messages.push(Message::assistant(&response.content));
                    state.messages.push(Message::user(
                        "[continue: the previous response was truncated by the token limit]",
                    ));
                    return;
                }

                if response.tool_calls.is_empty() {
                    state.messages.push(Message::assistant(&response.content));
                    state.final_result = Some(response.content);
                    state.terminal = true;
                    return;
                }

                state.messages.push(Message::assistant_with_tool_calls(&response.content, response.tool_calls.clone()));
                self.triage_tool_calls(state, response.tool_calls, user, exec_ctx).await;
            }
            Err(err) => {
                warn!(error = %err, "LLM invocation failed");
                state.error = Some(err);
            }
        }
    }

    /// Classify each newly emitted tool call: outright blocked calls are
    /// resolved immediately with a synthetic denial; calls needing human
    /// sign-off go to `approvals_pending`; everything else is queued for
    /// direct execution.
    async fn triage_tool_calls(&self, state: &mut AgentState, calls: Vec<LlmToolCall>, user: &User, exec_ctx: &ExecutionContext) {
        for call in calls {
            let Some(command) = command_argument(&call) else {
                state.pending_tool_calls.push_back(call);
                continue;
            };

            let Some(security) = &self.security else {
                state.pending_tool_calls.push_back(call);
                continue;
            };

            let security_ctx = to_security_context(exec_ctx);
            let decision = security.decide(&command, user, &security_ctx);

            match decision.result {
                ValidationResult::Allow => state.pending_tool_calls.push_back(call),
                ValidationResult::ApprovalRequired => {
                    state.approvals_pending.push_back(PendingApproval { call, decision })
                }
                ValidationResult::Blocked => {
                    state.messages.push(Message::tool_result(
                        call.id.clone(),
                        format!("<tool blocked: {}>", decision.reason),
                    ));
                    state.tool_call_records.push(ToolCallRecord {
                        call_id: call.id,
                        tool_name: call.name,
                        arguments: call.arguments,
                        result: ToolResult::err(decision.reason),
                        risk_level: Some(decision.risk_level),
                        approved: Some(false),
                    });
                }
            }
        }
    }

    // ─── decide routing ──────────────────────────────────────────────

    fn decide(&self, state: &AgentState) -> Route {
        if state.terminal || state.cancelled {
            Route::End
        } else if state.error.is_some() {
            Route::Recovery
        } else if state.step_count >= state.max_steps {
            Route::End
        } else if !state.approvals_pending.is_empty() {
            Route::Approval
        } else if !state.pending_tool_calls.is_empty() {
            Route::Tools
        } else {
            Route::Agent
        }
    }

    // ─── approval node ───────────────────────────────────────────────

    async fn approval_node(&self, state: &mut AgentState, user: &User, exec_ctx: &ExecutionContext) {
        let Some(security) = &self.security else {
            state.approvals_pending.clear();
            return;
        };

        let pending: Vec<PendingApproval> = state.approvals_pending.drain(..).collect();
        let security_ctx = to_security_context(exec_ctx);

        for PendingApproval { call, decision } in pending {
            let Some(command) = command_argument(&call) else {
                state.pending_tool_calls.push_back(call);
                continue;
            };

            let resolved = security.validate_and_approve(&command, user, &security_ctx).await;

            match resolved.result {
                ValidationResult::Allow => {
                    let call = match resolved.edited_command {
                        Some(edited) => rewrite_command(call, &edited),
                        None => call,
                    };
                    state.pending_tool_calls.push_back(call);
                }
                ValidationResult::ApprovalRequired | ValidationResult::Blocked => {
                    state.messages.push(Message::tool_result(
                        call.id.clone(),
                        format!("<tool denied: {}>", resolved.reason),
                    ));
                    state.tool_call_records.push(ToolCallRecord {
                        call_id: call.id,
                        tool_name: call.name,
                        arguments: call.arguments,
                        result: ToolResult::err(resolved.reason),
                        risk_level: Some(decision.risk_level),
                        approved: Some(false),
                    });
                }
            }
        }
    }

    // ─── tools node ──────────────────────────────────────────────────

    async fn tools_node(&self, state: &mut AgentState, _user: &User, exec_ctx: &ExecutionContext) {
        let calls: VecDeque<LlmToolCall> = std::mem::take(&mut state.pending_tool_calls);

        for call in calls {
            let risk_level = command_argument(&call).map(|cmd| crate::security::classify(&cmd).0);

            debug!(tool = %call.name, "executing tool call");
            let result = self
                .runner
                .execute(&call.name, call.arguments.clone(), exec_ctx)
                .await;

            state.messages.push(Message::tool_result(call.id.clone(), result.to_llm_format()));
            state.tool_call_records.push(ToolCallRecord {
                call_id: call.id,
                tool_name: call.name,
                arguments: call.arguments,
                result,
                risk_level,
                approved: risk_level.map(|_| true),
            });
        }
    }

    // ─── recovery node ───────────────────────────────────────────────

    fn recovery_node(&self, state: &mut AgentState) {
        let Some(error) = state.error.take() else { return };

        if state.recovery_attempts >= state.max_recovery_attempts {
            state.error = Some(error);
            state.terminal = true;
            return;
        }

        state.recovery_attempts += 1;
        warn!(attempt = state.recovery_attempts, error = %error, "recovering from error");
        state.messages.push(Message::system(format!(
            "[recovering from error, attempt {}/{}]: {}",
            state.recovery_attempts, state.max_recovery_attempts, error
        )));
    }
}

enum Route {
    End,
    Agent,
    Recovery,
    Approval,
    Tools,
}

fn command_argument(call: &LlmToolCall) -> Option<String> {
    if !COMMAND_TOOLS.contains(&call.name.as_str()) {
        return None;
    }
    call.arguments.get("command").and_then(serde_json::Value::as_str).map(str::to_owned)
}

fn rewrite_command(mut call: LlmToolCall, edited: &str) -> LlmToolCall {
    if let Some(obj) = call.arguments.as_object_mut() {
        obj.insert("command".to_owned(), serde_json::Value::String(edited.to_owned()));
    }
    call
}

fn to_security_context(exec_ctx: &ExecutionContext) -> SecurityContext {
    SecurityContext {
        device_id: exec_ctx.device_id.clone(),
        cwd: Some(exec_ctx.cwd.clone()),
        env: exec_ctx.env.clone(),
        interactive: exec_ctx.interactive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, StreamResponse};
    use crate::security::{AutoApprover, PolicyManager, RiskLevel, Role, SecurityPolicy};
    use crate::tools::{ToolDefinition, ToolHandler};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct ScriptedLlm {
        responses: std::sync::Mutex<VecDeque<LLMResponse>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<LLMResponse>) -> Self {
            Self { responses: std::sync::Mutex::new(responses.into()) }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn invoke(&self, _request: CompletionRequest) -> crate::error::Result<LLMResponse> {
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

        async fn stream(&self, _request: CompletionRequest) -> crate::error::Result<StreamResponse> {
            unimplemented!("not used in tests")
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

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok(args.get("command").and_then(Value::as_str).unwrap_or("").to_owned()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
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

    fn llm_call(id: &str, command: &str) -> crate::llm::ToolCall {
        crate::llm::ToolCall { id: id.into(), name: "shell.run".into(), arguments: json!({"command": command}) }
    }

    fn security() -> Arc<SecurityController> {
        Arc::new(SecurityController::new(
            Arc::new(PolicyManager::new(SecurityPolicy::standard())),
            Arc::new(AutoApprover::default()),
            None,
        ))
    }

    fn exec_ctx() -> ExecutionContext {
        ExecutionContext { cwd: "/tmp".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn safe_command_flows_straight_through_to_completion() {
        let llm = ScriptedLlm::new(vec![
            LLMResponse {
                content: String::new(),
                tool_calls: vec![llm_call("1", "ls -la")],
                stop_reason: StopReason::ToolUse,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
            LLMResponse {
                content: "done listing".into(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
        ]);

        let agent = AgentLoop::new(Arc::new(llm), registry(), Some(security()), AgentConfig::default());
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("list files", &user, &exec_ctx()).await;

        assert!(result.success);
        assert_eq!(result.response, "done listing");
        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_calls[0].result.success);
    }

    #[tokio::test]
    async fn critical_command_is_blocked_before_execution() {
        let llm = ScriptedLlm::new(vec![
            LLMResponse {
                content: String::new(),
                tool_calls: vec![llm_call("1", "rm -rf /")],
                stop_reason: StopReason::ToolUse,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
            LLMResponse {
                content: "cannot comply".into(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
        ]);

        let agent = AgentLoop::new(Arc::new(llm), registry(), Some(security()), AgentConfig::default());
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("wipe the disk", &user, &exec_ctx()).await;

        assert_eq!(result.tool_calls.len(), 1);
        assert!(!result.tool_calls[0].result.success);
        assert_eq!(result.tool_calls[0].risk_level, Some(RiskLevel::Critical));
    }

    #[tokio::test]
    async fn medium_risk_command_is_approved_then_executed() {
        let llm = ScriptedLlm::new(vec![
            LLMResponse {
                content: String::new(),
                tool_calls: vec![llm_call("1", "apt-get install vim")],
                stop_reason: StopReason::ToolUse,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
            LLMResponse {
                content: "installed".into(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
        ]);

        let approver = Arc::new(AutoApprover::new(vec![RiskLevel::Medium]));
        let security = Arc::new(SecurityController::new(
            Arc::new(PolicyManager::new(SecurityPolicy::standard())),
            approver,
            None,
        ));

        let agent = AgentLoop::new(Arc::new(llm), registry(), Some(security), AgentConfig::default());
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("install vim", &user, &exec_ctx()).await;

        assert!(result.success);
        assert!(result.tool_calls[0].result.success);
    }

    #[tokio::test]
    async fn denied_approval_injects_synthetic_denial_and_continues() {
        let llm = ScriptedLlm::new(vec![
            LLMResponse {
                content: String::new(),
                tool_calls: vec![llm_call("1", "apt-get install vim")],
                stop_reason: StopReason::ToolUse,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
            LLMResponse {
                content: "could not install, user declined".into(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                input_tokens: 0,
                output_tokens: 0,
                model: "test".into(),
            },
        ]);

        let security = Arc::new(SecurityController::new(
            Arc::new(PolicyManager::new(SecurityPolicy::standard())),
            Arc::new(AutoApprover::deny_all()),
            None,
        ));

        let agent = AgentLoop::new(Arc::new(llm), registry(), Some(security), AgentConfig::default());
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("install vim", &user, &exec_ctx()).await;

        assert!(result.success);
        assert!(!result.tool_calls[0].result.success);
        assert!(matches!(result.status, AgentStatus::Success));
    }

    #[tokio::test]
    async fn max_steps_reached_without_final_answer() {
        let endless = LLMResponse {
            content: String::new(),
            tool_calls: vec![llm_call("1", "ls")],
            stop_reason: StopReason::ToolUse,
            input_tokens: 0,
            output_tokens: 0,
            model: "test".into(),
        };
        let llm = ScriptedLlm::new(std::iter::repeat(endless).take(10).collect());
        let config = AgentConfig { max_steps: 3, ..AgentConfig::default() };
        let agent = AgentLoop::new(Arc::new(llm), registry(), Some(security()), config);
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("loop forever", &user, &exec_ctx()).await;

        assert!(!result.success);
        assert!(matches!(result.status, AgentStatus::MaxStepsReached));
        assert_eq!(result.total_steps, 3);
    }

    #[tokio::test]
    async fn provider_error_exhausts_recovery_then_ends_with_error() {
        struct AlwaysFails;
        #[async_trait]
        impl LLMProvider for AlwaysFails {
            async fn invoke(&self, _request: CompletionRequest) -> crate::error::Result<LLMResponse> {
                Err(AgentShError::RateLimit { provider: "test".into(), retry_after_secs: None })
            }
            async fn stream(&self, _request: CompletionRequest) -> crate::error::Result<StreamResponse> {
                unimplemented!()
            }
            fn context_limit(&self) -> usize {
                8192
            }
            fn supports_tools(&self) -> bool {
                true
            }
            fn provider_name(&self) -> &str {
                "always-fails"
            }
        }

        let config = AgentConfig { max_recovery_attempts: 2, ..AgentConfig::default() };
        let agent = AgentLoop::new(Arc::new(AlwaysFails), registry(), Some(security()), config);
        let user = User::new("u1", "Alice", Role::Operator);
        let result = agent.run("do anything", &user, &exec_ctx()).await;

        assert!(!result.success);
        assert!(matches!(result.status, AgentStatus::Error));
        assert!(result.error.is_some());
    }
}
