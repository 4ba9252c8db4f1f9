//! Coordinator (spec §4.G): fans a single goal across a set of devices
//! under one of three rollout strategies, aggregating per-device Agent Loop
//! runs into one [`OrchestrationResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::agent::{AgentConfig, AgentLoop};
use crate::config::OrchestratorConfig;
use crate::llm::LLMProvider;
use crate::security::{SecurityController, User};
use crate::tools::{ExecutionContext, ToolDefinition, ToolHandler, ToolRegistry};

use super::device::{DeviceResult, DeviceTarget};
use super::ssh::{SshCommandTool, SshExecutor};

/// How a goal is fanned out across the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutStrategy {
    /// Spawn every device's agent loop concurrently, bounded by the
    /// connection-pool semaphore, and aggregate when all complete.
    Parallel,
    /// Run one device at a time, in list order.
    Sequential,
    /// Run the first `count` devices and await their completion before
    /// touching the rest; `remainder_parallel` picks Parallel vs Sequential
    /// for the remainder, once the canary passes.
    Canary { count: usize, remainder_parallel: bool },
}

/// What a per-device failure does to the rest of the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Abort the rollout at the first failure.
    FailFast,
    /// Record the failure and keep going.
    Continue,
    /// Abort, then invoke a rollback command against every device the
    /// rollout actually contacted.
    Rollback,
}

impl FailurePolicy {
    fn aborts_on_failure(self) -> bool {
        !matches!(self, FailurePolicy::Continue)
    }
}

/// How an [`OrchestrationResult`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationStatus {
    Success,
    PartialFailure,
    Aborted,
}

/// Aggregated outcome of one Coordinator rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub results: HashMap<String, DeviceResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub status: OrchestrationStatus,
    pub elapsed_ms: u64,
}

/// Fans one goal across devices, one fresh [`AgentLoop`] per device with the
/// SSH executor as that device's tool transport.
#[derive(Clone)]
pub struct Coordinator {
    llm: Arc<dyn LLMProvider>,
    security: Option<Arc<SecurityController>>,
    agent_config: AgentConfig,
    ssh: Arc<SshExecutor>,
    semaphore: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        security: Option<Arc<SecurityController>>,
        agent_config: AgentConfig,
        orchestrator_config: &OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            security,
            agent_config,
            ssh: Arc::new(SshExecutor::new(
                orchestrator_config.max_concurrency,
                orchestrator_config.ssh_max_connections_per_host,
            )),
            semaphore: Arc::new(Semaphore::new(orchestrator_config.max_concurrency.max(1))),
        }
    }

    /// Run `goal` across `devices` under `strategy`, handling per-device
    /// failures per `failure_policy`. `rollback_command`, if given, is run
    /// (via the same SSH transport) on every contacted device when the
    /// rollout aborts under [`FailurePolicy::Rollback`].
    #[tracing::instrument(name = "coordinator.run", skip_all, fields(devices = devices.len()))]
    pub async fn run(
        &self,
        goal: &str,
        user: &User,
        devices: &[DeviceTarget],
        strategy: RolloutStrategy,
        failure_policy: FailurePolicy,
        rollback_command: Option<&str>,
    ) -> OrchestrationResult {
        let started = Instant::now();

        if devices.is_empty() {
            return OrchestrationResult {
                results: HashMap::new(),
                success_count: 0,
                failure_count: 0,
                status: OrchestrationStatus::Success,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        let mut results = HashMap::new();
        let mut aborted = false;
        let mut contacted: Vec<DeviceTarget> = Vec::new();

        match strategy {
            RolloutStrategy::Sequential => {
                for device in devices {
                    contacted.push(device.clone());
                    let result = self.run_device(goal, user, device).await;
                    let failed = !result.success;
                    results.insert(result.device_id.clone(), result);
                    if failed && failure_policy.aborts_on_failure() {
                        aborted = true;
                        break;
                    }
                }
            }
            RolloutStrategy::Parallel => {
                contacted.extend(devices.iter().cloned());
                let (batch, batch_aborted) = self.run_batch(goal, user, devices, failure_policy.aborts_on_failure()).await;
                results.extend(batch);
                aborted = batch_aborted;
            }
            RolloutStrategy::Canary { count, remainder_parallel } => {
                let count = count.min(devices.len());
                let (canaries, rest) = devices.split_at(count);
                contacted.extend(canaries.iter().cloned());

                let (canary_results, canary_aborted) =
                    self.run_batch(goal, user, canaries, failure_policy.aborts_on_failure()).await;
                let canary_failed = canary_results.values().any(|r| !r.success);
                results.extend(canary_results);

                if canary_failed && failure_policy.aborts_on_failure() {
                    aborted = true;
                    warn!(canary_count = count, "canary failed, remaining devices never contacted");
                } else {
                    aborted = canary_aborted && failure_policy.aborts_on_failure();
                    if !aborted && !rest.is_empty() {
                        contacted.extend(rest.iter().cloned());
                        if remainder_parallel {
                            let (batch, batch_aborted) =
                                self.run_batch(goal, user, rest, failure_policy.aborts_on_failure()).await;
                            results.extend(batch);
                            aborted = aborted || batch_aborted;
                        } else {
                            for device in rest {
                                let result = self.run_device(goal, user, device).await;
                                let failed = !result.success;
                                results.insert(result.device_id.clone(), result);
                                if failed && failure_policy.aborts_on_failure() {
                                    aborted = true;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        if aborted && matches!(failure_policy, FailurePolicy::Rollback) {
            if let Some(command) = rollback_command {
                info!(devices = contacted.len(), "rollback policy active, rolling back contacted devices");
                for device in &contacted {
                    let outcome = self.ssh.run(device, command).await;
                    if !outcome.success {
                        warn!(device = %device.id, error = ?outcome.error, "rollback command failed");
                    }
                }
            }
        }

        let success_count = results.values().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;
        let status = if aborted {
            OrchestrationStatus::Aborted
        } else if failure_count > 0 {
            OrchestrationStatus::PartialFailure
        } else {
            OrchestrationStatus::Success
        };

        OrchestrationResult {
            results,
            success_count,
            failure_count,
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run every device in `batch` concurrently, bounded by the Coordinator's
    /// connection-pool semaphore. When `fail_fast` is set, the first failure
    /// cancels any devices not yet started or in flight.
    async fn run_batch(&self, goal: &str, user: &User, batch: &[DeviceTarget], fail_fast: bool) -> (HashMap<String, DeviceResult>, bool) {
        let mut join_set = JoinSet::new();

        for device in batch {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => continue,
            };
            let this = self.clone();
            let goal = goal.to_owned();
            let user = user.clone();
            let device = device.clone();

            join_set.spawn(async move {
                let result = this.run_device(&goal, &user, &device).await;
                drop(permit);
                result
            });
        }

        let mut results = HashMap::new();
        let mut aborted = false;

        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(result) => {
                    let failed = !result.success;
                    results.insert(result.device_id.clone(), result);
                    if failed && fail_fast {
                        aborted = true;
                        join_set.shutdown().await;
                        break;
                    }
                }
                Err(join_err) => {
                    warn!(error = %join_err, "device task panicked");
                    if fail_fast {
                        aborted = true;
                        join_set.shutdown().await;
                        break;
                    }
                }
            }
        }

        (results, aborted)
    }

    /// Run one fresh [`AgentLoop`] against `target`, with the SSH executor
    /// bound in as that device's `shell.run` tool transport.
    async fn run_device(&self, goal: &str, user: &User, target: &DeviceTarget) -> DeviceResult {
        let start = Instant::now();

        let mut registry = ToolRegistry::new();
        let handler: Arc<dyn ToolHandler> = Arc::new(SshCommandTool::new(self.ssh.clone(), target.clone()));
        let schema = json!({
            "type": "object",
            "required": ["command"],
            "properties": { "command": { "type": "string", "description": "shell command to run on the device" } },
        });
        let definition = ToolDefinition::new("shell.run", "run a shell command on the target device", schema, handler)
            .with_timeout_secs(60.0);

        if let Err(err) = registry.register(definition) {
            return DeviceResult {
                device_id: target.id.clone(),
                success: false,
                output: String::new(),
                error: Some(err.render()),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }

        let exec_ctx = ExecutionContext {
            user_id: user.id.clone(),
            role: Some(*user.device_roles.get(&target.id).unwrap_or(&user.role)),
            cwd: "~".to_owned(),
            env: HashMap::new(),
            device_id: Some(target.id.clone()),
            interactive: false,
        };

        let agent = AgentLoop::new(self.llm.clone(), Arc::new(registry), self.security.clone(), self.agent_config.clone());
        let result = agent.run(goal, user, &exec_ctx).await;

        DeviceResult {
            device_id: target.id.clone(),
            success: result.success,
            output: result.response,
            error: result.error,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, LLMResponse, StopReason};
    use crate::security::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedLlm {
        replies: Mutex<Vec<Result<LLMResponse, crate::error::AgentShError>>>,
    }

    impl FixedLlm {
        fn always_done(text: &str) -> Self {
            Self {
                replies: Mutex::new(vec![Ok(LLMResponse {
                    content: text.to_owned(),
                    tool_calls: Vec::new(),
                    stop_reason: StopReason::EndTurn,
                    input_tokens: 0,
                    output_tokens: 0,
                    model: "test-model".to_owned(),
                })]),
            }
        }

        fn always_errors() -> Self {
            Self {
                replies: Mutex::new(vec![Err(crate::error::AgentShError::Provider {
                    provider: "test".to_owned(),
                    message: "down".to_owned(),
                })]),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for FixedLlm {
        async fn invoke(&self, _request: CompletionRequest) -> crate::error::Result<LLMResponse> {
            let replies = self.replies.lock().unwrap();
            replies[0].clone()
        }

        async fn stream(&self, _request: CompletionRequest) -> crate::error::Result<crate::llm::StreamResponse> {
            unimplemented!("not exercised by coordinator tests")
        }

        fn context_limit(&self) -> usize {
            8192
        }

        fn supports_tools(&self) -> bool {
            false
        }

        fn provider_name(&self) -> &str {
            "test"
        }
    }

    fn user() -> User {
        User::new("u1", "tester", Role::Operator)
    }

    fn orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig { max_concurrency: 4, ssh_max_connections_per_host: 2, default_canary_count: 1, rollback_on_failure: true }
    }

    #[tokio::test]
    async fn empty_device_list_is_trivially_successful() {
        let coordinator = Coordinator::new(Arc::new(FixedLlm::always_done("done")), None, AgentConfig::default(), &orchestrator_config());
        let result = coordinator.run("noop", &user(), &[], RolloutStrategy::Parallel, FailurePolicy::Continue, None).await;
        assert_eq!(result.status, OrchestrationStatus::Success);
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn each_device_appears_at_most_once() {
        let coordinator = Coordinator::new(Arc::new(FixedLlm::always_errors()), None, AgentConfig::default(), &orchestrator_config());
        let devices = vec![DeviceTarget::new("d1", "h1"), DeviceTarget::new("d2", "h2")];
        let result = coordinator
            .run("restart service x", &user(), &devices, RolloutStrategy::Sequential, FailurePolicy::Continue, None)
            .await;
        assert_eq!(result.results.len(), 2);
        assert!(result.results.contains_key("d1"));
        assert!(result.results.contains_key("d2"));
    }

    #[tokio::test]
    async fn sequential_fail_fast_stops_before_remaining_devices() {
        let coordinator = Coordinator::new(Arc::new(FixedLlm::always_errors()), None, AgentConfig::default(), &orchestrator_config());
        let devices = vec![
            DeviceTarget::new("d1", "h1"),
            DeviceTarget::new("d2", "h2"),
            DeviceTarget::new("d3", "h3"),
        ];
        let result = coordinator
            .run("restart service x", &user(), &devices, RolloutStrategy::Sequential, FailurePolicy::FailFast, None)
            .await;
        assert_eq!(result.status, OrchestrationStatus::Aborted);
        assert_eq!(result.results.len(), 1);
        assert!(result.results.contains_key("d1"));
    }

    #[tokio::test]
    async fn canary_failure_aborts_before_remainder_is_contacted() {
        let coordinator = Coordinator::new(Arc::new(FixedLlm::always_errors()), None, AgentConfig::default(), &orchestrator_config());
        let devices: Vec<DeviceTarget> = (1..=5).map(|n| DeviceTarget::new(format!("d{n}"), format!("h{n}"))).collect();
        let result = coordinator
            .run(
                "restart service x",
                &user(),
                &devices,
                RolloutStrategy::Canary { count: 1, remainder_parallel: true },
                FailurePolicy::Rollback,
                Some("systemctl start service-x"),
            )
            .await;
        assert_eq!(result.status, OrchestrationStatus::Aborted);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.success_count, 0);
        assert!(result.results.contains_key("d1"));
        assert!(!result.results.contains_key("d5"));
    }

    #[tokio::test]
    async fn canary_success_runs_remainder() {
        let coordinator = Coordinator::new(Arc::new(FixedLlm::always_done("ok")), None, AgentConfig::default(), &orchestrator_config());
        let devices: Vec<DeviceTarget> = (1..=3).map(|n| DeviceTarget::new(format!("d{n}"), format!("h{n}"))).collect();
        let result = coordinator
            .run(
                "restart service x",
                &user(),
                &devices,
                RolloutStrategy::Canary { count: 1, remainder_parallel: true },
                FailurePolicy::Rollback,
                Some("systemctl start service-x"),
            )
            .await;
        assert_eq!(result.status, OrchestrationStatus::Success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.success_count, 3);
    }
}
