//! SSH executor (spec §4.G): the tool transport for command-executing tools
//! on a remote device. Maintains a connection pool keyed by (host, user,
//! port, key fingerprint), applies a host-level max-connections cap, and
//! bounds overall connection acquisition with a global semaphore sized from
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::tools::{ToolHandler, ToolResult};

use super::device::DeviceTarget;

/// Shells out to the system `ssh` binary, pooling per-host connection
/// permits and bounding total in-flight connections with a global
/// semaphore. There is no SSH crate in the dependency tree, and libssh2/
/// russh bindings would be a new, un-grounded dependency — `ssh` on PATH,
/// located once via `which`, is the transport.
pub struct SshExecutor {
    ssh_binary: Option<std::path::PathBuf>,
    global: Arc<Semaphore>,
    per_host_cap: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new(max_connections: usize, per_host_cap: usize) -> Self {
        Self {
            ssh_binary: which::which("ssh").ok(),
            global: Arc::new(Semaphore::new(max_connections.max(1))),
            per_host_cap: per_host_cap.max(1),
            per_host: Mutex::new(HashMap::new()),
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn host_semaphore(&self, target: &DeviceTarget) -> Arc<Semaphore> {
        let mut pools = self.per_host.lock().await;
        pools
            .entry(target.pool_key())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_cap)))
            .clone()
    }

    /// Run `command` on `target`, acquiring a global permit and a per-host
    /// permit before connecting. Returns a normalized [`ToolResult`] the
    /// same shape a local command-executing tool would produce.
    pub async fn run(&self, target: &DeviceTarget, command: &str) -> ToolResult {
        let start = Instant::now();

        let Some(ssh) = &self.ssh_binary else {
            return ToolResult::err("ssh binary not found on PATH");
        };

        let _global_permit = match self.global.acquire().await {
            Ok(permit) => permit,
            Err(_) => return ToolResult::err("connection pool closed"),
        };
        let host_sem = self.host_semaphore(target).await;
        let _host_permit = match host_sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return ToolResult::err("host connection pool closed"),
        };

        debug!(device = %target.id, host = %target.host, "acquired ssh connection permit");

        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "StrictHostKeyChecking=accept-new".to_owned(),
            "-p".to_owned(),
            target.port.to_string(),
        ];
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_owned());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", target.user, target.host));
        args.push(command.to_owned());

        let spawned = Command::new(ssh).args(&args).kill_on_drop(true).output();

        match tokio::time::timeout(self.command_timeout, spawned).await {
            Ok(Ok(output)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    ToolResult::ok(stdout).with_duration_ms(duration_ms).with_exit_code(output.status.code().unwrap_or(0))
                } else {
                    let message = if stderr.trim().is_empty() { stdout } else { stderr };
                    ToolResult::err(message)
                        .with_duration_ms(duration_ms)
                        .with_exit_code(output.status.code().unwrap_or(-1))
                }
            }
            Ok(Err(err)) => {
                warn!(device = %target.id, error = %err, "failed to spawn ssh");
                ToolResult::err(format!("failed to spawn ssh: {err}")).with_duration_ms(start.elapsed().as_millis() as u64)
            }
            Err(_) => {
                warn!(device = %target.id, "ssh command timed out");
                ToolResult::err(format!("ssh command timed out after {}s", self.command_timeout.as_secs()))
                    .with_duration_ms(start.elapsed().as_millis() as u64)
            }
        }
    }
}

/// A `ToolHandler` that runs `command` on one fixed device over SSH. Bound
/// into a per-device [`crate::tools::ToolRegistry`] as `"shell.run"` so the
/// Agent Loop's tool calls are transparently transported to that device.
pub struct SshCommandTool {
    executor: Arc<SshExecutor>,
    target: DeviceTarget,
}

impl SshCommandTool {
    pub fn new(executor: Arc<SshExecutor>, target: DeviceTarget) -> Self {
        Self { executor, target }
    }
}

#[async_trait]
impl ToolHandler for SshCommandTool {
    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required parameter: command".to_owned())?;
        Ok(self.executor.run(&self.target, command).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_ssh_binary_reports_clean_error() {
        let mut executor = SshExecutor::new(4, 2);
        executor.ssh_binary = None;
        let target = DeviceTarget::new("d1", "unreachable.invalid");
        let result = executor.run(&target, "true").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ssh binary"));
    }

    #[tokio::test]
    async fn host_semaphore_is_reused_across_calls() {
        let executor = SshExecutor::new(4, 2);
        let target = DeviceTarget::new("d1", "host.example");
        let first = executor.host_semaphore(&target).await;
        let second = executor.host_semaphore(&target).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn command_tool_requires_command_argument() {
        let executor = Arc::new(SshExecutor::new(1, 1));
        let tool = SshCommandTool::new(executor, DeviceTarget::new("d1", "host.example"));
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
