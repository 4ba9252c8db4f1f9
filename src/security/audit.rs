//! Audit log (spec §4.D, §8): append-only NDJSON security event log with
//! size-based rotation.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::risk::RiskLevel;
use crate::error::{AgentShError, Result};

/// The full vocabulary of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CommandExecuted,
    CommandBlocked,
    CommandApproved,
    CommandDenied,
    CommandEdited,
    ApprovalTimeout,
    SessionStart,
    SessionEnd,
    ToolInvoked,
    ToolFailed,
    ConfigChanged,
    SecurityViolation,
}

/// A single audit event. Optional fields are omitted from the serialized
/// line when absent, matching spec §8's audit log shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub user: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, user: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            user: user.into(),
            command: command.into(),
            risk_level: None,
            result: None,
            approver: None,
            device_id: None,
            session_id: None,
            metadata: None,
        }
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = Some(risk);
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Append-only NDJSON audit log, rotated when it grows past
/// `max_file_size` bytes.
pub struct AuditLogger {
    log_path: PathBuf,
    session_id: String,
    max_file_size: u64,
    file: Mutex<()>,
}

impl AuditLogger {
    pub fn new(log_path: PathBuf, session_id: String, max_file_size: u64) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AgentShError::Config(format!("creating audit log dir: {e}")))?;
        }
        Ok(Self {
            log_path,
            session_id,
            max_file_size,
            file: Mutex::new(()),
        })
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentsh")
            .join("audit.log")
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log(&self, mut event: AuditEvent) -> Result<()> {
        let _guard = self.file.lock().expect("audit log lock poisoned");
        if event.session_id.is_none() {
            event.session_id = Some(self.session_id.clone());
        }

        self.rotate_if_needed()?;

        let line = serde_json::to_string(&event)
            .map_err(|e| AgentShError::Config(format!("serializing audit event: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| AgentShError::Config(format!("opening audit log: {e}")))?;
        writeln!(file, "{line}").map_err(|e| AgentShError::Config(format!("writing audit log: {e}")))?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let Ok(meta) = fs::metadata(&self.log_path) else {
            return Ok(());
        };
        if meta.len() < self.max_file_size {
            return Ok(());
        }
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let rotated = rotated_path(&self.log_path, &timestamp.to_string());
        fs::rename(&self.log_path, rotated)
            .map_err(|e| AgentShError::Config(format!("rotating audit log: {e}")))?;
        Ok(())
    }

    /// Most recent `n` events, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<AuditEvent> {
        let Ok(contents) = fs::read_to_string(&self.log_path) else {
            return Vec::new();
        };
        contents
            .lines()
            .rev()
            .take(n)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn get_by_user(&self, user: &str, limit: usize) -> Vec<AuditEvent> {
        self.get_recent(limit * 10)
            .into_iter()
            .filter(|e| e.user == user)
            .take(limit)
            .collect()
    }

    pub fn get_by_action(&self, action: AuditAction, limit: usize) -> Vec<AuditEvent> {
        self.get_recent(limit * 10)
            .into_iter()
            .filter(|e| e.action == action)
            .take(limit)
            .collect()
    }

    // Convenience constructors mirroring the common event shapes.

    pub fn log_command_executed(&self, command: &str, user: &str, risk: RiskLevel, device_id: Option<&str>) -> Result<()> {
        let mut event = AuditEvent::new(AuditAction::CommandExecuted, user, command)
            .with_risk(risk)
            .with_result("success");
        if let Some(id) = device_id {
            event = event.with_device(id);
        }
        self.log(event)
    }

    pub fn log_command_blocked(&self, command: &str, reason: &str, user: &str, risk: RiskLevel) -> Result<()> {
        self.log(
            AuditEvent::new(AuditAction::CommandBlocked, user, command)
                .with_risk(risk)
                .with_result(reason),
        )
    }

    pub fn log_command_approved(&self, command: &str, approver: &str, user: &str, risk: RiskLevel) -> Result<()> {
        self.log(
            AuditEvent::new(AuditAction::CommandApproved, user, command)
                .with_risk(risk)
                .with_approver(approver),
        )
    }

    pub fn log_command_denied(&self, command: &str, reason: &str, user: &str, risk: RiskLevel) -> Result<()> {
        self.log(
            AuditEvent::new(AuditAction::CommandDenied, user, command)
                .with_risk(risk)
                .with_result(reason),
        )
    }

    pub fn log_session_start(&self, user: &str) -> Result<()> {
        self.log(AuditEvent::new(AuditAction::SessionStart, user, "session_start"))
    }

    pub fn log_session_end(&self, user: &str) -> Result<()> {
        self.log(AuditEvent::new(AuditAction::SessionEnd, user, "session_end"))
    }

    pub fn log_security_violation(&self, description: &str, command: &str, user: &str) -> Result<()> {
        self.log(
            AuditEvent::new(AuditAction::SecurityViolation, user, command)
                .with_risk(RiskLevel::Critical)
                .with_result(description),
        )
    }
}

fn rotated_path(path: &Path, timestamp: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("audit");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log");
    path.with_file_name(format!("{stem}.{timestamp}.{ext}"))
}
