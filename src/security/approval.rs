//! Human-in-the-loop approval (spec §4.D): a pluggable flow that turns an
//! [`ApprovalRequest`] into an [`ApprovalResponse`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::risk::RiskLevel;

/// Outcome of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalResult {
    Approved,
    Denied,
    Edited,
    Timeout,
    Skipped,
}

/// A command awaiting human approval.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub command: String,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub context: HashMap<String, String>,
    pub timeout_secs: f64,
}

impl ApprovalRequest {
    pub fn new(command: impl Into<String>, risk_level: RiskLevel, reasons: Vec<String>) -> Self {
        Self {
            command: command.into(),
            risk_level,
            reasons,
            context: HashMap::new(),
            timeout_secs: 30.0,
        }
    }
}

/// The human's (or auto-approver's) decision.
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub result: ApprovalResult,
    /// The command to execute: identical to the request unless `result`
    /// is `Edited`.
    pub command: String,
    pub approver: String,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

impl ApprovalResponse {
    fn new(result: ApprovalResult, command: impl Into<String>, approver: impl Into<String>) -> Self {
        Self {
            result,
            command: command.into(),
            approver: approver.into(),
            timestamp: Utc::now(),
            reason: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Pluggable human-in-the-loop approval mechanism.
#[async_trait]
pub trait ApprovalFlow: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalResponse;
}

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

fn risk_color(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::Safe => "\x1b[32m",
        RiskLevel::Low | RiskLevel::Medium => "\x1b[33m",
        RiskLevel::High => "\x1b[31m",
        RiskLevel::Critical => "\x1b[91m",
    }
}

/// Interactive terminal approval flow: prompts on stderr, reads a line from
/// stdin. `yes/no/edit/skip`; anything else (including EOF) is treated as a
/// denial. Times out after `request.timeout_secs`.
pub struct InteractiveApprovalFlow {
    use_color: bool,
    approver: String,
}

impl InteractiveApprovalFlow {
    pub fn new(approver: impl Into<String>, use_color: bool) -> Self {
        Self {
            use_color,
            approver: approver.into(),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.use_color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_owned()
        }
    }

    fn render_request(&self, request: &ApprovalRequest) -> String {
        let color = risk_color(request.risk_level);
        let mut out = String::new();
        out.push_str(&"=".repeat(60));
        out.push('\n');
        out.push_str(&self.colorize(&format!("{BOLD}  APPROVAL REQUIRED  {RESET}"), color));
        out.push('\n');
        out.push_str(&"=".repeat(60));
        out.push_str(&format!(
            "\n  Risk Level: {}\n  Command:\n    {}\n",
            self.colorize(request.risk_level.as_str(), color),
            self.colorize(&request.command, BOLD),
        ));
        if !request.reasons.is_empty() {
            out.push_str("  Reasons:\n");
            for reason in &request.reasons {
                out.push_str(&format!("    - {reason}\n"));
            }
        }
        if !request.context.is_empty() {
            out.push_str("  Context:\n");
            for (key, value) in &request.context {
                out.push_str(&format!("    {key}: {value}\n"));
            }
        }
        out.push_str(&"-".repeat(60));
        out
    }

    async fn read_line() -> Option<String> {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        match stdin.read_line(&mut line).await {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_lowercase()),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl ApprovalFlow for InteractiveApprovalFlow {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalResponse {
        let mut stderr = tokio::io::stderr();
        let _ = stderr
            .write_all(format!("\n{}\n\n[y]es / [n]o / [e]dit / [s]kip > ", self.render_request(request)).as_bytes())
            .await;
        let _ = stderr.flush().await;

        let timeout = tokio::time::Duration::from_secs_f64(request.timeout_secs.max(0.0));
        let line = match tokio::time::timeout(timeout, Self::read_line()).await {
            Ok(line) => line,
            Err(_) => {
                return ApprovalResponse::new(ApprovalResult::Timeout, &request.command, &self.approver)
                    .with_reason(format!("no response within {}s", request.timeout_secs));
            }
        };

        match line.as_deref() {
            Some("y") | Some("yes") => {
                ApprovalResponse::new(ApprovalResult::Approved, &request.command, &self.approver)
            }
            Some("n") | Some("no") | Some("") | None => {
                ApprovalResponse::new(ApprovalResult::Denied, &request.command, &self.approver)
            }
            Some("e") | Some("edit") => self.handle_edit(request).await,
            Some("s") | Some("skip") => {
                ApprovalResponse::new(ApprovalResult::Skipped, &request.command, &self.approver)
                    .with_reason("skipped by user")
            }
            Some(other) => {
                ApprovalResponse::new(ApprovalResult::Denied, &request.command, &self.approver)
                    .with_reason(format!("invalid response: {other}"))
            }
        }
    }
}

impl InteractiveApprovalFlow {
    async fn handle_edit(&self, request: &ApprovalRequest) -> ApprovalResponse {
        let mut stderr = tokio::io::stderr();
        let _ = stderr
            .write_all(format!("\nOriginal: {}\nNew command: ", request.command).as_bytes())
            .await;
        let _ = stderr.flush().await;

        let timeout = tokio::time::Duration::from_secs_f64(request.timeout_secs.max(0.0));
        let edited = match tokio::time::timeout(timeout, Self::read_line()).await {
            Ok(Some(line)) if !line.is_empty() => line,
            Ok(_) => request.command.clone(),
            Err(_) => {
                return ApprovalResponse::new(ApprovalResult::Timeout, &request.command, &self.approver)
                    .with_reason("edit timed out");
            }
        };

        let _ = stderr
            .write_all(format!("\nEdited command: {edited}\nApprove edited command? [y/n] > ").as_bytes())
            .await;
        let _ = stderr.flush().await;

        match tokio::time::timeout(timeout, Self::read_line()).await {
            Ok(Some(ref s)) if s == "y" || s == "yes" => {
                ApprovalResponse::new(ApprovalResult::Edited, edited.clone(), &self.approver)
                    .with_reason(format!("edited from: {}", request.command))
            }
            _ => ApprovalResponse::new(ApprovalResult::Denied, &request.command, &self.approver)
                .with_reason("edit cancelled"),
        }
    }
}

/// Non-interactive approver: auto-approves configured risk levels, denies
/// the rest. Used for batch runs and tests.
pub struct AutoApprover {
    auto_approve_levels: Vec<RiskLevel>,
    auto_deny: bool,
    approver_tag: String,
}

impl AutoApprover {
    pub fn new(auto_approve_levels: Vec<RiskLevel>) -> Self {
        Self {
            auto_approve_levels,
            auto_deny: false,
            approver_tag: "auto:system".into(),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            auto_approve_levels: Vec::new(),
            auto_deny: true,
            approver_tag: "auto:system".into(),
        }
    }
}

impl Default for AutoApprover {
    fn default() -> Self {
        Self::new(vec![RiskLevel::Safe, RiskLevel::Low])
    }
}

#[async_trait]
impl ApprovalFlow for AutoApprover {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalResponse {
        if self.auto_deny {
            return ApprovalResponse::new(ApprovalResult::Denied, &request.command, &self.approver_tag)
                .with_reason("auto-deny enabled");
        }

        if self.auto_approve_levels.contains(&request.risk_level) {
            return ApprovalResponse::new(ApprovalResult::Approved, &request.command, &self.approver_tag)
                .with_reason(format!("auto-approved (risk={})", request.risk_level.as_str()));
        }

        ApprovalResponse::new(ApprovalResult::Denied, &request.command, &self.approver_tag).with_reason(
            format!("risk level {} not in auto-approve list", request.risk_level.as_str()),
        )
    }
}
