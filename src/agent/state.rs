//! Agent Loop state (spec §4.F): the mutable state one loop run owns, and
//! the shapes it reports back to its caller.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::AgentShError;
use crate::llm::{Message, ToolCall};
use crate::security::{RiskLevel, SecurityDecision};
use crate::tools::ToolResult;

/// How an [`AgentResult`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Success,
    Error,
    MaxStepsReached,
    Cancelled,
}

/// One resolved tool invocation, kept for the caller's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: ToolResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

/// A tool call awaiting human approval, alongside the pure classification
/// that routed it here.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub call: ToolCall,
    pub decision: SecurityDecision,
}

/// The mutable state one Agent Loop run threads through its nodes.
pub struct AgentState {
    pub messages: Vec<Message>,
    pub pending_tool_calls: VecDeque<ToolCall>,
    pub approvals_pending: VecDeque<PendingApproval>,
    pub step_count: usize,
    pub max_steps: usize,
    pub recovery_attempts: usize,
    pub max_recovery_attempts: usize,
    pub error: Option<AgentShError>,
    pub final_result: Option<String>,
    pub terminal: bool,
    pub cancelled: bool,
    pub tool_call_records: Vec<ToolCallRecord>,
    pub started_at: Instant,
}

impl AgentState {
    pub fn new(max_steps: usize, max_recovery_attempts: usize) -> Self {
        Self {
            messages: Vec::new(),
            pending_tool_calls: VecDeque::new(),
            approvals_pending: VecDeque::new(),
            step_count: 0,
            max_steps,
            recovery_attempts: 0,
            max_recovery_attempts,
            error: None,
            final_result: None,
            terminal: false,
            cancelled: false,
            tool_call_records: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// What an Agent Loop run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub response: String,
    pub success: bool,
    pub status: AgentStatus,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_steps: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn from_state(state: &AgentState, status: AgentStatus) -> Self {
        let success = matches!(status, AgentStatus::Success);
        let response = state.final_result.clone().unwrap_or_default();
        let error = state.error.as_ref().map(AgentShError::render);
        Self {
            response,
            success,
            status,
            tool_calls: state.tool_call_records.clone(),
            total_steps: state.step_count,
            duration_ms: state.elapsed_ms(),
            error,
        }
    }
}
