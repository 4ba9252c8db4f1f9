//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the agent execution core returns one of
//! these variants. The Agent Loop never lets an error escape across a
//! node boundary: each node captures faults into `AgentState::error` and
//! the `decide` routing function sends execution to the `recovery` node.

use thiserror::Error;

use crate::security::RiskLevel;

/// Top-level error type for the agent execution core.
#[derive(Debug, Error, Clone)]
pub enum AgentShError {
    /// Tool argument failed schema validation before any side effect ran.
    #[error("validation error: {0}")]
    Validation(String),

    /// The Security Controller blocked the command outright.
    #[error("security blocked: {reason}")]
    SecurityBlocked {
        reason: String,
        risk: RiskLevel,
    },

    /// A human denied an approval request.
    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    /// An approval request was not answered within its timeout.
    #[error("approval timed out after {0:.1}s")]
    ApprovalTimeout(f64),

    /// A tool handler did not finish within its allotted timeout.
    #[error("tool '{tool}' timed out after {timeout_secs:.1}s")]
    ToolTimeout { tool: String, timeout_secs: f64 },

    /// A tool handler returned a failure (after exhausting retries).
    #[error("tool '{tool}' failed: {message}")]
    ToolHandlerError { tool: String, message: String },

    /// The LLM provider returned an error response.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// The LLM provider signalled a rate limit.
    #[error("rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimit {
        provider: String,
        retry_after_secs: Option<f64>,
    },

    /// Provider authentication failed.
    #[error("authentication failed for {provider}")]
    Auth { provider: String },

    /// Configuration failed to load or validate.
    #[error("config error: {0}")]
    Config(String),

    /// The operation was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,
}

impl AgentShError {
    /// Render the way the agent loop surfaces errors to the end user:
    /// `"Error: <kind>: <message>"`, with risk/context appended on a
    /// second line when present.
    pub fn render(&self) -> String {
        match self {
            AgentShError::SecurityBlocked { reason, risk } => {
                format!("Error: security blocked: {reason}\nrisk: {risk}")
            }
            other => format!("Error: {other}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentShError>;
