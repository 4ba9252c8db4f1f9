//! Agent Loop (spec §4.F): the ReAct state machine that drives one goal
//! through the LLM, the tool registry, and human-in-the-loop security for a
//! single device/session.
//!
//! # Key types
//! - [`AgentLoop`] — owns the loop and runs it to completion
//! - [`AgentConfig`] — model, step, and timeout parameters for a run
//! - [`AgentState`] — the mutable state one run threads through its nodes
//! - [`AgentResult`] — what a run produced

pub mod loop_;
pub mod state;

pub use loop_::{AgentConfig, AgentLoop};
pub use state::{AgentResult, AgentState, AgentStatus, PendingApproval, ToolCallRecord};
