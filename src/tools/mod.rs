//! Tool Registry & Runner (spec §4.B): tool definitions, a name-keyed
//! registry, and a runner that validates arguments, enforces security, and
//! retries on failure.

pub mod registry;
pub mod runner;
pub mod traits;

pub use registry::ToolRegistry;
pub use runner::{ExecutionContext, ToolRunner, COMMAND_TOOLS};
pub use traits::{ToolCall, ToolDefinition, ToolHandler, ToolResult};
