//! Configuration schema and merge/override mechanics (spec §6).

pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_layered, merge_yaml, parse_config};
pub use schema::{
    AppConfig, LlmConfig, MemoryConfig, OrchestratorConfig, PluginEntry, SecurityConfig,
    ShellConfig, TelemetryConfig,
};
