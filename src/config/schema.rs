//! YAML configuration schema.
//!
//! All fields carry `#[serde(default)]` so a partially-filled config file
//! works correctly; missing sections fall back to their `Default` impl.
//! Unknown top-level keys are a load error — everything nested under a
//! known section tolerates additions.
//!
//! Example `~/.config/agentsh/config.yaml`:
//! ```yaml
//! llm:
//!   provider: anthropic
//!   model: claude-sonnet-4.5
//! security:
//!   mode: standard
//!   role: operator
//! memory:
//!   backend: sqlite
//! log_level: INFO
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── LlmConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_connections: usize,
    pub keep_alive_count: usize,
    pub keep_alive_expiry_secs: u64,
    pub http2: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_owned(),
            model: "claude-sonnet-4.5".to_owned(),
            request_timeout_secs: 30,
            max_retries: 3,
            max_connections: 32,
            keep_alive_count: 8,
            keep_alive_expiry_secs: 90,
            http2: true,
        }
    }
}

// ─── ShellConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    pub default_timeout_secs: f64,
    pub max_output_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30.0,
            max_output_bytes: 1_048_576,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// `"permissive" | "standard" | "strict" | "paranoid"`.
    pub mode: String,
    /// `"viewer" | "operator" | "admin" | "superuser"`.
    pub role: String,
    pub max_command_length: usize,
    pub allow_sudo: bool,
    pub allow_network: bool,
    pub blocked_patterns: Vec<String>,
    pub allowed_patterns: Vec<String>,
    pub blocked_paths: Vec<String>,
    pub approval_timeout_secs: f64,
    pub audit_log_path: Option<String>,
    pub audit_max_file_size_bytes: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: "standard".to_owned(),
            role: "operator".to_owned(),
            max_command_length: 10_000,
            allow_sudo: false,
            allow_network: true,
            blocked_patterns: Vec::new(),
            allowed_patterns: Vec::new(),
            blocked_paths: vec![
                "/etc/shadow".to_owned(),
                "/etc/sudoers".to_owned(),
                "/boot".to_owned(),
            ],
            approval_timeout_secs: 30.0,
            audit_log_path: None,
            audit_max_file_size_bytes: 10 * 1024 * 1024,
        }
    }
}

// ─── MemoryConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// `"sqlite" | "in_memory"`.
    pub backend: String,
    pub db_path: Option<String>,
    pub session_max_turns: usize,
    pub summarize_at: usize,
    pub max_results: usize,
    pub relevance_weight: f64,
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub min_score: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_owned(),
            db_path: None,
            session_max_turns: 50,
            summarize_at: 40,
            max_results: 10,
            relevance_weight: 0.5,
            recency_weight: 0.3,
            frequency_weight: 0.2,
            min_score: 0.1,
        }
    }
}

// ─── TelemetryConfig ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_dir: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

// ─── OrchestratorConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrency: usize,
    pub ssh_max_connections_per_host: usize,
    pub default_canary_count: usize,
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            ssh_max_connections_per_host: 4,
            default_canary_count: 1,
            rollback_on_failure: true,
        }
    }
}

// ─── PluginEntry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

fn default_true() -> bool {
    true
}

// ─── AppConfig ────────────────────────────────────────────────────────────

/// Root configuration object. Unknown top-level keys are rejected; this is
/// the one place `deny_unknown_fields` applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub shell: ShellConfig,
    pub security: SecurityConfig,
    pub memory: MemoryConfig,
    pub telemetry: TelemetryConfig,
    pub orchestrator: OrchestratorConfig,
    pub plugins: Vec<PluginEntry>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            shell: ShellConfig::default(),
            security: SecurityConfig::default(),
            memory: MemoryConfig::default(),
            telemetry: TelemetryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            plugins: Vec::new(),
            log_level: "INFO".to_owned(),
        }
    }
}
