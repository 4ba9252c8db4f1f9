//! Security policy configuration (spec §4.D): enforcement mode, pattern
//! allow/block lists, and per-device overrides.

use std::{collections::HashMap, path::Path, sync::RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::risk::RiskLevel;

/// Overall enforcement stance. Ordered so a mode can only be *upgraded*
/// (made stricter), never downgraded, by [`PolicyManager::upgrade_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Permissive,
    Standard,
    Strict,
    Paranoid,
}

impl Default for SecurityMode {
    fn default() -> Self {
        SecurityMode::Standard
    }
}

/// A named, configurable security policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub name: String,
    pub mode: SecurityMode,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
    #[serde(default = "default_approval_levels")]
    pub require_approval_levels: Vec<RiskLevel>,
    #[serde(default = "default_max_command_length")]
    pub max_command_length: usize,
    #[serde(default)]
    pub allow_sudo: bool,
    #[serde(default = "default_true")]
    pub allow_network: bool,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default = "default_blocked_paths")]
    pub blocked_paths: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
}

fn default_true() -> bool {
    true
}
fn default_approval_levels() -> Vec<RiskLevel> {
    vec![RiskLevel::High]
}
fn default_max_command_length() -> usize {
    10_000
}
fn default_timeout() -> f64 {
    30.0
}
fn default_blocked_paths() -> Vec<String> {
    ["/etc/*", "/usr/*", "/bin/*", "/sbin/*", "/boot/*", "/root/*"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SecurityPolicy {
    pub fn permissive() -> Self {
        Self {
            name: "permissive".into(),
            mode: SecurityMode::Permissive,
            blocked_patterns: Vec::new(),
            allowed_patterns: Vec::new(),
            require_approval_levels: Vec::new(),
            max_command_length: default_max_command_length(),
            allow_sudo: true,
            allow_network: true,
            allowed_paths: Vec::new(),
            blocked_paths: default_blocked_paths(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn standard() -> Self {
        Self {
            name: "standard".into(),
            mode: SecurityMode::Standard,
            blocked_patterns: Vec::new(),
            allowed_patterns: Vec::new(),
            require_approval_levels: vec![RiskLevel::High],
            max_command_length: default_max_command_length(),
            allow_sudo: false,
            allow_network: true,
            allowed_paths: Vec::new(),
            blocked_paths: default_blocked_paths(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn strict() -> Self {
        Self {
            name: "strict".into(),
            mode: SecurityMode::Strict,
            blocked_patterns: Vec::new(),
            allowed_patterns: Vec::new(),
            require_approval_levels: vec![RiskLevel::Medium, RiskLevel::High],
            max_command_length: default_max_command_length(),
            allow_sudo: false,
            allow_network: false,
            allowed_paths: Vec::new(),
            blocked_paths: default_blocked_paths(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn paranoid() -> Self {
        Self {
            name: "paranoid".into(),
            mode: SecurityMode::Paranoid,
            blocked_patterns: Vec::new(),
            allowed_patterns: Vec::new(),
            require_approval_levels: vec![RiskLevel::Low, RiskLevel::Medium, RiskLevel::High],
            max_command_length: default_max_command_length(),
            allow_sudo: false,
            allow_network: false,
            allowed_paths: Vec::new(),
            blocked_paths: {
                let mut paths = default_blocked_paths();
                paths.push("/var/*".into());
                paths.push("/tmp/*".into());
                paths
            },
            timeout_secs: default_timeout(),
        }
    }

    /// Whether `risk` requires human approval under this policy's mode.
    pub fn requires_approval(&self, risk: RiskLevel) -> bool {
        match self.mode {
            SecurityMode::Permissive => false,
            SecurityMode::Paranoid => risk >= RiskLevel::Low,
            SecurityMode::Strict => risk >= RiskLevel::Medium,
            SecurityMode::Standard => {
                self.require_approval_levels.contains(&risk) || risk >= RiskLevel::High
            }
        }
    }

    /// Whether `risk` is blocked outright by this policy's mode, independent
    /// of role and pattern lists.
    pub fn is_blocked_by_mode(&self, risk: RiskLevel) -> bool {
        if risk >= RiskLevel::Critical {
            return true;
        }
        match self.mode {
            SecurityMode::Paranoid => risk >= RiskLevel::Medium,
            SecurityMode::Strict => risk >= RiskLevel::High,
            _ => false,
        }
    }

    /// Whether `command` is blocked by this policy's explicit pattern lists
    /// (block patterns win unless an allow pattern also matches), length
    /// cap, or the `allow_sudo`/`allow_network` toggles.
    pub fn blocked_by_patterns(&self, command: &str) -> Option<String> {
        if command.len() > self.max_command_length {
            return Some(format!(
                "command exceeds max length ({} > {})",
                command.len(),
                self.max_command_length
            ));
        }

        let allowed_override = self
            .allowed_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .any(|re| re.is_match(command));

        if !allowed_override {
            for pattern in &self.blocked_patterns {
                if let Ok(re) = Regex::new(pattern) {
                    if re.is_match(command) {
                        return Some(format!("matches blocked pattern '{pattern}'"));
                    }
                }
            }
        }

        if !self.allow_sudo && command.trim_start().starts_with("sudo ") {
            return Some("sudo is not permitted by this policy".into());
        }

        None
    }
}

/// Per-device policy override plus explicit command allow/block lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePolicy {
    pub device_id: String,
    pub policy: SecurityPolicy,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
}

/// Resolves the effective policy for a device, with a process-wide default.
pub struct PolicyManager {
    default_policy: RwLock<SecurityPolicy>,
    device_policies: RwLock<HashMap<String, DevicePolicy>>,
}

impl PolicyManager {
    pub fn new(default_policy: SecurityPolicy) -> Self {
        Self {
            default_policy: RwLock::new(default_policy),
            device_policies: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_policy(&self, device_id: Option<&str>) -> SecurityPolicy {
        if let Some(id) = device_id {
            if let Some(dp) = self.device_policies.read().expect("lock poisoned").get(id) {
                return dp.policy.clone();
            }
        }
        self.default_policy.read().expect("lock poisoned").clone()
    }

    pub fn get_device_policy(&self, device_id: &str) -> Option<DevicePolicy> {
        self.device_policies
            .read()
            .expect("lock poisoned")
            .get(device_id)
            .cloned()
    }

    pub fn set_default_policy(&self, policy: SecurityPolicy) {
        *self.default_policy.write().expect("lock poisoned") = policy;
    }

    pub fn add_device_policy(&self, device_policy: DevicePolicy) {
        self.device_policies
            .write()
            .expect("lock poisoned")
            .insert(device_policy.device_id.clone(), device_policy);
    }

    /// Raise the default policy's mode to `mode` if `mode` is stricter than
    /// the current one; a no-op otherwise. Modes never downgrade this way.
    pub fn upgrade_mode(&self, mode: SecurityMode) {
        let mut policy = self.default_policy.write().expect("lock poisoned");
        if mode > policy.mode {
            policy.mode = mode;
        }
    }
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new(SecurityPolicy::standard())
    }
}

/// Load `path` containing an untyped `{default_policy, devices}` wrapper and
/// register its contents into a fresh [`PolicyManager`]. Malformed or absent
/// files are not an error: callers fall back to defaults.
pub fn load_into(manager: &PolicyManager, path: &Path) -> Result<(), crate::error::AgentShError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| crate::error::AgentShError::Config(format!("reading {}: {e}", path.display())))?;
    let doc: PolicyFile = serde_yaml::from_str(&raw)
        .map_err(|e| crate::error::AgentShError::Config(format!("parsing {}: {e}", path.display())))?;

    if let Some(default) = doc.default_policy {
        manager.set_default_policy(default);
    }
    for device in doc.devices {
        manager.add_device_policy(device);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct PolicyFile {
    #[serde(default)]
    default_policy: Option<SecurityPolicy>,
    #[serde(default)]
    devices: Vec<DevicePolicy>,
}
