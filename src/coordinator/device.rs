//! Remote device identity (spec §3): a unique id and a hostname, plus the
//! credentials the SSH executor needs to reach it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single remote device the Coordinator can fan a goal out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub id: String,
    pub host: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_user() -> String {
    "root".to_owned()
}

fn default_ssh_port() -> u16 {
    22
}

impl DeviceTarget {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// The pool key an SSH connection to this device is tracked under:
    /// (host, user, port, key fingerprint).
    pub fn pool_key(&self) -> String {
        let key = self
            .identity_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "agent".to_owned());
        format!("{}@{}:{}#{key}", self.user, self.host, self.port)
    }
}

/// The outcome of one device's run under a Coordinator rollout. Invariant:
/// within one orchestration, each device appears at most once in the
/// results map it's collected into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResult {
    pub device_id: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}
