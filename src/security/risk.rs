//! Risk Classifier (spec §4.C): a pure function from a shell command string
//! to a [`RiskLevel`] plus the human-readable reasons that produced it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Totally ordered risk tier for a command or tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Pattern {
    regex: Regex,
    reason: &'static str,
}

fn build(patterns: &[(&str, &'static str)]) -> Vec<Pattern> {
    patterns
        .iter()
        .map(|(pat, reason)| Pattern {
            regex: Regex::new(pat).expect("risk classifier pattern is valid regex"),
            reason,
        })
        .collect()
}

// Whole-line anchored: these are the small set of commands that must never
// slip through parameter variation.
static CRITICAL_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    build(&[
        (r"^\s*(sudo\s+)?rm\s+(-[a-zA-Z]*f[a-zA-Z]*r[a-zA-Z]*|-[a-zA-Z]*r[a-zA-Z]*f[a-zA-Z]*)\s+/\s*$", "recursive deletion of the filesystem root"),
        (r"^\s*(sudo\s+)?:\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "shell fork bomb"),
        (r"^\s*(sudo\s+)?mkfs(\.\w+)?\s+/dev/", "raw filesystem format on a device node"),
        (r"^\s*(sudo\s+)?dd\s+.*\bof=/dev/(sd|nvme|hd|disk)", "dd writing directly to a device node"),
        (r">\s*/dev/(sd|nvme|hd|disk)", "shell redirection writing to a raw disk device"),
        (r"^\s*(sudo\s+)?chmod\s+-R\s+777\s+/\s*$", "recursive world-writable permission change at the filesystem root"),
    ])
});

static HIGH_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    build(&[
        (r"\brm\s+(-\w*r\w*|-\w*R\w*)", "recursive delete"),
        (r"^\s*sudo\s", "privilege escalation via sudo"),
        (r"\b(useradd|userdel|usermod|groupadd|groupdel|groupmod)\b", "user or group management"),
        (r"\bsystemctl\s+(stop|disable|mask)\b", "service stop, disable, or mask"),
        (r"\b(reboot|shutdown|poweroff|halt)\b", "system power control"),
        (r"\bchmod\s+-[a-zA-Z]*[rR][a-zA-Z]*\b", "recursive chmod"),
        (r"\bchown\s+-[a-zA-Z]*[rR][a-zA-Z]*\b", "recursive chown"),
    ])
});

static MEDIUM_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    build(&[
        (r"\b(apt(-get)?|yum|dnf|pacman|brew|pip3?|npm|cargo)\s+install\b", "package installation"),
        (r"\b(curl|wget)\b[^|]*\|\s*(sh|bash|zsh)\b", "piping a remote download into a shell"),
        (r"\bsystemctl\s+(start|restart)\b", "service start or restart"),
        (r">>?\s*/etc/", "redirection writing under /etc"),
    ])
});

/// Classify `command`, returning its [`RiskLevel`] and the reasons (if any)
/// that matched. Pure and side-effect-free: evaluating the same command
/// twice always yields the same result.
pub fn classify(command: &str) -> (RiskLevel, Vec<String>) {
    if let Some(reasons) = matches(&CRITICAL_PATTERNS, command) {
        return (RiskLevel::Critical, reasons);
    }
    if let Some(reasons) = matches(&HIGH_PATTERNS, command) {
        return (RiskLevel::High, reasons);
    }
    if let Some(reasons) = matches(&MEDIUM_PATTERNS, command) {
        return (RiskLevel::Medium, reasons);
    }
    (RiskLevel::Safe, Vec::new())
}

fn matches(table: &[Pattern], command: &str) -> Option<Vec<String>> {
    let reasons: Vec<String> = table
        .iter()
        .filter(|p| p.regex.is_match(command))
        .map(|p| p.reason.to_owned())
        .collect();
    if reasons.is_empty() {
        None
    } else {
        Some(reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn unmatched_command_is_safe() {
        let (level, reasons) = classify("ls -la");
        assert_eq!(level, RiskLevel::Safe);
        assert!(reasons.is_empty());
    }

    #[test]
    fn critical_root_deletion() {
        let (level, reasons) = classify("rm -rf /");
        assert_eq!(level, RiskLevel::Critical);
        assert!(!reasons.is_empty());
    }

    #[test]
    fn critical_fork_bomb() {
        let (level, _) = classify(":(){ :|:& };:");
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn critical_dd_to_device() {
        let (level, _) = classify("dd if=/dev/zero of=/dev/sda bs=4M");
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn critical_mkfs() {
        let (level, _) = classify("mkfs.ext4 /dev/sdb1");
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn high_recursive_delete_not_root() {
        let (level, _) = classify("rm -rf ./build");
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn high_sudo() {
        let (level, _) = classify("sudo apt-get update");
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn high_systemctl_stop() {
        let (level, _) = classify("systemctl stop nginx");
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn high_reboot() {
        let (level, _) = classify("reboot now");
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn high_recursive_chown() {
        let (level, _) = classify("chown -R www-data:www-data /var/www");
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn medium_package_install() {
        let (level, _) = classify("apt-get install -y vim");
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn medium_curl_pipe_shell() {
        let (level, _) = classify("curl -sSL https://example.com/install.sh | bash");
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn medium_service_restart() {
        let (level, _) = classify("systemctl restart postgresql");
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn medium_redirect_to_etc() {
        let (level, _) = classify("echo 'foo' >> /etc/hosts");
        assert_eq!(level, RiskLevel::Medium);
    }

    #[test]
    fn critical_takes_precedence_over_high_and_medium() {
        // Contains a sudo (HIGH) token but the whole line is also root deletion (CRITICAL).
        let (level, _) = classify("sudo rm -rf /");
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn classification_is_order_stable() {
        let a = classify("sudo systemctl stop nginx");
        let b = classify("sudo systemctl stop nginx");
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }
}
