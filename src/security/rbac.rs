//! Role-based access control (spec §4.D): a role/risk permission matrix,
//! independent of policy mode or pattern lists.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::risk::RiskLevel;

/// User role with a total hierarchy: `VIEWER < OPERATOR < ADMIN < SUPERUSER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Superuser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "VIEWER",
            Role::Operator => "OPERATOR",
            Role::Admin => "ADMIN",
            Role::Superuser => "SUPERUSER",
        }
    }
}

/// What a role may do with a command at a given risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permission {
    pub can_execute: bool,
    pub can_approve: bool,
    pub requires_approval: bool,
}

impl Permission {
    const fn new(can_execute: bool, can_approve: bool, requires_approval: bool) -> Self {
        Self {
            can_execute,
            can_approve,
            requires_approval,
        }
    }
}

/// Outcome of [`check_access`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub needs_approval: bool,
    pub reason: String,
}

/// A user identity, with an optional per-device role override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub device_roles: HashMap<String, Role>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            device_roles: HashMap::new(),
        }
    }

    /// Role in effect for `device_id`, falling back to the default role.
    pub fn role_for(&self, device_id: Option<&str>) -> Role {
        device_id
            .and_then(|id| self.device_roles.get(id))
            .copied()
            .unwrap_or(self.role)
    }
}

/// Permission for `role` at `risk_level`, per the fixed matrix in spec §4.D.
pub fn permission_for(role: Role, risk: RiskLevel) -> Permission {
    use Role::*;
    use RiskLevel::*;

    match (role, risk) {
        (Viewer, _) => Permission::new(false, false, false),

        (Operator, Safe) | (Operator, Low) => Permission::new(true, false, false),
        (Operator, Medium) => Permission::new(false, false, true),
        (Operator, High) | (Operator, Critical) => Permission::new(false, false, false),

        (Admin, Safe) | (Admin, Low) | (Admin, Medium) => Permission::new(true, true, false),
        (Admin, High) => Permission::new(false, true, true),
        (Admin, Critical) => Permission::new(false, false, false),

        (Superuser, Safe) | (Superuser, Low) | (Superuser, Medium) | (Superuser, High) => {
            Permission::new(true, true, false)
        }
        (Superuser, Critical) => Permission::new(false, true, true),
    }
}

pub fn can_execute(role: Role, risk: RiskLevel) -> bool {
    permission_for(role, risk).can_execute
}

pub fn can_approve(role: Role, risk: RiskLevel) -> bool {
    permission_for(role, risk).can_approve
}

pub fn requires_approval(role: Role, risk: RiskLevel) -> bool {
    let perm = permission_for(role, risk);
    perm.requires_approval || (!perm.can_execute && perm.can_approve)
}

/// Whether `role` is flatly blocked from a command at `risk`.
pub fn is_blocked(role: Role, risk: RiskLevel) -> bool {
    let perm = permission_for(role, risk);
    !perm.can_execute && !perm.requires_approval
}

/// Evaluate the permission matrix for `user` (optionally acting on
/// `device_id`) against `risk`.
pub fn check_access(user: &User, risk: RiskLevel, device_id: Option<&str>) -> AccessDecision {
    let role = user.role_for(device_id);
    let perm = permission_for(role, risk);

    if perm.can_execute {
        return AccessDecision {
            allowed: true,
            needs_approval: false,
            reason: "execution allowed".into(),
        };
    }

    if perm.requires_approval {
        return AccessDecision {
            allowed: false,
            needs_approval: true,
            reason: format!("requires approval (role={}, risk={risk})", role.as_str()),
        };
    }

    AccessDecision {
        allowed: false,
        needs_approval: false,
        reason: format!("blocked (role={}, risk={risk})", role.as_str()),
    }
}
