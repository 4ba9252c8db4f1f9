//! Security Controller (spec §4.D): combines role, policy, and risk into a
//! single ALLOW / APPROVAL_REQUIRED / BLOCKED decision, driving the approval
//! flow and audit log along the way.

use std::{collections::HashMap, sync::Arc};

use super::{
    approval::{ApprovalFlow, ApprovalRequest, ApprovalResult},
    audit::AuditLogger,
    policy::PolicyManager,
    rbac::{self, Role, User},
    risk::{self, RiskLevel},
};

/// Final outcome of a security check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Allow,
    ApprovalRequired,
    Blocked,
}

/// Ambient information a command is evaluated under.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub device_id: Option<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub interactive: bool,
}

/// The controller's decision for one command, with enough detail to audit
/// and (if needed) replace the command after an edit.
#[derive(Debug, Clone)]
pub struct SecurityDecision {
    pub result: ValidationResult,
    pub reason: String,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    /// Present only when the approval flow returned `Edited`.
    pub edited_command: Option<String>,
}

/// Combines RBAC, policy, and the risk classifier into one decision
/// pipeline, and drives the pluggable approval flow plus audit logging.
pub struct SecurityController {
    policies: Arc<PolicyManager>,
    approval_flow: Arc<dyn ApprovalFlow>,
    audit: Option<Arc<AuditLogger>>,
}

impl SecurityController {
    pub fn new(policies: Arc<PolicyManager>, approval_flow: Arc<dyn ApprovalFlow>, audit: Option<Arc<AuditLogger>>) -> Self {
        Self {
            policies,
            approval_flow,
            audit,
        }
    }

    /// Run the fixed resolution pipeline from spec §4.D for `command`, then
    /// (if APPROVAL_REQUIRED) invoke the approval flow. An `Edited` response
    /// re-enters the pipeline exactly once to prevent livelock.
    pub async fn validate_and_approve(&self, command: &str, user: &User, ctx: &SecurityContext) -> SecurityDecision {
        self.validate_and_approve_inner(command, user, ctx, true).await
    }

    async fn validate_and_approve_inner(
        &self,
        command: &str,
        user: &User,
        ctx: &SecurityContext,
        allow_reentry: bool,
    ) -> SecurityDecision {
        let decision = self.decide(command, user, ctx);

        if decision.result != ValidationResult::ApprovalRequired {
            self.audit_terminal(&decision, command, user, ctx);
            return decision;
        }

        let mut context = HashMap::new();
        if let Some(cwd) = &ctx.cwd {
            context.insert("cwd".to_owned(), cwd.clone());
        }
        if let Some(device) = &ctx.device_id {
            context.insert("device_id".to_owned(), device.clone());
        }

        let request = ApprovalRequest {
            command: command.to_owned(),
            risk_level: decision.risk_level,
            reasons: decision.reasons.clone(),
            context,
            timeout_secs: self.policies.get_policy(ctx.device_id.as_deref()).timeout_secs,
        };

        let response = self.approval_flow.request_approval(&request).await;

        match response.result {
            ApprovalResult::Approved => {
                let approved = SecurityDecision {
                    result: ValidationResult::Allow,
                    reason: format!("approved by {}", response.approver),
                    ..decision
                };
                if let Some(audit) = &self.audit {
                    let _ = audit.log_command_approved(command, &response.approver, &user.id, approved.risk_level);
                }
                approved
            }
            ApprovalResult::Edited if allow_reentry => {
                let edited = response.command.clone();
                let mut reentered = Box::pin(self.validate_and_approve_inner(&edited, user, ctx, false)).await;
                reentered.edited_command = Some(edited);
                reentered
            }
            ApprovalResult::Edited => {
                // Re-entry already happened once; deny to avoid livelock.
                let denied = SecurityDecision {
                    result: ValidationResult::Blocked,
                    reason: "edited command again requires approval; denied to prevent livelock".into(),
                    ..decision
                };
                if let Some(audit) = &self.audit {
                    let _ = audit.log_command_denied(command, &denied.reason, &user.id, denied.risk_level);
                }
                denied
            }
            ApprovalResult::Skipped => SecurityDecision {
                result: ValidationResult::Allow,
                reason: "approval skipped".into(),
                ..decision
            },
            ApprovalResult::Denied => {
                let denied = SecurityDecision {
                    result: ValidationResult::Blocked,
                    reason: response.reason.unwrap_or_else(|| "denied by approver".into()),
                    ..decision
                };
                if let Some(audit) = &self.audit {
                    let _ = audit.log_command_denied(command, &denied.reason, &user.id, denied.risk_level);
                }
                denied
            }
            ApprovalResult::Timeout => {
                let timed_out = SecurityDecision {
                    result: ValidationResult::Blocked,
                    reason: "approval request timed out".into(),
                    ..decision
                };
                if let Some(audit) = &self.audit {
                    let _ = audit.log_command_denied(command, &timed_out.reason, &user.id, timed_out.risk_level);
                }
                timed_out
            }
        }
    }

    /// The pure decision pipeline, without driving approval or audit. Exposed
    /// crate-wide so callers that need to triage a batch of commands (e.g.
    /// separating ones that need human approval from ones that don't) can
    /// classify without blocking on the approval flow.
    pub(crate) fn decide(&self, command: &str, user: &User, ctx: &SecurityContext) -> SecurityDecision {
        let policy = self.policies.get_policy(ctx.device_id.as_deref());
        let (risk, mut reasons) = risk::classify(command);

        // 1/2. Explicit block patterns and max length.
        if let Some(reason) = policy.blocked_by_patterns(command) {
            return SecurityDecision {
                result: ValidationResult::Blocked,
                reason,
                risk_level: risk,
                reasons,
                edited_command: None,
            };
        }

        let role = user.role_for(ctx.device_id.as_deref());

        // 3. CRITICAL is blocked outright, except SUPERUSER may escalate to approval.
        if risk == RiskLevel::Critical {
            return if role == Role::Superuser {
                reasons.push("superuser may escalate a critical command to approval".into());
                SecurityDecision {
                    result: ValidationResult::ApprovalRequired,
                    reason: "critical risk escalated to approval for superuser".into(),
                    risk_level: risk,
                    reasons,
                    edited_command: None,
                }
            } else {
                SecurityDecision {
                    result: ValidationResult::Blocked,
                    reason: "critical risk is blocked by default".into(),
                    risk_level: risk,
                    reasons,
                    edited_command: None,
                }
            };
        }

        // 4. Role x risk permission matrix.
        let access = rbac::check_access(user, risk, ctx.device_id.as_deref());
        let mut result = if access.allowed {
            ValidationResult::Allow
        } else if access.needs_approval {
            ValidationResult::ApprovalRequired
        } else {
            ValidationResult::Blocked
        };
        let mut reason = access.reason;

        // 5. Mode can only upgrade (never downgrade) the decision.
        if policy.is_blocked_by_mode(risk) && result != ValidationResult::Blocked {
            result = ValidationResult::Blocked;
            reason = format!("blocked by policy mode ({:?})", policy.mode);
        } else if result == ValidationResult::Allow && policy.requires_approval(risk) {
            result = ValidationResult::ApprovalRequired;
            reason = format!("policy mode requires approval for {risk}");
        }

        SecurityDecision {
            result,
            reason,
            risk_level: risk,
            reasons,
            edited_command: None,
        }
    }

    fn audit_terminal(&self, decision: &SecurityDecision, command: &str, user: &User, _ctx: &SecurityContext) {
        let Some(audit) = &self.audit else { return };
        match decision.result {
            ValidationResult::Allow => {
                let _ = audit.log_command_executed(command, &user.id, decision.risk_level, None);
            }
            ValidationResult::Blocked => {
                let _ = audit.log_command_blocked(command, &decision.reason, &user.id, decision.risk_level);
            }
            ValidationResult::ApprovalRequired => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::approval::AutoApprover;
    use crate::security::policy::SecurityPolicy;

    fn controller(policy: SecurityPolicy, approver: Arc<dyn ApprovalFlow>) -> SecurityController {
        SecurityController::new(Arc::new(PolicyManager::new(policy)), approver, None)
    }

    #[tokio::test]
    async fn safe_command_is_allowed_for_operator() {
        let sc = controller(SecurityPolicy::standard(), Arc::new(AutoApprover::default()));
        let user = User::new("u1", "Alice", Role::Operator);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("ls -la", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Allow);
    }

    #[tokio::test]
    async fn critical_command_blocked_for_non_superuser() {
        let sc = controller(SecurityPolicy::standard(), Arc::new(AutoApprover::default()));
        let user = User::new("u1", "Alice", Role::Admin);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("rm -rf /", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Blocked);
        assert_eq!(decision.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn critical_command_escalates_to_approval_for_superuser() {
        let sc = controller(
            SecurityPolicy::standard(),
            Arc::new(AutoApprover::new(vec![RiskLevel::Critical])),
        );
        let user = User::new("u1", "Root", Role::Superuser);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("rm -rf /", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Allow);
    }

    #[tokio::test]
    async fn operator_medium_risk_needs_approval_then_allowed() {
        let sc = controller(
            SecurityPolicy::standard(),
            Arc::new(AutoApprover::new(vec![RiskLevel::Medium])),
        );
        let user = User::new("u1", "Alice", Role::Operator);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("apt-get install vim", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Allow);
    }

    #[tokio::test]
    async fn operator_high_risk_is_blocked_regardless_of_approval() {
        let sc = controller(
            SecurityPolicy::standard(),
            Arc::new(AutoApprover::new(vec![RiskLevel::High])),
        );
        let user = User::new("u1", "Alice", Role::Operator);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("sudo ls", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Blocked);
    }

    #[tokio::test]
    async fn denied_approval_blocks() {
        let sc = controller(SecurityPolicy::standard(), Arc::new(AutoApprover::deny_all()));
        let user = User::new("u1", "Alice", Role::Admin);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("sudo apt-get update", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Blocked);
    }

    #[tokio::test]
    async fn paranoid_mode_upgrades_medium_to_blocked() {
        let sc = controller(SecurityPolicy::paranoid(), Arc::new(AutoApprover::default()));
        let user = User::new("u1", "Alice", Role::Superuser);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("apt-get install vim", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Blocked);
    }

    #[tokio::test]
    async fn block_pattern_wins_before_role_check() {
        let mut policy = SecurityPolicy::standard();
        policy.blocked_patterns.push(r"^echo danger".into());
        let sc = controller(policy, Arc::new(AutoApprover::default()));
        let user = User::new("u1", "Root", Role::Superuser);
        let ctx = SecurityContext::default();
        let decision = sc.validate_and_approve("echo danger", &user, &ctx).await;
        assert_eq!(decision.result, ValidationResult::Blocked);
    }
}
