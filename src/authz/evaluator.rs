use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::hierarchy::{Role, RoleEdge, RoleHierarchy};
use super::AuthzError;
use crate::approval::ApprovalLine;
use crate::tenant::TenantContext;

/// Permission → minimum role required, following `{resource}:{action}[:{scope}]`
fn default_permissions() -> BTreeMap<String, Role> {
    [
        ("approval:read:self", Role::Employee),
        ("approval:request", Role::Employee),
        ("approval:read:team", Role::TeamLeader),
        ("approval:approve", Role::TeamLeader),
        ("approval:read", Role::DeptManager),
        ("approval:write", Role::HrManager),
        ("approval:admin", Role::TenantAdmin),
        ("tenant:read", Role::GroupAdmin),
        ("tenant:write", Role::GroupAdmin),
    ]
    .into_iter()
    .map(|(perm, role)| (perm.to_string(), role))
    .collect()
}

/// On-disk form of the hierarchy and permission table (YAML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    pub hierarchy: Vec<RoleEdge>,
    #[serde(default)]
    pub permissions: BTreeMap<String, Role>,
}

/// Answers "does this role set satisfy that requirement" against a validated hierarchy
#[derive(Debug, Clone)]
pub struct AuthorizationEvaluator {
    hierarchy: RoleHierarchy,
    permissions: BTreeMap<String, Role>,
}

impl Default for AuthorizationEvaluator {
    fn default() -> Self {
        Self {
            hierarchy: RoleHierarchy::default(),
            permissions: default_permissions(),
        }
    }
}

impl AuthorizationEvaluator {
    pub fn new(hierarchy: RoleHierarchy, permissions: BTreeMap<String, Role>) -> Self {
        Self {
            hierarchy,
            permissions,
        }
    }

    pub fn from_config(config: AuthorizationConfig) -> Result<Self, AuthzError> {
        let hierarchy = RoleHierarchy::from_edges(config.hierarchy)?;
        let permissions = if config.permissions.is_empty() {
            default_permissions()
        } else {
            config.permissions
        };
        Ok(Self::new(hierarchy, permissions))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AuthzError> {
        let config: AuthorizationConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AuthzError::InvalidHierarchy(format!("unreadable hierarchy file: {}", e)))?;
        Self::from_config(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthzError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::InvalidHierarchy(format!("cannot read {}: {}", path.display(), e))
        })?;
        let evaluator = Self::from_yaml_str(&yaml)?;
        tracing::info!("Loaded role hierarchy from {}", path.display());
        Ok(evaluator)
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    pub fn closure(&self, roles: &BTreeSet<Role>) -> BTreeSet<Role> {
        self.hierarchy.closure(roles)
    }

    pub fn has_role(&self, roles: &BTreeSet<Role>, required: Role) -> bool {
        self.hierarchy.satisfies(roles, required)
    }

    /// Resolves the minimum role for `permission`, falling back from
    /// `resource:action:scope` to `resource:action` to `resource:*`.
    /// Unlisted permissions are reserved for SUPER_ADMIN.
    pub fn required_role(&self, permission: &str) -> Role {
        if let Some(role) = self.permissions.get(permission) {
            return *role;
        }

        let parts: Vec<&str> = permission.split(':').collect();
        if parts.len() == 3 {
            if let Some(role) = self.permissions.get(&format!("{}:{}", parts[0], parts[1])) {
                return *role;
            }
        }
        if parts.len() >= 2 {
            if let Some(role) = self.permissions.get(&format!("{}:*", parts[0])) {
                return *role;
            }
        }

        Role::SuperAdmin
    }

    pub fn has_permission(&self, roles: &BTreeSet<Role>, permission: &str) -> bool {
        self.has_role(roles, self.required_role(permission))
    }

    /// Identity or hierarchy check for acting on an approval line: the caller is
    /// the designated approver, the approver's delegate, or holds a role strictly
    /// above the line's approver role.
    pub fn can_act_as_approver(&self, ctx: &TenantContext, line: &ApprovalLine) -> bool {
        if ctx.is_system() {
            return false;
        }
        if line.approver_id == ctx.user_id || line.delegate_id == Some(ctx.user_id) {
            return true;
        }
        self.hierarchy.dominates(&ctx.roles, line.approver_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{LineStatus, LineType};
    use uuid::Uuid;

    fn roles(list: &[Role]) -> BTreeSet<Role> {
        list.iter().copied().collect()
    }

    fn line(approver: Uuid, role: Role) -> ApprovalLine {
        ApprovalLine {
            id: Uuid::new_v4(),
            sequence: 1,
            approver_id: approver,
            approver_name: "Approver".to_string(),
            approver_role: role,
            line_type: LineType::Approval,
            status: LineStatus::Active,
            delegate_id: None,
            comment: None,
            acted_at: None,
        }
    }

    #[test]
    fn permission_scope_falls_back_to_broader_entry() {
        let eval = AuthorizationEvaluator::default();
        assert_eq!(eval.required_role("approval:read:self"), Role::Employee);
        assert_eq!(eval.required_role("approval:write:department"), Role::HrManager);
        assert_eq!(eval.required_role("payroll:export"), Role::SuperAdmin);
    }

    #[test]
    fn permissions_follow_hierarchy() {
        let eval = AuthorizationEvaluator::default();
        assert!(eval.has_permission(&roles(&[Role::TenantAdmin]), "approval:approve"));
        assert!(eval.has_permission(&roles(&[Role::TeamLeader]), "approval:approve:team"));
        assert!(!eval.has_permission(&roles(&[Role::Employee]), "approval:approve"));
        assert!(!eval.has_permission(&roles(&[Role::TeamLeader]), "approval:read"));
        assert!(eval.has_permission(&roles(&[Role::SuperAdmin]), "payroll:export"));
        assert!(!eval.has_permission(&BTreeSet::new(), "approval:request"));
    }

    #[test]
    fn evaluator_closure_unions_held_roles() {
        let eval = AuthorizationEvaluator::default();
        let closure = eval.closure(&roles(&[Role::HrManager, Role::Employee]));
        assert!(closure.contains(&Role::DeptManager));
        assert!(closure.contains(&Role::Employee));
        assert!(!closure.contains(&Role::TenantAdmin));
        assert_eq!(closure.len(), 4);
    }

    #[test]
    fn designated_approver_and_delegate_may_act() {
        let eval = AuthorizationEvaluator::default();
        let tenant = Uuid::new_v4();
        let approver = Uuid::new_v4();
        let delegate = Uuid::new_v4();
        let mut l = line(approver, Role::DeptManager);
        l.delegate_id = Some(delegate);

        assert!(eval.can_act_as_approver(&TenantContext::new(tenant, approver, [Role::Employee]), &l));
        assert!(eval.can_act_as_approver(&TenantContext::new(tenant, delegate, [Role::Employee]), &l));
        assert!(!eval.can_act_as_approver(
            &TenantContext::new(tenant, Uuid::new_v4(), [Role::DeptManager]),
            &l
        ));
        assert!(eval.can_act_as_approver(
            &TenantContext::new(tenant, Uuid::new_v4(), [Role::HrManager]),
            &l
        ));
    }

    #[test]
    fn system_context_never_acts() {
        let eval = AuthorizationEvaluator::default();
        let l = line(Uuid::nil(), Role::Employee);
        assert!(!eval.can_act_as_approver(&TenantContext::system(Uuid::new_v4()), &l));
    }

    #[test]
    fn loads_yaml_and_rejects_cycles() {
        let ok = r#"
hierarchy:
  - { parent: TENANT_ADMIN, child: HR_MANAGER }
  - { parent: HR_MANAGER, child: EMPLOYEE }
permissions:
  "approval:approve": HR_MANAGER
"#;
        let eval = AuthorizationEvaluator::from_yaml_str(ok).unwrap();
        assert!(eval.has_permission(&roles(&[Role::TenantAdmin]), "approval:approve"));
        assert!(!eval.has_permission(&roles(&[Role::Employee]), "approval:approve"));

        let cyclic = r#"
hierarchy:
  - { parent: HR_MANAGER, child: EMPLOYEE }
  - { parent: EMPLOYEE, child: HR_MANAGER }
"#;
        assert!(matches!(
            AuthorizationEvaluator::from_yaml_str(cyclic),
            Err(AuthzError::InvalidHierarchy(_))
        ));
    }
}
