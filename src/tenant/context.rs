use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::authz::Role;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("No tenant context is active for this unit of work")]
    NoActiveContext,

    #[error("A tenant context is already active for this unit of work")]
    ContextAlreadyActive,
}

/// Caller identity for one unit of work (request, scheduler iteration, message).
///
/// Immutable once built. Passed by reference to every tenant-scoped
/// operation instead of living in ambient per-thread state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub roles: BTreeSet<Role>,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            tenant_id,
            user_id,
            roles: roles.into_iter().collect(),
        }
    }

    /// Synthetic context used by background jobs acting on behalf of a tenant.
    /// Carries no user and no roles, so it can never pass an approver check.
    pub fn system(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: Uuid::nil(),
            roles: BTreeSet::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.user_id.is_nil()
    }
}

/// Holder for the single live `TenantContext` of a unit of work.
///
/// A scope is created at the start of the unit of work and torn down when it
/// ends; dropping the scope tears it down, which covers error returns and
/// cancelled futures.
#[derive(Debug, Default)]
pub struct ContextScope {
    active: Option<Arc<TenantContext>>,
}

impl ContextScope {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Convenience for the common "create and establish" path.
    pub fn begin(ctx: TenantContext) -> Self {
        Self {
            active: Some(Arc::new(ctx)),
        }
    }

    pub fn establish(
        &mut self,
        tenant_id: Uuid,
        user_id: Uuid,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<Arc<TenantContext>, ContextError> {
        self.install(TenantContext::new(tenant_id, user_id, roles))
    }

    pub fn install(&mut self, ctx: TenantContext) -> Result<Arc<TenantContext>, ContextError> {
        if self.active.is_some() {
            return Err(ContextError::ContextAlreadyActive);
        }
        let ctx = Arc::new(ctx);
        self.active = Some(Arc::clone(&ctx));
        tracing::debug!(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id, "tenant context established");
        Ok(ctx)
    }

    pub fn current(&self) -> Result<&TenantContext, ContextError> {
        self.active.as_deref().ok_or(ContextError::NoActiveContext)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn teardown(&mut self) {
        if let Some(ctx) = self.active.take() {
            tracing::debug!(tenant_id = %ctx.tenant_id, "tenant context torn down");
        }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.teardown();
    }
}
