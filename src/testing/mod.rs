use std::sync::Arc;

use uuid::Uuid;

use crate::approval::{ApprovalEngine, DraftDocument, LineSpec, LineType};
use crate::authz::{AuthorizationEvaluator, Role};
use crate::database::MemoryApprovalStore;
pub use crate::notification::RecordingNotifier;
use crate::tenant::TenantContext;

/// One tenant, one drafter, and an engine over in-memory storage
pub struct TestContext {
    pub tenant_id: Uuid,
    pub drafter: TenantContext,
    pub store: Arc<MemoryApprovalStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: ApprovalEngine<MemoryApprovalStore, RecordingNotifier>,
}

impl TestContext {
    pub fn new() -> Self {
        let tenant_id = Uuid::new_v4();
        let store = Arc::new(MemoryApprovalStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ApprovalEngine::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::new(AuthorizationEvaluator::default()),
        );

        Self {
            tenant_id,
            drafter: TenantContext::new(tenant_id, Uuid::new_v4(), [Role::Employee]),
            store,
            notifier,
            engine,
        }
    }

    /// A caller in this context's tenant
    pub fn user<const N: usize>(&self, user_id: Uuid, roles: [Role; N]) -> TenantContext {
        TenantContext::new(self.tenant_id, user_id, roles)
    }

    pub fn draft(&self, lines: Vec<LineSpec>) -> DraftDocument {
        DraftDocument {
            title: "Annual leave 2026-11-02 ~ 2026-11-04".to_string(),
            document_type: "leave".to_string(),
            reference_type: "LEAVE_REQUEST".to_string(),
            reference_id: Uuid::new_v4(),
            deadline_at: None,
            lines,
        }
    }
}

pub fn line_spec(approver_id: Uuid, role: Role) -> LineSpec {
    LineSpec {
        approver_id,
        approver_name: format!("approver-{}", &approver_id.simple().to_string()[..6]),
        approver_role: role,
        line_type: LineType::Approval,
        delegate_id: None,
    }
}
