#![allow(dead_code)]

use std::sync::{Arc, Once};

use uuid::Uuid;

use hr_approval_core::approval::{ApprovalEngine, DraftDocument, LineSpec, LineType};
use hr_approval_core::auth::TokenService;
use hr_approval_core::authz::{AuthorizationEvaluator, Role};
use hr_approval_core::database::{MemoryApprovalStore, MemoryPool};
pub use hr_approval_core::notification::RecordingNotifier;
use hr_approval_core::tenant::TenantContext;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

static TRACING: Once = Once::new();

/// Route library logs through the test harness when RUST_LOG is set
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub type TestEngine = ApprovalEngine<MemoryApprovalStore, RecordingNotifier>;

pub struct Fixture {
    pub tenant_id: Uuid,
    pub store: Arc<MemoryApprovalStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: TestEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_pool(MemoryPool::new())
    }

    pub fn with_pool(pool: MemoryPool) -> Self {
        init_tracing();
        let store = Arc::new(MemoryApprovalStore::with_pool(pool));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ApprovalEngine::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::new(AuthorizationEvaluator::default()),
        );
        Self {
            tenant_id: Uuid::new_v4(),
            store,
            notifier,
            engine,
        }
    }

    pub fn user<const N: usize>(&self, roles: [Role; N]) -> TenantContext {
        TenantContext::new(self.tenant_id, Uuid::new_v4(), roles)
    }

    pub fn as_user<const N: usize>(&self, user_id: Uuid, roles: [Role; N]) -> TenantContext {
        TenantContext::new(self.tenant_id, user_id, roles)
    }
}

pub fn tokens() -> TokenService {
    TokenService::new(TEST_SECRET, 1800, 604_800).expect("test token service")
}

pub fn line(approver_id: Uuid, role: Role) -> LineSpec {
    LineSpec {
        approver_id,
        approver_name: format!("approver-{}", &approver_id.simple().to_string()[..6]),
        approver_role: role,
        line_type: LineType::Approval,
        delegate_id: None,
    }
}

pub fn leave_request(lines: Vec<LineSpec>) -> DraftDocument {
    DraftDocument {
        title: "Annual leave".to_string(),
        document_type: "leave".to_string(),
        reference_type: "LEAVE_REQUEST".to_string(),
        reference_id: Uuid::new_v4(),
        deadline_at: None,
        lines,
    }
}
