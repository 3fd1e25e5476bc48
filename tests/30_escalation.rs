mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use common::{leave_request, line, Fixture};
use hr_approval_core::approval::{ApprovalEngine, DocumentStatus, EscalationOutcome, LineStatus};
use hr_approval_core::authz::{AuthorizationEvaluator, Role};
use hr_approval_core::config::SchedulerConfig;
use hr_approval_core::database::{ApprovalStore, MemoryApprovalStore};
use hr_approval_core::notification::{ApprovalNotification, Notifier, NotifyError};
use hr_approval_core::scheduler::{DeadlineScheduler, SweepReport};
use hr_approval_core::tenant::TenantContext;

fn overdue_request(approver: Uuid) -> hr_approval_core::approval::DraftDocument {
    let mut draft = leave_request(vec![line(approver, Role::TeamLeader), line(Uuid::new_v4(), Role::DeptManager)]);
    draft.deadline_at = Some(Utc::now() - chrono::Duration::minutes(30));
    draft
}

#[tokio::test]
async fn sweep_escalates_once_and_leaves_workflow_untouched() {
    let f = Fixture::new();
    let drafter = f.user([Role::Employee]);
    let approver = Uuid::new_v4();
    let doc = f.engine.create(&drafter, overdue_request(approver), true).await.unwrap();

    let scheduler = DeadlineScheduler::new(f.engine.clone(), SchedulerConfig::default());
    let first = scheduler.sweep_once(Utc::now()).await.unwrap();
    let second = scheduler.sweep_once(Utc::now()).await.unwrap();

    assert_eq!(first, SweepReport { tenants: 1, escalated: 1, failed: 0 });
    assert_eq!(second, SweepReport { tenants: 1, escalated: 0, failed: 0 });

    let events = f.notifier.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].approver_id, Some(approver));
    assert_eq!(events[0].status, DocumentStatus::InProgress);

    let stored = f.store.snapshot(doc.id).await.unwrap();
    assert!(stored.escalated);
    assert_eq!(stored.status, DocumentStatus::InProgress);
    assert_eq!(stored.lines[0].status, LineStatus::Active);
    assert_eq!(stored.lines[1].status, LineStatus::Pending);
}

#[tokio::test]
async fn one_failing_tenant_does_not_stop_the_sweep() {
    let f = Fixture::new();
    let approver = Uuid::new_v4();

    let other_tenant = Uuid::new_v4();
    let other_drafter = TenantContext::new(other_tenant, Uuid::new_v4(), [Role::Employee]);
    f.engine.create(&f.user([Role::Employee]), overdue_request(approver), true).await.unwrap();
    f.engine.create(&other_drafter, overdue_request(approver), true).await.unwrap();

    // The next stamp fails: the first tenant visited cannot even list its overdue batch
    f.store.pool().fail_next_stamps(1).await;

    let scheduler = DeadlineScheduler::new(f.engine.clone(), SchedulerConfig::default());
    let report = scheduler.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.tenants, 2);
    assert_eq!(report.escalated, 1);
    assert_eq!(report.failed, 1);

    let report = scheduler.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport { tenants: 2, escalated: 1, failed: 0 });
}

/// Never answers, to exercise the per-document escalation timeout
struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn publish(&self, _event: &ApprovalNotification) -> Result<(), NotifyError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn hung_notification_times_out_and_sweep_moves_on() {
    let store = Arc::new(MemoryApprovalStore::new());
    let engine = ApprovalEngine::new(
        Arc::clone(&store),
        Arc::new(HangingNotifier),
        Arc::new(AuthorizationEvaluator::default()),
    );
    let tenant = Uuid::new_v4();
    let drafter = TenantContext::new(tenant, Uuid::new_v4(), [Role::Employee]);
    let first = engine.create(&drafter, overdue_request(Uuid::new_v4()), true).await.unwrap();
    let second = engine.create(&drafter, overdue_request(Uuid::new_v4()), true).await.unwrap();

    let config = SchedulerConfig {
        escalation_timeout_ms: 200,
        ..SchedulerConfig::default()
    };
    let scheduler = DeadlineScheduler::new(engine, config);

    let report = tokio::time::timeout(Duration::from_secs(5), scheduler.sweep_once(Utc::now()))
        .await
        .expect("sweep must not hang");
    let report = report.unwrap();

    assert_eq!(report, SweepReport { tenants: 1, escalated: 0, failed: 2 });
    assert!(!store.snapshot(first.id).await.unwrap().escalated);
    assert!(!store.snapshot(second.id).await.unwrap().escalated);
}

/// Approves the first line in storage while the first alert is being delivered
struct AdvancingNotifier {
    store: Arc<MemoryApprovalStore>,
    advanced: Mutex<bool>,
    alerts: Mutex<Vec<Option<Uuid>>>,
}

impl AdvancingNotifier {
    fn new(store: Arc<MemoryApprovalStore>) -> Self {
        Self {
            store,
            advanced: Mutex::new(false),
            alerts: Mutex::new(Vec::new()),
        }
    }

    async fn alerts(&self) -> Vec<Option<Uuid>> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for AdvancingNotifier {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        self.alerts.lock().await.push(event.approver_id);

        let mut advanced = self.advanced.lock().await;
        if !*advanced {
            *advanced = true;
            let mut doc = self.store.snapshot(event.document_id).await.unwrap();
            let expected = doc.version;
            doc.lines[0].status = LineStatus::Approved;
            doc.lines[1].status = LineStatus::Active;
            doc.version = expected + 1;
            self.store
                .update(&TenantContext::system(event.tenant_id), &doc, expected)
                .await
                .unwrap();
        }
        Ok(())
    }
}

#[tokio::test]
async fn approver_change_during_alert_defers_escalation_to_the_new_approver() {
    let store = Arc::new(MemoryApprovalStore::new());
    let notifier = Arc::new(AdvancingNotifier::new(Arc::clone(&store)));
    let engine = ApprovalEngine::new(
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::new(AuthorizationEvaluator::default()),
    );
    let tenant = Uuid::new_v4();
    let drafter = TenantContext::new(tenant, Uuid::new_v4(), [Role::Employee]);
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

    let mut draft = leave_request(vec![line(x, Role::TeamLeader), line(y, Role::DeptManager)]);
    draft.deadline_at = Some(Utc::now() - chrono::Duration::minutes(30));
    let doc = engine.create(&drafter, draft, true).await.unwrap();
    let id = doc.id;

    let outcome = engine.escalate(&TenantContext::system(tenant), doc, Utc::now()).await.unwrap();
    assert_eq!(outcome, EscalationOutcome::Skipped);
    let stored = store.snapshot(id).await.unwrap();
    assert!(!stored.escalated);
    assert_eq!(stored.active_line().map(|l| l.approver_id), Some(y));

    let scheduler = DeadlineScheduler::new(engine, SchedulerConfig::default());
    let report = scheduler.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport { tenants: 1, escalated: 1, failed: 0 });
    assert_eq!(notifier.alerts().await, vec![Some(x), Some(y)]);
    assert!(store.snapshot(id).await.unwrap().escalated);
}
