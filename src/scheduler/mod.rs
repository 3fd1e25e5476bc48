//! Periodic escalation of approval documents past their deadline.
//!
//! Each sweep walks the active tenants one at a time under a synthetic
//! system context, so every storage call stays tenant-scoped exactly like a
//! request would be.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::approval::{ApprovalDocument, ApprovalEngine, EscalationOutcome};
use crate::config::SchedulerConfig;
use crate::database::{ApprovalStore, StoreError};
use crate::notification::Notifier;
use crate::tenant::{ContextScope, TenantContext};

/// Totals for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tenants: usize,
    pub escalated: usize,
    pub failed: usize,
}

pub struct DeadlineScheduler<S: ApprovalStore, N: Notifier> {
    engine: ApprovalEngine<S, N>,
    config: SchedulerConfig,
}

impl<S: ApprovalStore, N: Notifier> DeadlineScheduler<S, N> {
    pub fn new(engine: ApprovalEngine<S, N>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sweep on every tick until `shutdown` resolves. The first tick fires immediately.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.config.sweep_interval_secs,
            batch_size = self.config.batch_size,
            "Deadline scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) => tracing::info!(
                            tenants = report.tenants,
                            escalated = report.escalated,
                            failed = report.failed,
                            "Deadline sweep finished"
                        ),
                        Err(e) => tracing::error!("Deadline sweep aborted: {}", e),
                    }
                }
            }
        }

        tracing::info!("Deadline scheduler stopped");
    }

    /// Escalate every overdue document, tenant by tenant.
    ///
    /// Only listing the tenants can fail the sweep; a failure inside one
    /// tenant or one document is logged, counted, and left for the next sweep.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let tenants = self.engine.store().active_tenants().await?;
        let mut report = SweepReport::default();

        for tenant_id in tenants {
            report.tenants += 1;
            let mut scope = ContextScope::begin(TenantContext::system(tenant_id));
            match scope.current() {
                Ok(ctx) => self.sweep_tenant(ctx, now, &mut report).await,
                Err(e) => {
                    tracing::error!(%tenant_id, "No system context for sweep: {}", e);
                    report.failed += 1;
                }
            }
            scope.teardown();
        }

        Ok(report)
    }

    async fn sweep_tenant(&self, ctx: &TenantContext, now: DateTime<Utc>, report: &mut SweepReport) {
        let batch = match self
            .engine
            .store()
            .overdue_batch(ctx, now, self.config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(tenant_id = %ctx.tenant_id, "Overdue query failed: {}", e);
                report.failed += 1;
                return;
            }
        };

        if !batch.is_empty() {
            tracing::debug!(tenant_id = %ctx.tenant_id, overdue = batch.len(), "Escalating overdue documents");
        }

        for doc in batch {
            let document_id = doc.id;
            match self.escalate_with_timeout(ctx, doc, now).await {
                Ok(EscalationOutcome::Escalated) => report.escalated += 1,
                Ok(EscalationOutcome::Skipped) => {}
                Err(reason) => {
                    tracing::warn!(
                        tenant_id = %ctx.tenant_id,
                        %document_id,
                        "Escalation failed, will retry next sweep: {}",
                        reason
                    );
                    report.failed += 1;
                }
            }
        }
    }

    async fn escalate_with_timeout(
        &self,
        ctx: &TenantContext,
        doc: ApprovalDocument,
        now: DateTime<Utc>,
    ) -> Result<EscalationOutcome, String> {
        let timeout: Duration = self.config.escalation_timeout();
        match tokio::time::timeout(timeout, self.engine.escalate(ctx, doc, now)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", timeout)),
        }
    }
}

/// Spawn `run` on the runtime; the task ends once `shutdown` resolves
pub fn spawn<S, N, F>(scheduler: Arc<DeadlineScheduler<S, N>>, shutdown: F) -> tokio::task::JoinHandle<()>
where
    S: ApprovalStore + 'static,
    N: Notifier + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move { scheduler.run(shutdown).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::approval::{Decision, DocumentStatus, HistoryAction};
    use crate::authz::Role;
    use crate::notification::NotificationKind;
    use crate::database::MemoryApprovalStore;
    use crate::testing::{line_spec, RecordingNotifier, TestContext};

    async fn overdue_document(t: &TestContext, approver: Uuid) -> Uuid {
        let mut draft = t.draft(vec![line_spec(approver, Role::TeamLeader)]);
        draft.deadline_at = Some(Utc::now() - chrono::Duration::hours(2));
        t.engine.create(&t.drafter, draft, true).await.unwrap().id
    }

    fn scheduler(t: &TestContext) -> DeadlineScheduler<MemoryApprovalStore, RecordingNotifier> {
        DeadlineScheduler::new(t.engine.clone(), SchedulerConfig::default())
    }

    #[tokio::test]
    async fn second_sweep_does_not_notify_again() {
        let t = TestContext::new();
        let approver = Uuid::new_v4();
        let id = overdue_document(&t, approver).await;
        let scheduler = scheduler(&t);

        let first = scheduler.sweep_once(Utc::now()).await.unwrap();
        let second = scheduler.sweep_once(Utc::now()).await.unwrap();

        assert_eq!(first, SweepReport { tenants: 1, escalated: 1, failed: 0 });
        assert_eq!(second.escalated, 0);

        let events = t.notifier.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NotificationKind::Escalated);
        assert_eq!(events[0].approver_id, Some(approver));

        let doc = t.store.snapshot(id).await.unwrap();
        assert!(doc.escalated);
        assert_eq!(doc.status, DocumentStatus::InProgress);
        assert_eq!(doc.history.last().map(|h| h.action), Some(HistoryAction::Escalate));
    }

    #[tokio::test]
    async fn failed_delivery_leaves_document_for_next_sweep() {
        let t = TestContext::new();
        let id = overdue_document(&t, Uuid::new_v4()).await;
        let scheduler = scheduler(&t);

        t.notifier.set_failing(true).await;
        let report = scheduler.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport { tenants: 1, escalated: 0, failed: 1 });
        assert!(!t.store.snapshot(id).await.unwrap().escalated);

        t.notifier.set_failing(false).await;
        let report = scheduler.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.escalated, 1);
        assert!(t.store.snapshot(id).await.unwrap().escalated);
    }

    #[tokio::test]
    async fn documents_before_deadline_or_finished_are_ignored() {
        let t = TestContext::new();
        let approver = Uuid::new_v4();

        let mut future = t.draft(vec![line_spec(approver, Role::TeamLeader)]);
        future.deadline_at = Some(Utc::now() + chrono::Duration::hours(2));
        t.engine.create(&t.drafter, future, true).await.unwrap();

        let done = overdue_document(&t, approver).await;
        let doc = t.store.snapshot(done).await.unwrap();
        t.engine
            .decide(&t.user(approver, [Role::TeamLeader]), done, doc.lines[0].id, Decision::Approve, None)
            .await
            .unwrap();

        let report = scheduler(&t).sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.escalated, 0);
    }

    #[tokio::test]
    async fn tenants_are_swept_in_isolation() {
        let t = TestContext::new();
        let other = TestContext::new();
        overdue_document(&t, Uuid::new_v4()).await;
        t.store.register_tenant(other.tenant_id).await;

        let report = scheduler(&t).sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.tenants, 2);
        assert_eq!(report.escalated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let t = TestContext::new();
        overdue_document(&t, Uuid::new_v4()).await;
        let scheduler = Arc::new(scheduler(&t));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = spawn(Arc::clone(&scheduler), async move {
            let _ = rx.await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(t.notifier.events().await.len(), 1);
    }
}
