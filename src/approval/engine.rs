use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::document::{
    ApprovalDocument, ApprovalHistory, Decision, DocumentStatus, DraftDocument, HistoryAction,
    LineStatus, LineType,
};
use super::error::ApprovalError;
use crate::authz::AuthorizationEvaluator;
use crate::database::{ApprovalStore, StoreError};
use crate::notification::{ApprovalNotification, Notifier};
use crate::tenant::TenantContext;

/// Optimistic-concurrency retries before giving up with `ConcurrentModification`
const MAX_ATTEMPTS: usize = 3;

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one escalation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    Escalated,
    /// Not overdue any more, already escalated, or no longer in progress
    Skipped,
}

/// The approval state machine. Sole writer of document and line statuses.
pub struct ApprovalEngine<S: ApprovalStore, N: Notifier> {
    store: Arc<S>,
    notifier: Arc<N>,
    authz: Arc<AuthorizationEvaluator>,
    notify_timeout: Duration,
}

impl<S: ApprovalStore, N: Notifier> Clone for ApprovalEngine<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            authz: Arc::clone(&self.authz),
            notify_timeout: self.notify_timeout,
        }
    }
}

impl<S: ApprovalStore, N: Notifier> ApprovalEngine<S, N> {
    pub fn new(store: Arc<S>, notifier: Arc<N>, authz: Arc<AuthorizationEvaluator>) -> Self {
        Self {
            store,
            notifier,
            authz,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn authz(&self) -> &AuthorizationEvaluator {
        &self.authz
    }

    /// Create a DRAFT document for the caller, optionally submitting it right away
    pub async fn create(
        &self,
        ctx: &TenantContext,
        draft: DraftDocument,
        submit_immediately: bool,
    ) -> Result<ApprovalDocument, ApprovalError> {
        self.require_permission(ctx, "approval:request")?;

        if draft.lines.iter().any(|l| l.approver_id == ctx.user_id) {
            return Err(ApprovalError::SelfApproval);
        }

        let now = Utc::now();
        let mut doc = ApprovalDocument::draft(ctx.tenant_id, ctx.user_id, draft, now);
        // Submitted before the single insert, so a rejected submit stores nothing
        if submit_immediately {
            apply_submit(&mut doc, ctx.user_id, now)?;
        }
        self.store.insert(ctx, &doc).await?;

        tracing::info!(
            document_id = %doc.id,
            document_number = %doc.document_number,
            tenant_id = %ctx.tenant_id,
            status = %doc.status,
            "Approval document created"
        );
        Ok(doc)
    }

    pub async fn get(&self, ctx: &TenantContext, document_id: Uuid) -> Result<ApprovalDocument, ApprovalError> {
        self.load_scoped(ctx, document_id).await
    }

    /// DRAFT → IN_PROGRESS; the lowest-sequence line becomes ACTIVE
    pub async fn submit(&self, ctx: &TenantContext, document_id: Uuid) -> Result<ApprovalDocument, ApprovalError> {
        self.transition(ctx, document_id, |doc, now| {
            Self::require_owner(ctx, doc)?;
            apply_submit(doc, ctx.user_id, now)
        })
        .await
    }

    /// DRAFT | IN_PROGRESS → CANCELLED; outstanding lines are skipped
    pub async fn cancel(&self, ctx: &TenantContext, document_id: Uuid) -> Result<ApprovalDocument, ApprovalError> {
        self.transition(ctx, document_id, |doc, now| {
            Self::require_owner(ctx, doc)?;
            apply_cancel(doc, ctx.user_id, now)
        })
        .await
    }

    /// Record `decision` on `line_id` by the caller.
    ///
    /// Concurrent decisions on one document are serialized by the version
    /// check: the first to commit wins and the other, after reloading, fails
    /// with `LineNotActive` or `AlreadyProcessed`.
    pub async fn decide(
        &self,
        ctx: &TenantContext,
        document_id: Uuid,
        line_id: Uuid,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ApprovalDocument, ApprovalError> {
        let authz = Arc::clone(&self.authz);
        let doc = self
            .transition(ctx, document_id, |doc, now| {
                apply_decision(doc, line_id, decision, ctx, &authz, comment.clone(), now)
            })
            .await?;

        if matches!(doc.status, DocumentStatus::Approved | DocumentStatus::Rejected) {
            let event = ApprovalNotification::completed(&doc);
            if let Err(e) = self.notify(&event).await {
                // The transition is committed; delivery is retried by the collaborator's outbox
                tracing::warn!(document_id = %doc.id, "Completion notification not delivered: {}", e);
            }
        }
        Ok(doc)
    }

    /// Hand the ACTIVE line to `delegate_id`. The line stays ACTIVE and the
    /// document status is unchanged; only the approver or the current
    /// delegate may pass it on.
    pub async fn delegate(
        &self,
        ctx: &TenantContext,
        document_id: Uuid,
        line_id: Uuid,
        delegate_id: Uuid,
        comment: Option<String>,
    ) -> Result<ApprovalDocument, ApprovalError> {
        self.transition(ctx, document_id, |doc, now| {
            apply_delegation(doc, line_id, delegate_id, ctx, comment.clone(), now)
        })
        .await
    }

    /// Flag an overdue document as escalated and alert its active approver.
    ///
    /// The notification goes out first and the flag is persisted only after
    /// delivery, so a failed delivery leaves the document eligible for the
    /// next sweep. Status and lines are never touched.
    pub async fn escalate(
        &self,
        ctx: &TenantContext,
        document: ApprovalDocument,
        now: DateTime<Utc>,
    ) -> Result<EscalationOutcome, ApprovalError> {
        Self::require_tenant(ctx, &document)?;
        if !document.is_overdue(now) {
            return Ok(EscalationOutcome::Skipped);
        }
        let approver_id = match document.active_line() {
            Some(line) => line.approver_id,
            None => return Ok(EscalationOutcome::Skipped),
        };

        let event = ApprovalNotification::escalated(&document, approver_id);
        self.notify(&event).await.map_err(ApprovalError::Notification)?;

        let mut doc = document;
        for _ in 0..MAX_ATTEMPTS {
            let expected = doc.version;
            apply_escalation(&mut doc, now);
            doc.version = expected + 1;

            match self.store.update(ctx, &doc, expected).await {
                Ok(()) => {
                    tracing::info!(
                        document_id = %doc.id,
                        tenant_id = %ctx.tenant_id,
                        %approver_id,
                        "Approval document escalated"
                    );
                    return Ok(EscalationOutcome::Escalated);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    doc = self.load_scoped(ctx, doc.id).await?;
                    if !doc.is_overdue(now) {
                        return Ok(EscalationOutcome::Skipped);
                    }
                    // The alert named the approver we saw; a moved chain is left for the next sweep
                    if doc.active_line().map(|l| l.approver_id) != Some(approver_id) {
                        tracing::info!(
                            document_id = %doc.id,
                            notified = %approver_id,
                            "Active approver changed during escalation, deferring"
                        );
                        return Ok(EscalationOutcome::Skipped);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ApprovalError::ConcurrentModification)
    }

    /// Load, validate against the caller's tenant, mutate, and compare-and-swap.
    /// On a version conflict the whole step is re-run against fresh state.
    async fn transition<F>(
        &self,
        ctx: &TenantContext,
        document_id: Uuid,
        mut step: F,
    ) -> Result<ApprovalDocument, ApprovalError>
    where
        F: FnMut(&mut ApprovalDocument, DateTime<Utc>) -> Result<(), ApprovalError> + Send,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut doc = self.load_scoped(ctx, document_id).await?;
            let expected = doc.version;
            let from = doc.status;

            step(&mut doc, Utc::now())?;
            doc.version = expected + 1;

            match self.store.update(ctx, &doc, expected).await {
                Ok(()) => {
                    tracing::info!(
                        document_id = %doc.id,
                        tenant_id = %ctx.tenant_id,
                        actor_id = %ctx.user_id,
                        from = %from,
                        to = %doc.status,
                        "Approval document transitioned"
                    );
                    return Ok(doc);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(%document_id, attempt, "Version conflict, reloading document");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ApprovalError::ConcurrentModification)
    }

    async fn load_scoped(&self, ctx: &TenantContext, document_id: Uuid) -> Result<ApprovalDocument, ApprovalError> {
        let doc = self
            .store
            .load(ctx, document_id)
            .await?
            .ok_or(ApprovalError::DocumentNotFound(document_id))?;
        Self::require_tenant(ctx, &doc)?;
        Ok(doc)
    }

    fn require_tenant(ctx: &TenantContext, doc: &ApprovalDocument) -> Result<(), ApprovalError> {
        if doc.tenant_id != ctx.tenant_id {
            tracing::warn!(
                document_id = %doc.id,
                caller_tenant = %ctx.tenant_id,
                "Cross-tenant document access rejected"
            );
            return Err(ApprovalError::TenantMismatch {
                expected: ctx.tenant_id,
                actual: doc.tenant_id,
            });
        }
        Ok(())
    }

    fn require_owner(ctx: &TenantContext, doc: &ApprovalDocument) -> Result<(), ApprovalError> {
        if doc.drafter_id != ctx.user_id {
            return Err(ApprovalError::NotDocumentOwner);
        }
        Ok(())
    }

    fn require_permission(&self, ctx: &TenantContext, permission: &str) -> Result<(), ApprovalError> {
        if !self.authz.has_permission(&ctx.roles, permission) {
            return Err(ApprovalError::PermissionDenied(permission.to_string()));
        }
        Ok(())
    }

    async fn notify(&self, event: &ApprovalNotification) -> Result<(), String> {
        match tokio::time::timeout(self.notify_timeout, self.notifier.publish(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.notify_timeout)),
        }
    }
}

fn history(
    doc: &ApprovalDocument,
    actor_id: Uuid,
    action: HistoryAction,
    from: DocumentStatus,
    line_sequence: Option<i32>,
    comment: Option<String>,
    at: DateTime<Utc>,
) -> ApprovalHistory {
    ApprovalHistory {
        id: Uuid::new_v4(),
        actor_id,
        action,
        from_status: from,
        to_status: doc.status,
        line_sequence,
        comment,
        at,
    }
}

pub(crate) fn apply_submit(
    doc: &mut ApprovalDocument,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    match doc.status {
        DocumentStatus::Draft => {}
        status if status.is_terminal() => return Err(ApprovalError::DocumentAlreadyFinalized(status)),
        status => {
            return Err(ApprovalError::InvalidStateTransition {
                from: status,
                to: DocumentStatus::InProgress,
            })
        }
    }
    if doc.lines.is_empty() {
        return Err(ApprovalError::EmptyApprovalChain);
    }

    doc.lines.sort_by_key(|l| l.sequence);
    for (idx, line) in doc.lines.iter_mut().enumerate() {
        line.status = if idx == 0 { LineStatus::Active } else { LineStatus::Pending };
    }

    let from = doc.status;
    doc.status = DocumentStatus::InProgress;
    doc.submitted_at = Some(now);
    let first = doc.lines.first().map(|l| l.sequence);
    let entry = history(doc, actor_id, HistoryAction::Submit, from, first, None, now);
    doc.history.push(entry);
    Ok(())
}

pub(crate) fn apply_decision(
    doc: &mut ApprovalDocument,
    line_id: Uuid,
    decision: Decision,
    ctx: &TenantContext,
    authz: &AuthorizationEvaluator,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    if doc.is_finalized() {
        return Err(ApprovalError::AlreadyProcessed(doc.status));
    }
    if doc.status != DocumentStatus::InProgress {
        let to = match decision {
            Decision::Approve | Decision::DirectApprove => DocumentStatus::Approved,
            Decision::Reject => DocumentStatus::Rejected,
        };
        return Err(ApprovalError::InvalidStateTransition { from: doc.status, to });
    }

    let idx = active_line_index(doc, line_id)?;
    if !authz.can_act_as_approver(ctx, &doc.lines[idx]) {
        return Err(ApprovalError::NotAuthorizedToApprove(line_id));
    }

    let from = doc.status;
    let sequence = doc.lines[idx].sequence;
    {
        let line = &mut doc.lines[idx];
        line.comment = comment.clone();
        line.acted_at = Some(now);
    }

    let decision = match (decision, doc.lines[idx].line_type) {
        (Decision::Approve, LineType::Arbitrary) => Decision::DirectApprove,
        (decision, _) => decision,
    };

    let action = match decision {
        Decision::DirectApprove => {
            doc.lines[idx].status = LineStatus::Approved;
            for line in doc.lines.iter_mut().skip(idx + 1) {
                line.status = LineStatus::Skipped;
            }
            doc.status = DocumentStatus::Approved;
            doc.completed_at = Some(now);
            HistoryAction::DirectApprove
        }
        Decision::Approve => {
            doc.lines[idx].status = LineStatus::Approved;
            match doc.lines.get_mut(idx + 1) {
                Some(next) => next.status = LineStatus::Active,
                None => {
                    doc.status = DocumentStatus::Approved;
                    doc.completed_at = Some(now);
                }
            }
            HistoryAction::Approve
        }
        Decision::Reject => {
            doc.lines[idx].status = LineStatus::Rejected;
            for line in doc.lines.iter_mut().skip(idx + 1) {
                line.status = LineStatus::Skipped;
            }
            doc.status = DocumentStatus::Rejected;
            doc.completed_at = Some(now);
            HistoryAction::Reject
        }
    };

    let entry = history(doc, ctx.user_id, action, from, Some(sequence), comment, now);
    doc.history.push(entry);
    Ok(())
}

fn active_line_index(doc: &ApprovalDocument, line_id: Uuid) -> Result<usize, ApprovalError> {
    let idx = doc
        .lines
        .iter()
        .position(|l| l.id == line_id)
        .ok_or(ApprovalError::LineNotFound {
            document_id: doc.id,
            line_id,
        })?;

    if doc.lines[idx].status != LineStatus::Active {
        return Err(ApprovalError::LineNotActive(line_id));
    }
    Ok(idx)
}

pub(crate) fn apply_delegation(
    doc: &mut ApprovalDocument,
    line_id: Uuid,
    delegate_id: Uuid,
    ctx: &TenantContext,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    if doc.is_finalized() {
        return Err(ApprovalError::AlreadyProcessed(doc.status));
    }
    let idx = active_line_index(doc, line_id)?;

    let line = &doc.lines[idx];
    if line.approver_id != ctx.user_id && line.delegate_id != Some(ctx.user_id) {
        return Err(ApprovalError::NotAuthorizedToApprove(line_id));
    }
    if delegate_id == doc.drafter_id {
        return Err(ApprovalError::SelfApproval);
    }
    if delegate_id == line.approver_id || delegate_id == ctx.user_id || delegate_id.is_nil() {
        return Err(ApprovalError::InvalidDelegate(delegate_id));
    }

    let sequence = line.sequence;
    doc.lines[idx].delegate_id = Some(delegate_id);
    let entry = history(doc, ctx.user_id, HistoryAction::Delegate, doc.status, Some(sequence), comment, now);
    doc.history.push(entry);
    Ok(())
}

pub(crate) fn apply_cancel(
    doc: &mut ApprovalDocument,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    if doc.is_finalized() {
        return Err(ApprovalError::DocumentAlreadyFinalized(doc.status));
    }

    for line in doc.lines.iter_mut().filter(|l| !l.status.is_terminal()) {
        line.status = LineStatus::Skipped;
    }

    let from = doc.status;
    doc.status = DocumentStatus::Cancelled;
    doc.completed_at = Some(now);
    let entry = history(doc, actor_id, HistoryAction::Cancel, from, None, None, now);
    doc.history.push(entry);
    Ok(())
}

fn apply_escalation(doc: &mut ApprovalDocument, now: DateTime<Utc>) {
    doc.escalated = true;
    let sequence = doc.active_line().map(|l| l.sequence);
    let entry = history(doc, Uuid::nil(), HistoryAction::Escalate, doc.status, sequence, None, now);
    doc.history.push(entry);
}
