use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::approval::{ApprovalDocument, DocumentStatus};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification endpoint rejected event with status {0}")]
    Rejected(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Completed,
    Escalated,
}

/// Fire-and-forget event for the notification and audit collaborators.
/// Delivery is at-least-once; consumers deduplicate on `idempotency_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalNotification {
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub status: DocumentStatus,
    pub kind: NotificationKind,
    /// Approver the escalation is addressed to
    pub approver_id: Option<Uuid>,
}

impl ApprovalNotification {
    pub fn completed(doc: &ApprovalDocument) -> Self {
        Self::from_document(doc, NotificationKind::Completed, None)
    }

    pub fn escalated(doc: &ApprovalDocument, approver_id: Uuid) -> Self {
        Self::from_document(doc, NotificationKind::Escalated, Some(approver_id))
    }

    fn from_document(doc: &ApprovalDocument, kind: NotificationKind, approver_id: Option<Uuid>) -> Self {
        Self {
            document_id: doc.id,
            tenant_id: doc.tenant_id,
            reference_type: doc.reference_type.clone(),
            reference_id: doc.reference_id,
            status: doc.status,
            kind,
            approver_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        let kind = match self.kind {
            NotificationKind::Completed => "COMPLETED",
            NotificationKind::Escalated => "ESCALATED",
        };
        format!("{}:{}:{}", self.document_id, self.status, kind)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError>;
}

/// Writes events to the log; the default when no webhook is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        tracing::info!(
            document_id = %event.document_id,
            tenant_id = %event.tenant_id,
            status = %event.status,
            kind = ?event.kind,
            approver_id = ?event.approver_id,
            "approval notification"
        );
        Ok(())
    }
}

/// Keeps published events in memory; `set_failing` makes every publish fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ApprovalNotification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub async fn events(&self) -> Vec<ApprovalNotification> {
        self.events.lock().await.clone()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        if *self.failing.lock().await {
            return Err(NotifyError::Rejected(503));
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// POSTs events as JSON to the notification service
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", event.idempotency_key())
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        (**self).publish(event).await
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Box<N> {
    async fn publish(&self, event: &ApprovalNotification) -> Result<(), NotifyError> {
        (**self).publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_combines_document_status_and_kind() {
        let event = ApprovalNotification {
            document_id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            reference_type: "LEAVE_REQUEST".to_string(),
            reference_id: Uuid::nil(),
            status: DocumentStatus::InProgress,
            kind: NotificationKind::Escalated,
            approver_id: None,
        };
        assert_eq!(
            event.idempotency_key(),
            "00000000-0000-0000-0000-000000000000:IN_PROGRESS:ESCALATED"
        );
    }

    #[test]
    fn serializes_in_camel_case() {
        let event = ApprovalNotification {
            document_id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            reference_type: "OVERTIME".to_string(),
            reference_id: Uuid::nil(),
            status: DocumentStatus::Approved,
            kind: NotificationKind::Completed,
            approver_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["referenceType"], "OVERTIME");
        assert_eq!(json["status"], "APPROVED");
        assert_eq!(json["kind"], "COMPLETED");
    }
}
