use thiserror::Error;
use uuid::Uuid;

use super::document::DocumentStatus;
use crate::database::StoreError;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Document {0} not found")]
    DocumentNotFound(Uuid),

    #[error("Approval line {line_id} not found on document {document_id}")]
    LineNotFound { document_id: Uuid, line_id: Uuid },

    #[error("Document belongs to another tenant")]
    TenantMismatch { expected: Uuid, actual: Uuid },

    #[error("Not authorized to act on approval line {0}")]
    NotAuthorizedToApprove(Uuid),

    #[error("Only the drafter may perform this action")]
    NotDocumentOwner,

    #[error("Drafter cannot appear in their own approval line")]
    SelfApproval,

    #[error("Cannot transition document from {from} to {to}")]
    InvalidStateTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Cannot delegate approval line to {0}")]
    InvalidDelegate(Uuid),

    #[error("Document has no approval lines")]
    EmptyApprovalChain,

    #[error("Approval line {0} is not active")]
    LineNotActive(Uuid),

    #[error("Document has already been processed ({0})")]
    AlreadyProcessed(DocumentStatus),

    #[error("Document is finalized ({0}) and can no longer be modified")]
    DocumentAlreadyFinalized(DocumentStatus),

    #[error("Missing permission: {0}")]
    PermissionDenied(String),

    #[error("Document was modified concurrently, retry limit reached")]
    ConcurrentModification,

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ApprovalError {
    /// Stable machine-readable code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            ApprovalError::LineNotFound { .. } => "LINE_NOT_FOUND",
            ApprovalError::TenantMismatch { .. } => "TENANT_MISMATCH",
            ApprovalError::NotAuthorizedToApprove(_) => "NOT_AUTHORIZED_TO_APPROVE",
            ApprovalError::NotDocumentOwner => "NOT_DOCUMENT_OWNER",
            ApprovalError::SelfApproval => "SELF_APPROVAL",
            ApprovalError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApprovalError::InvalidDelegate(_) => "INVALID_DELEGATE",
            ApprovalError::EmptyApprovalChain => "EMPTY_APPROVAL_CHAIN",
            ApprovalError::LineNotActive(_) => "LINE_NOT_ACTIVE",
            ApprovalError::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            ApprovalError::DocumentAlreadyFinalized(_) => "DOCUMENT_ALREADY_FINALIZED",
            ApprovalError::PermissionDenied(_) => "PERMISSION_DENIED",
            ApprovalError::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ApprovalError::Notification(_) => "NOTIFICATION_FAILED",
            ApprovalError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
