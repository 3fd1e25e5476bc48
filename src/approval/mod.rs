pub mod document;
pub mod engine;
pub mod error;

pub use document::{
    ApprovalDocument, ApprovalHistory, ApprovalLine, Decision, DocumentStatus, DraftDocument,
    HistoryAction, LineSpec, LineStatus, LineType,
};
pub use engine::{ApprovalEngine, EscalationOutcome};
pub use error::ApprovalError;
