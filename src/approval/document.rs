use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authz::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Approved | DocumentStatus::Rejected | DocumentStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::InProgress => "IN_PROGRESS",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Rejected => "REJECTED",
            DocumentStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Pending,
    Active,
    Approved,
    Rejected,
    Skipped,
}

impl LineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LineStatus::Approved | LineStatus::Rejected | LineStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Pending => "PENDING",
            LineStatus::Active => "ACTIVE",
            LineStatus::Approved => "APPROVED",
            LineStatus::Rejected => "REJECTED",
            LineStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineType {
    Approval,
    Agreement,
    Reference,
    /// Holder approves with full authority: approving ends the chain
    Arbitrary,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Approval => "APPROVAL",
            LineType::Agreement => "AGREEMENT",
            LineType::Reference => "REFERENCE",
            LineType::Arbitrary => "ARBITRARY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
    /// Approve and skip every later line
    DirectApprove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Submit,
    Approve,
    DirectApprove,
    Reject,
    Delegate,
    Cancel,
    Escalate,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Submit => "SUBMIT",
            HistoryAction::Approve => "APPROVE",
            HistoryAction::DirectApprove => "DIRECT_APPROVE",
            HistoryAction::Reject => "REJECT",
            HistoryAction::Delegate => "DELEGATE",
            HistoryAction::Cancel => "CANCEL",
            HistoryAction::Escalate => "ESCALATE",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v: &$ty| v.as_str() == s)
                    .ok_or_else(|| format!("invalid {} value: {}", stringify!($ty), s))
            }
        }
    };
}

impl_text_enum!(DocumentStatus, [
    DocumentStatus::Draft,
    DocumentStatus::InProgress,
    DocumentStatus::Approved,
    DocumentStatus::Rejected,
    DocumentStatus::Cancelled,
]);
impl_text_enum!(LineStatus, [
    LineStatus::Pending,
    LineStatus::Active,
    LineStatus::Approved,
    LineStatus::Rejected,
    LineStatus::Skipped,
]);
impl_text_enum!(LineType, [
    LineType::Approval,
    LineType::Agreement,
    LineType::Reference,
    LineType::Arbitrary,
]);
impl_text_enum!(HistoryAction, [
    HistoryAction::Submit,
    HistoryAction::Approve,
    HistoryAction::DirectApprove,
    HistoryAction::Reject,
    HistoryAction::Delegate,
    HistoryAction::Cancel,
    HistoryAction::Escalate,
]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalLine {
    pub id: Uuid,
    pub sequence: i32,
    pub approver_id: Uuid,
    pub approver_name: String,
    pub approver_role: Role,
    pub line_type: LineType,
    pub status: LineStatus,
    pub delegate_id: Option<Uuid>,
    pub comment: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistory {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: HistoryAction,
    pub from_status: DocumentStatus,
    pub to_status: DocumentStatus,
    pub line_sequence: Option<i32>,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_number: String,
    pub title: String,
    pub document_type: String,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub drafter_id: Uuid,
    pub status: DocumentStatus,
    pub deadline_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub lines: Vec<ApprovalLine>,
    pub history: Vec<ApprovalHistory>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Approver entry supplied by the submitting domain service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSpec {
    pub approver_id: Uuid,
    pub approver_name: String,
    #[serde(default = "default_approver_role")]
    pub approver_role: Role,
    #[serde(default = "default_line_type")]
    pub line_type: LineType,
    #[serde(default)]
    pub delegate_id: Option<Uuid>,
}

fn default_approver_role() -> Role {
    Role::TeamLeader
}

fn default_line_type() -> LineType {
    LineType::Approval
}

/// Input for creating a document in DRAFT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftDocument {
    pub title: String,
    pub document_type: String,
    pub reference_type: String,
    pub reference_id: Uuid,
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
    pub lines: Vec<LineSpec>,
}

impl ApprovalDocument {
    /// Builds a DRAFT document; lines are numbered 1..n in the given order
    pub fn draft(tenant_id: Uuid, drafter_id: Uuid, input: DraftDocument, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        let lines = input
            .lines
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| ApprovalLine {
                id: Uuid::new_v4(),
                sequence: idx as i32 + 1,
                approver_id: spec.approver_id,
                approver_name: spec.approver_name,
                approver_role: spec.approver_role,
                line_type: spec.line_type,
                status: LineStatus::Pending,
                delegate_id: spec.delegate_id,
                comment: None,
                acted_at: None,
            })
            .collect();

        Self {
            id,
            tenant_id,
            document_number: Self::document_number(&input.document_type, now, id),
            title: input.title,
            document_type: input.document_type,
            reference_type: input.reference_type,
            reference_id: input.reference_id,
            drafter_id,
            status: DocumentStatus::Draft,
            deadline_at: input.deadline_at,
            escalated: false,
            lines,
            history: Vec::new(),
            version: 0,
            created_at: now,
            submitted_at: None,
            completed_at: None,
        }
    }

    /// `{TYPE}-{YYYYMMDD}-{first 8 hex of id}`, e.g. `LEAVE-20261014-3fa85f64`
    fn document_number(document_type: &str, now: DateTime<Utc>, id: Uuid) -> String {
        let simple = id.simple().to_string();
        format!(
            "{}-{}-{}",
            document_type.to_ascii_uppercase(),
            now.format("%Y%m%d"),
            &simple[..8]
        )
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn active_line(&self) -> Option<&ApprovalLine> {
        self.lines.iter().find(|l| l.status == LineStatus::Active)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == DocumentStatus::InProgress
            && !self.escalated
            && self.deadline_at.map_or(false, |deadline| deadline < now)
    }

    /// Checks the line-ordering invariants; returns a description of the first violation
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.lines.windows(2).any(|w| w[0].sequence >= w[1].sequence) {
            return Err("line sequences are not strictly increasing".to_string());
        }

        let active: Vec<&ApprovalLine> = self
            .lines
            .iter()
            .filter(|l| l.status == LineStatus::Active)
            .collect();

        match self.status {
            DocumentStatus::InProgress => {
                if active.len() != 1 {
                    return Err(format!("expected exactly one active line, found {}", active.len()));
                }
                let pivot = active[0].sequence;
                for line in &self.lines {
                    if line.sequence < pivot && !line.status.is_terminal() {
                        return Err(format!("line {} before the active line is not terminal", line.sequence));
                    }
                    if line.sequence > pivot && line.status != LineStatus::Pending {
                        return Err(format!("line {} after the active line is not pending", line.sequence));
                    }
                }
            }
            DocumentStatus::Approved | DocumentStatus::Rejected => {
                if let Some(line) = self.lines.iter().find(|l| !l.status.is_terminal()) {
                    return Err(format!("finalized document still has {} line {}", line.status, line.sequence));
                }
            }
            DocumentStatus::Draft | DocumentStatus::Cancelled => {
                if !active.is_empty() {
                    return Err(format!("{} document has an active line", self.status));
                }
            }
        }
        Ok(())
    }
}
