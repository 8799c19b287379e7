use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowKind {
    Loan,
    Deposit,
    SavingsWithdrawal,
    MemberApplication,
    LoanRepayment,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 5] = [
        WorkflowKind::Loan,
        WorkflowKind::Deposit,
        WorkflowKind::SavingsWithdrawal,
        WorkflowKind::MemberApplication,
        WorkflowKind::LoanRepayment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loan => "LOAN",
            Self::Deposit => "DEPOSIT",
            Self::SavingsWithdrawal => "SAVINGS_WITHDRAWAL",
            Self::MemberApplication => "MEMBER_APPLICATION",
            Self::LoanRepayment => "LOAN_REPAYMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOAN" => Some(Self::Loan),
            "DEPOSIT" => Some(Self::Deposit),
            "SAVINGS_WITHDRAWAL" => Some(Self::SavingsWithdrawal),
            "MEMBER_APPLICATION" => Some(Self::MemberApplication),
            "LOAN_REPAYMENT" => Some(Self::LoanRepayment),
            _ => None,
        }
    }

    /// Human label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loan => "pengajuan pinjaman",
            Self::Deposit => "pengajuan deposito",
            Self::SavingsWithdrawal => "penarikan tabungan",
            Self::MemberApplication => "pendaftaran anggota",
            Self::LoanRepayment => "pelunasan pinjaman",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStep {
    DivisiSimpanPinjam,
    Ketua,
    Pengawas,
}

impl ApprovalStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DivisiSimpanPinjam => "DIVISI_SIMPAN_PINJAM",
            Self::Ketua => "KETUA",
            Self::Pengawas => "PENGAWAS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DIVISI_SIMPAN_PINJAM" | "DSP" => Some(Self::DivisiSimpanPinjam),
            "KETUA" => Some(Self::Ketua),
            "PENGAWAS" => Some(Self::Pengawas),
            _ => None,
        }
    }

    /// The level that owns this step by default.
    pub fn default_role(&self) -> Role {
        match self {
            Self::DivisiSimpanPinjam => Role::DivisiSimpanPinjam,
            Self::Ketua => Role::Ketua,
            Self::Pengawas => Role::Pengawas,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview(ApprovalStep),
    Approved,
    ApprovedPendingDisbursement,
    Disbursed,
    Active,
    Completed,
    Rejected,
    Cancelled,
}

impl ApplicationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_uppercase();
        if let Some(step) = value.strip_prefix("UNDER_REVIEW_") {
            return ApprovalStep::parse(step).map(Self::UnderReview);
        }

        match value.as_str() {
            "DRAFT" => Some(Self::Draft),
            "SUBMITTED" => Some(Self::Submitted),
            "APPROVED" => Some(Self::Approved),
            "APPROVED_PENDING_DISBURSEMENT" => Some(Self::ApprovedPendingDisbursement),
            "DISBURSED" => Some(Self::Disbursed),
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "REJECTED" => Some(Self::Rejected),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Waiting for a decision on `current_step`.
    pub fn awaits_decision(&self) -> bool {
        matches!(self, Self::Submitted | Self::UnderReview(_))
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => f.write_str("DRAFT"),
            Self::Submitted => f.write_str("SUBMITTED"),
            Self::UnderReview(step) => write!(f, "UNDER_REVIEW_{}", step.as_str()),
            Self::Approved => f.write_str("APPROVED"),
            Self::ApprovedPendingDisbursement => f.write_str("APPROVED_PENDING_DISBURSEMENT"),
            Self::Disbursed => f.write_str("DISBURSED"),
            Self::Active => f.write_str("ACTIVE"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Rejected => f.write_str("REJECTED"),
            Self::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

impl From<ApplicationStatus> for String {
    fn from(value: ApplicationStatus) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for ApplicationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown application status `{value}`"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Pending,
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub sequence: u32,
    pub step: ApprovalStep,
    pub decision: Decision,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl ApprovalRecord {
    pub fn pending(sequence: u32, step: ApprovalStep) -> Self {
        Self {
            sequence,
            step,
            decision: Decision::Pending,
            decided_by: None,
            decided_at: None,
            notes: None,
        }
    }
}

/// Everything the engine needs to know about one approvable entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub kind: WorkflowKind,
    pub entity_id: String,
    pub owner_id: UserId,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub approvals: Vec<ApprovalRecord>,
}

impl WorkflowState {
    pub fn draft(kind: WorkflowKind, entity_id: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            owner_id,
            status: ApplicationStatus::Draft,
            current_step: None,
            approvals: Vec::new(),
        }
    }

    pub fn current_record(&self) -> Option<&ApprovalRecord> {
        let step = self.current_step?;
        self.approvals
            .iter()
            .find(|record| record.step == step && record.decision == Decision::Pending)
    }

    /// Holds when `current_step` is set exactly while a decision is awaited.
    pub fn is_consistent(&self) -> bool {
        self.status.awaits_decision() == self.current_step.is_some()
    }
}

/// Inputs a definition may use to shape the step list at submission.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self { user_id: UserId(user_id.into()), roles }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowCommand {
    Submit,
    Approve { notes: Option<String> },
    Reject { notes: Option<String> },
    Cancel,
    Disburse,
}

impl WorkflowCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Cancel => "cancel",
            Self::Disburse => "disburse",
        }
    }
}

/// Side effects the service layer performs after a transition is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowAction {
    NotifyApprovers(ApprovalStep),
    NotifyApplicant,
    NotifyDisbursement,
    RecordLoanDisbursement,
    PostWithdrawalDebit,
    /// Marker only: the next payroll run picks up every APPROVED deposit.
    EnrollPayrollDeduction,
    ActivateMembership,
    SettleLoan,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub command: WorkflowCommand,
    pub decided_step: Option<ApprovalStep>,
    pub state: WorkflowState,
    pub actions: Vec<WorkflowAction>,
}

#[cfg(test)]
mod tests {
    use super::{ApplicationStatus, ApprovalStep, WorkflowKind};

    #[test]
    fn under_review_status_carries_step_name() {
        let status = ApplicationStatus::UnderReview(ApprovalStep::Ketua);
        assert_eq!(status.to_string(), "UNDER_REVIEW_KETUA");
        assert_eq!(ApplicationStatus::parse("UNDER_REVIEW_KETUA"), Some(status));
        assert_eq!(
            ApplicationStatus::parse("under_review_divisi_simpan_pinjam"),
            Some(ApplicationStatus::UnderReview(ApprovalStep::DivisiSimpanPinjam))
        );
    }

    #[test]
    fn unknown_status_is_rejected_by_serde() {
        let parsed: Result<ApplicationStatus, _> = serde_json::from_str("\"UNDER_REVIEW_HR\"");
        assert!(parsed.is_err());

        let json = serde_json::to_string(&ApplicationStatus::ApprovedPendingDisbursement)
            .expect("serialize");
        assert_eq!(json, "\"APPROVED_PENDING_DISBURSEMENT\"");
    }

    #[test]
    fn only_review_states_await_decision() {
        assert!(ApplicationStatus::Submitted.awaits_decision());
        assert!(ApplicationStatus::UnderReview(ApprovalStep::Pengawas).awaits_decision());
        assert!(!ApplicationStatus::Draft.awaits_decision());
        assert!(!ApplicationStatus::Approved.awaits_decision());
    }

    #[test]
    fn kinds_parse_from_storage_names() {
        for kind in WorkflowKind::ALL {
            assert_eq!(WorkflowKind::parse(kind.as_str()), Some(kind));
        }
    }
}
