use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::loan::{Loan, LoanId};
use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::workflow::{ApplicationStatus, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepaymentId(pub String);

/// Early settlement of a disbursed loan for its outstanding balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRepayment {
    pub id: RepaymentId,
    pub repayment_number: String,
    pub loan_id: LoanId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRepayment {
    /// Still blocks another repayment for the same loan.
    pub fn is_open(&self) -> bool {
        !(self.status.is_closed() || self.status == ApplicationStatus::Approved)
    }
}

/// Checks that `requester` may settle `loan` and returns the amount due.
pub fn settlement_amount(loan: &Loan, requester: &UserId) -> Result<Decimal, DomainError> {
    if &loan.user_id != requester {
        return Err(DomainError::Forbidden(format!(
            "loan `{}` belongs to another member",
            loan.loan_number
        )));
    }
    if loan.status != ApplicationStatus::Disbursed {
        return Err(DomainError::InvariantViolation(format!(
            "loan `{}` is {} and cannot be settled early",
            loan.loan_number, loan.status
        )));
    }

    let outstanding = loan.outstanding();
    if outstanding <= Decimal::ZERO {
        return Err(DomainError::InvariantViolation(format!(
            "loan `{}` has no outstanding balance",
            loan.loan_number
        )));
    }
    Ok(outstanding)
}
