pub mod deposit;
pub mod email;
pub mod loan;
pub mod membership;
pub mod payroll;
pub mod repayment;
pub mod savings;
pub mod settings;
pub mod user;
pub mod withdrawal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::ApprovalRecord;

/// Human-facing document number, e.g. `LN-202601-3F9A1C2B`.
pub fn reference_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", now.format("%Y%m"), suffix[..8].to_ascii_uppercase())
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// An approvable entity together with its approval trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WithApprovals<T> {
    #[serde(flatten)]
    pub entity: T,
    pub approvals: Vec<ApprovalRecord>,
}
