use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::validation::{Locale, ValidationErrors, Validator};
use crate::workflow::{ApplicationStatus, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WithdrawalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsWithdrawal {
    pub id: WithdrawalId,
    pub withdrawal_number: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub bank_account_number: String,
    pub reason: Option<String>,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub disbursed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDraft {
    pub amount: Decimal,
    pub bank_account_number: String,
    pub reason: Option<String>,
}

impl WithdrawalDraft {
    /// Only voluntary savings can be withdrawn.
    pub fn validate(&self, sukarela_balance: Decimal, locale: Locale) -> Result<(), ValidationErrors> {
        Validator::new(locale)
            .positive("amount", self.amount)
            .at_most("amount", self.amount, sukarela_balance)
            .required("bankAccountNumber", &self.bank_account_number)
            .digits("bankAccountNumber", &self.bank_account_number)
            .max_length("reason", self.reason.as_deref().unwrap_or_default(), 500)
            .finish()
    }
}
