use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::validation::{Locale, ValidationErrors, Validator};
use crate::workflow::{ApplicationStatus, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositOptionKind {
    Amount,
    Tenor,
}

impl DepositOptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amount => "AMOUNT",
            Self::Tenor => "TENOR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AMOUNT" => Some(Self::Amount),
            "TENOR" => Some(Self::Tenor),
            _ => None,
        }
    }
}

/// A selectable monthly amount or tenor (months) for deposit applications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositOption {
    pub id: String,
    pub kind: DepositOptionKind,
    pub value: Decimal,
    pub label: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub id: DepositId,
    pub deposit_number: String,
    pub user_id: UserId,
    /// Deducted from every payroll run until the tenor is reached.
    pub monthly_amount: Decimal,
    pub tenor_months: u32,
    pub interest_rate: Decimal,
    pub installments_paid: u32,
    pub total_saved: Decimal,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn collects_installments(&self) -> bool {
        matches!(self.status, ApplicationStatus::Approved | ApplicationStatus::Active)
            && self.installments_paid < self.tenor_months
    }

    pub fn projection(&self) -> DepositProjection {
        DepositProjection::compute(self.monthly_amount, self.tenor_months, self.interest_rate)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositProjection {
    pub principal: Decimal,
    pub interest: Decimal,
    pub payout: Decimal,
}

impl DepositProjection {
    pub fn compute(monthly_amount: Decimal, tenor_months: u32, annual_rate_percent: Decimal) -> Self {
        let tenor = Decimal::from(tenor_months);
        let principal = monthly_amount * tenor;
        let interest = (principal * annual_rate_percent / Decimal::ONE_HUNDRED * tenor
            / Decimal::from(12))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Self { principal, interest, payout: principal + interest }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositDraft {
    pub monthly_amount: Decimal,
    pub tenor_months: u32,
}

impl DepositDraft {
    /// Amount and tenor must match one of the active options.
    pub fn validate(&self, options: &[DepositOption], locale: Locale) -> Result<(), ValidationErrors> {
        let active = |kind: DepositOptionKind| {
            options
                .iter()
                .filter(move |option| option.is_active && option.kind == kind)
                .map(|option| option.value)
                .collect::<Vec<_>>()
        };
        let amounts = active(DepositOptionKind::Amount);
        let tenors = active(DepositOptionKind::Tenor);

        let mut validator = Validator::new(locale);
        validator.positive("monthlyAmount", self.monthly_amount).one_of(
            "monthlyAmount",
            &self.monthly_amount,
            &amounts,
        );
        validator.one_of("tenorMonths", &Decimal::from(self.tenor_months), &tenors);
        validator.finish()
    }
}
