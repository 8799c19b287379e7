use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::deposit::Deposit;
use crate::domain::loan::Loan;
use crate::domain::user::UserId;
use crate::validation::{Locale, ValidationErrors, Validator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayrollStatus {
    Draft,
    Processed,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Processed => "PROCESSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "PROCESSED" => Some(Self::Processed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollPeriod {
    pub id: String,
    pub month: u32,
    pub year: i32,
    pub status: PayrollStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl PayrollPeriod {
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayrollComponent {
    SimpananWajib,
    DepositInstallment,
    LoanInstallment,
}

impl PayrollComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpananWajib => "SIMPANAN_WAJIB",
            Self::DepositInstallment => "DEPOSIT_INSTALLMENT",
            Self::LoanInstallment => "LOAN_INSTALLMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SIMPANAN_WAJIB" => Some(Self::SimpananWajib),
            "DEPOSIT_INSTALLMENT" => Some(Self::DepositInstallment),
            "LOAN_INSTALLMENT" => Some(Self::LoanInstallment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollTransaction {
    pub id: String,
    pub period_id: String,
    pub user_id: UserId,
    pub component: PayrollComponent,
    pub reference_id: Option<String>,
    pub installment_number: Option<u32>,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// One deduction computed for a period, not yet persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollLine {
    pub user_id: UserId,
    pub component: PayrollComponent,
    pub reference_id: Option<String>,
    pub installment_number: Option<u32>,
    pub amount: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollSummary {
    pub members: u32,
    pub transactions: u32,
    pub simpanan_wajib_total: Decimal,
    pub deposit_total: Decimal,
    pub loan_total: Decimal,
    pub deposits_completed: u32,
    pub loans_completed: u32,
}

impl PayrollSummary {
    pub fn record(&mut self, line: &PayrollLine) {
        self.transactions += 1;
        match line.component {
            PayrollComponent::SimpananWajib => self.simpanan_wajib_total += line.amount,
            PayrollComponent::DepositInstallment => self.deposit_total += line.amount,
            PayrollComponent::LoanInstallment => self.loan_total += line.amount,
        }
    }
}

pub fn validate_period(month: u32, year: i32, locale: Locale) -> Result<(), ValidationErrors> {
    let mut validator = Validator::new(locale);
    validator.between("month", month, 1, 12);
    validator.between("year", u32::try_from(year).unwrap_or(0), 2000, 2100);
    validator.finish()
}

/// Computes every deduction for one run: simpanan wajib for each member,
/// the next installment of every collecting deposit and disbursed loan.
pub fn plan_deductions(
    members: &[UserId],
    deposits: &[Deposit],
    loans: &[Loan],
    wajib_amount: Decimal,
) -> Vec<PayrollLine> {
    let mut lines = Vec::new();

    if wajib_amount > Decimal::ZERO {
        lines.extend(members.iter().map(|user_id| PayrollLine {
            user_id: user_id.clone(),
            component: PayrollComponent::SimpananWajib,
            reference_id: None,
            installment_number: None,
            amount: wajib_amount,
        }));
    }

    lines.extend(deposits.iter().filter(|deposit| deposit.collects_installments()).map(
        |deposit| PayrollLine {
            user_id: deposit.user_id.clone(),
            component: PayrollComponent::DepositInstallment,
            reference_id: Some(deposit.id.0.clone()),
            installment_number: Some(deposit.installments_paid + 1),
            amount: deposit.monthly_amount,
        },
    ));

    lines.extend(loans.iter().filter_map(|loan| {
        let amount = loan.next_installment()?;
        Some(PayrollLine {
            user_id: loan.user_id.clone(),
            component: PayrollComponent::LoanInstallment,
            reference_id: Some(loan.id.0.clone()),
            installment_number: Some(loan.installments_paid + 1),
            amount,
        })
    }));

    lines
}
