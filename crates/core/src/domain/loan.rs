use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::settings::CooperativeSettings;
use crate::domain::user::UserId;
use crate::validation::{Locale, ValidationErrors, Validator};
use crate::workflow::{ApplicationStatus, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanType {
    CashLoan,
    GoodsReimburse,
    GoodsOnline,
    GoodsPhone,
}

impl LoanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CashLoan => "CASH_LOAN",
            Self::GoodsReimburse => "GOODS_REIMBURSE",
            Self::GoodsOnline => "GOODS_ONLINE",
            Self::GoodsPhone => "GOODS_PHONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CASH_LOAN" => Some(Self::CashLoan),
            "GOODS_REIMBURSE" => Some(Self::GoodsReimburse),
            "GOODS_ONLINE" => Some(Self::GoodsOnline),
            "GOODS_PHONE" => Some(Self::GoodsPhone),
            _ => None,
        }
    }
}

/// Type-specific fields. The variant decides the loan type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "loanType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanDetail {
    CashLoan {
        purpose: String,
    },
    GoodsReimburse {
        #[serde(rename = "itemName")]
        item_name: String,
        #[serde(rename = "receiptNumber")]
        receipt_number: String,
    },
    GoodsOnline {
        #[serde(rename = "itemName")]
        item_name: String,
        #[serde(rename = "itemUrl")]
        item_url: String,
    },
    GoodsPhone {
        #[serde(rename = "phoneModel")]
        phone_model: String,
        #[serde(rename = "retailPrice")]
        retail_price: Decimal,
    },
}

impl LoanDetail {
    pub fn loan_type(&self) -> LoanType {
        match self {
            Self::CashLoan { .. } => LoanType::CashLoan,
            Self::GoodsReimburse { .. } => LoanType::GoodsReimburse,
            Self::GoodsOnline { .. } => LoanType::GoodsOnline,
            Self::GoodsPhone { .. } => LoanType::GoodsPhone,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: LoanId,
    pub loan_number: String,
    pub user_id: UserId,
    pub loan_type: LoanType,
    pub amount: Decimal,
    pub tenor_months: u32,
    pub interest_rate: Decimal,
    pub total_repayable: Decimal,
    pub monthly_installment: Decimal,
    pub installments_paid: u32,
    pub paid_amount: Decimal,
    pub detail: LoanDetail,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub disbursed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn plan(&self) -> InstallmentPlan {
        InstallmentPlan::flat(self.amount, self.interest_rate, self.tenor_months)
    }

    pub fn outstanding(&self) -> Decimal {
        (self.total_repayable - self.paid_amount).max(Decimal::ZERO)
    }

    /// Amount due for the next payroll deduction, if any remain.
    pub fn next_installment(&self) -> Option<Decimal> {
        if self.status != ApplicationStatus::Disbursed {
            return None;
        }
        self.plan().installment(self.installments_paid + 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentPlan {
    pub principal: Decimal,
    pub interest_total: Decimal,
    pub total: Decimal,
    pub tenor_months: u32,
    pub monthly: Decimal,
    pub last: Decimal,
}

impl InstallmentPlan {
    /// Flat interest: `total = amount + amount * rate% * tenor / 12`.
    /// Monthly installments are whole rupiah; the last one absorbs rounding.
    pub fn flat(amount: Decimal, annual_rate_percent: Decimal, tenor_months: u32) -> Self {
        let tenor = Decimal::from(tenor_months.max(1));
        let interest_total = (amount * annual_rate_percent / Decimal::ONE_HUNDRED * tenor
            / Decimal::from(12))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let total = amount + interest_total;
        let monthly =
            (total / tenor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let last = total - monthly * (tenor - Decimal::ONE);

        Self { principal: amount, interest_total, total, tenor_months: tenor_months.max(1), monthly, last }
    }

    /// Installment `number` (1-based), `None` past the tenor.
    pub fn installment(&self, number: u32) -> Option<Decimal> {
        match number {
            0 => None,
            n if n < self.tenor_months => Some(self.monthly),
            n if n == self.tenor_months => Some(self.last),
            _ => None,
        }
    }
}

/// Applicant-provided draft fields, validated before create and update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDraft {
    pub amount: Decimal,
    pub tenor_months: u32,
    #[serde(flatten)]
    pub detail: LoanDetail,
}

impl LoanDraft {
    pub fn validate(
        &self,
        settings: &CooperativeSettings,
        golongan_ceiling: Option<Decimal>,
        locale: Locale,
    ) -> Result<(), ValidationErrors> {
        let mut validator = Validator::new(locale);
        validator.positive("amount", self.amount).between(
            "tenorMonths",
            self.tenor_months,
            settings.loan_min_tenor_months,
            settings.loan_max_tenor_months,
        );
        if let Some(ceiling) = golongan_ceiling {
            validator.at_most("amount", self.amount, ceiling);
        }

        match &self.detail {
            LoanDetail::CashLoan { purpose } => {
                validator.required("purpose", purpose).max_length("purpose", purpose, 500);
            }
            LoanDetail::GoodsReimburse { item_name, receipt_number } => {
                validator.required("itemName", item_name).required("receiptNumber", receipt_number);
            }
            LoanDetail::GoodsOnline { item_name, item_url } => {
                validator.required("itemName", item_name).required("itemUrl", item_url);
                if !item_url.trim().is_empty()
                    && !(item_url.starts_with("https://") || item_url.starts_with("http://"))
                {
                    validator.custom("itemUrl", url_message(locale));
                }
            }
            LoanDetail::GoodsPhone { phone_model, retail_price } => {
                validator
                    .required("phoneModel", phone_model)
                    .positive("retailPrice", *retail_price)
                    .at_most("amount", self.amount, settings.loan_max_phone_amount)
                    .at_most("amount", self.amount, *retail_price);
            }
        }

        validator.finish()
    }
}

fn url_message(locale: Locale) -> &'static str {
    match locale {
        Locale::Id => "itemUrl harus berupa URL yang valid",
        Locale::En => "itemUrl must be a URL address",
    }
}
