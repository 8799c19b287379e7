//! Cooperative-wide parameters, persisted as key/value rows.
//!
//! Storage keeps strings; [`CooperativeSettings`] is the typed view every
//! service works with. Unknown keys in storage are ignored so that older rows
//! never break a running server.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::validation::{FieldError, ValidationErrors};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingKey {
    SimpananPokokAmount,
    SimpananWajibAmount,
    LoanInterestRate,
    LoanMinTenorMonths,
    LoanMaxTenorMonths,
    LoanPengawasThreshold,
    LoanMaxPhoneAmount,
    DepositInterestRate,
}

impl SettingKey {
    pub const ALL: [SettingKey; 8] = [
        SettingKey::SimpananPokokAmount,
        SettingKey::SimpananWajibAmount,
        SettingKey::LoanInterestRate,
        SettingKey::LoanMinTenorMonths,
        SettingKey::LoanMaxTenorMonths,
        SettingKey::LoanPengawasThreshold,
        SettingKey::LoanMaxPhoneAmount,
        SettingKey::DepositInterestRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpananPokokAmount => "simpanan.pokok_amount",
            Self::SimpananWajibAmount => "simpanan.wajib_amount",
            Self::LoanInterestRate => "loan.interest_rate",
            Self::LoanMinTenorMonths => "loan.min_tenor_months",
            Self::LoanMaxTenorMonths => "loan.max_tenor_months",
            Self::LoanPengawasThreshold => "loan.pengawas_threshold",
            Self::LoanMaxPhoneAmount => "loan.max_phone_amount",
            Self::DepositInterestRate => "deposit.interest_rate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == value.trim())
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SimpananPokokAmount => "One-off principal savings posted when membership starts",
            Self::SimpananWajibAmount => "Mandatory savings deducted every payroll period",
            Self::LoanInterestRate => "Flat annual loan interest, percent",
            Self::LoanMinTenorMonths => "Shortest loan tenor in months",
            Self::LoanMaxTenorMonths => "Longest loan tenor in months",
            Self::LoanPengawasThreshold => "Loan amount from which PENGAWAS approval is required",
            Self::LoanMaxPhoneAmount => "Ceiling for phone purchase loans",
            Self::DepositInterestRate => "Annual deposit return, percent",
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self, Self::LoanMinTenorMonths | Self::LoanMaxTenorMonths)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooperativeSettings {
    pub simpanan_pokok_amount: Decimal,
    pub simpanan_wajib_amount: Decimal,
    pub loan_interest_rate: Decimal,
    pub loan_min_tenor_months: u32,
    pub loan_max_tenor_months: u32,
    /// `None` means loans never need PENGAWAS approval.
    pub loan_pengawas_threshold: Option<Decimal>,
    pub loan_max_phone_amount: Decimal,
    pub deposit_interest_rate: Decimal,
}

impl Default for CooperativeSettings {
    fn default() -> Self {
        Self {
            simpanan_pokok_amount: Decimal::new(100_000, 0),
            simpanan_wajib_amount: Decimal::new(50_000, 0),
            loan_interest_rate: Decimal::new(12, 0),
            loan_min_tenor_months: 1,
            loan_max_tenor_months: 36,
            loan_pengawas_threshold: Some(Decimal::new(20_000_000, 0)),
            loan_max_phone_amount: Decimal::new(10_000_000, 0),
            deposit_interest_rate: Decimal::new(6, 0),
        }
    }
}

impl CooperativeSettings {
    /// Starts from defaults and overlays stored rows.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();
        let mut errors = Vec::new();
        for (key, value) in entries {
            let Some(key) = SettingKey::parse(key) else {
                continue;
            };
            if let Err(error) = settings.set(key, value) {
                errors.push(error);
            }
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors.into())
        }
    }

    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::SimpananPokokAmount => self.simpanan_pokok_amount.to_string(),
            SettingKey::SimpananWajibAmount => self.simpanan_wajib_amount.to_string(),
            SettingKey::LoanInterestRate => self.loan_interest_rate.to_string(),
            SettingKey::LoanMinTenorMonths => self.loan_min_tenor_months.to_string(),
            SettingKey::LoanMaxTenorMonths => self.loan_max_tenor_months.to_string(),
            SettingKey::LoanPengawasThreshold => {
                self.loan_pengawas_threshold.map(|value| value.to_string()).unwrap_or_default()
            }
            SettingKey::LoanMaxPhoneAmount => self.loan_max_phone_amount.to_string(),
            SettingKey::DepositInterestRate => self.deposit_interest_rate.to_string(),
        }
    }

    pub fn set(&mut self, key: SettingKey, raw: &str) -> Result<(), FieldError> {
        let raw = raw.trim();
        if key.is_integer() {
            let value = u32::from_str(raw).map_err(|_| {
                FieldError::new(key.as_str(), format!("{} must be a whole number", key.as_str()))
            })?;
            match key {
                SettingKey::LoanMinTenorMonths => self.loan_min_tenor_months = value,
                SettingKey::LoanMaxTenorMonths => self.loan_max_tenor_months = value,
                _ => {}
            }
            return Ok(());
        }
        if key == SettingKey::LoanPengawasThreshold && raw.is_empty() {
            self.loan_pengawas_threshold = None;
            return Ok(());
        }

        let value = Decimal::from_str(raw).map_err(|_| {
            FieldError::new(key.as_str(), format!("{} must be a decimal number", key.as_str()))
        })?;
        if value.is_sign_negative() {
            return Err(FieldError::new(
                key.as_str(),
                format!("{} must not be negative", key.as_str()),
            ));
        }
        match key {
            SettingKey::SimpananPokokAmount => self.simpanan_pokok_amount = value,
            SettingKey::SimpananWajibAmount => self.simpanan_wajib_amount = value,
            SettingKey::LoanInterestRate => self.loan_interest_rate = value,
            SettingKey::LoanPengawasThreshold => self.loan_pengawas_threshold = Some(value),
            SettingKey::LoanMaxPhoneAmount => self.loan_max_phone_amount = value,
            SettingKey::DepositInterestRate => self.deposit_interest_rate = value,
            SettingKey::LoanMinTenorMonths | SettingKey::LoanMaxTenorMonths => {}
        }
        Ok(())
    }

    /// Applies an update request atomically: either every pair is valid and
    /// the result is consistent, or nothing changes.
    pub fn updated<'a, I>(&self, changes: I) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut next = self.clone();
        let mut errors = Vec::new();
        for (key, value) in changes {
            match SettingKey::parse(key) {
                Some(key) => {
                    if let Err(error) = next.set(key, value) {
                        errors.push(error);
                    }
                }
                None => errors.push(FieldError::new(key, format!("unknown setting `{key}`"))),
            }
        }
        errors.extend(next.consistency_errors());

        if errors.is_empty() {
            Ok(next)
        } else {
            Err(errors.into())
        }
    }

    fn consistency_errors(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.loan_min_tenor_months == 0 {
            errors.push(FieldError::new(
                SettingKey::LoanMinTenorMonths.as_str(),
                "loan.min_tenor_months must be at least 1",
            ));
        }
        if self.loan_min_tenor_months > self.loan_max_tenor_months {
            errors.push(FieldError::new(
                SettingKey::LoanMaxTenorMonths.as_str(),
                "loan.max_tenor_months must not be lower than loan.min_tenor_months",
            ));
        }
        errors
    }

    pub fn entries(&self) -> Vec<SettingEntry> {
        SettingKey::ALL
            .into_iter()
            .map(|key| SettingEntry {
                key: key.as_str().to_string(),
                value: self.get(key),
                description: key.description().to_string(),
            })
            .collect()
    }
}
