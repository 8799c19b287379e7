//! Buku tabungan: one account per member, four balances, append-only entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavingsType {
    Pokok,
    Wajib,
    Sukarela,
    Deposito,
}

impl SavingsType {
    pub const ALL: [SavingsType; 4] =
        [SavingsType::Pokok, SavingsType::Wajib, SavingsType::Sukarela, SavingsType::Deposito];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pokok => "POKOK",
            Self::Wajib => "WAJIB",
            Self::Sukarela => "SUKARELA",
            Self::Deposito => "DEPOSITO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POKOK" => Some(Self::Pokok),
            "WAJIB" => Some(Self::Wajib),
            "SUKARELA" => Some(Self::Sukarela),
            "DEPOSITO" => Some(Self::Deposito),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    Credit,
    Debit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREDIT" => Some(Self::Credit),
            "DEBIT" => Some(Self::Debit),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger amount must be positive, got {amount}")]
    NonPositiveAmount { amount: Decimal },
    #[error("insufficient {savings_type:?} balance: {balance} available, {requested} requested")]
    InsufficientBalance { savings_type: SavingsType, balance: Decimal, requested: Decimal },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsBalances {
    pub pokok: Decimal,
    pub wajib: Decimal,
    pub sukarela: Decimal,
    pub deposito: Decimal,
}

impl SavingsBalances {
    pub fn get(&self, savings_type: SavingsType) -> Decimal {
        match savings_type {
            SavingsType::Pokok => self.pokok,
            SavingsType::Wajib => self.wajib,
            SavingsType::Sukarela => self.sukarela,
            SavingsType::Deposito => self.deposito,
        }
    }

    fn slot(&mut self, savings_type: SavingsType) -> &mut Decimal {
        match savings_type {
            SavingsType::Pokok => &mut self.pokok,
            SavingsType::Wajib => &mut self.wajib,
            SavingsType::Sukarela => &mut self.sukarela,
            SavingsType::Deposito => &mut self.deposito,
        }
    }

    pub fn total(&self) -> Decimal {
        self.pokok + self.wajib + self.sukarela + self.deposito
    }

    /// Applies one entry and returns the running balance after it.
    pub fn post(
        &mut self,
        savings_type: SavingsType,
        direction: EntryDirection,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount { amount });
        }

        let balance = self.slot(savings_type);
        let next = match direction {
            EntryDirection::Credit => *balance + amount,
            EntryDirection::Debit => {
                if *balance < amount {
                    return Err(LedgerError::InsufficientBalance {
                        savings_type,
                        balance: *balance,
                        requested: amount,
                    });
                }
                *balance - amount
            }
        };
        *balance = next;
        Ok(next)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsAccount {
    pub id: String,
    pub account_number: String,
    pub user_id: UserId,
    pub balances: SavingsBalances,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsTransaction {
    pub id: String,
    pub account_id: String,
    pub savings_type: SavingsType,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry to be appended, before it has an id or running balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPosting {
    pub savings_type: SavingsType,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    pub description: String,
}

impl LedgerPosting {
    pub fn credit(savings_type: SavingsType, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            savings_type,
            direction: EntryDirection::Credit,
            amount,
            reference_kind: None,
            reference_id: None,
            description: description.into(),
        }
    }

    pub fn debit(savings_type: SavingsType, amount: Decimal, description: impl Into<String>) -> Self {
        Self { direction: EntryDirection::Debit, ..Self::credit(savings_type, amount, description) }
    }

    pub fn referencing(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.reference_kind = Some(kind.into());
        self.reference_id = Some(id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passbook {
    pub account: SavingsAccount,
    pub total_balance: Decimal,
    pub entries: crate::pagination::Paginated<SavingsTransaction>,
}
