//! Monthly payroll run: simpanan wajib, deposit installments and loan
//! installments for every member, written in one transaction. Loans with an
//! early settlement under review are skipped for the month.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use koperasi_core::domain::deposit::Deposit;
use koperasi_core::domain::loan::Loan;
use koperasi_core::domain::payroll::{
    plan_deductions, validate_period, PayrollComponent, PayrollLine, PayrollPeriod, PayrollStatus,
    PayrollSummary,
};
use koperasi_core::domain::savings::{LedgerPosting, SavingsType};
use koperasi_core::domain::user::UserId;
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::errors::{ApplicationError, DomainError};
use koperasi_core::validation::Locale;
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{
    audit, deposit, loan, payroll, repayment, savings, settings, user, workflow,
};
use koperasi_db::DbPool;

use crate::error::{persistence, posting};

const PAYROLL_REFERENCE: &str = "PAYROLL";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRun {
    pub period: PayrollPeriod,
    pub summary: PayrollSummary,
}

#[derive(Clone)]
pub struct PayrollService {
    db_pool: DbPool,
}

impl PayrollService {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    /// Opens a DRAFT period; one per calendar month.
    pub async fn create_period(
        &self,
        month: u32,
        year: i32,
        locale: Locale,
    ) -> Result<PayrollPeriod, ApplicationError> {
        validate_period(month, year, locale)?;
        let period = PayrollPeriod {
            id: new_id(),
            month,
            year,
            status: PayrollStatus::Draft,
            processed_at: None,
            processed_by: None,
            created_at: Utc::now(),
        };

        let mut conn = self.db_pool.acquire().await.map_err(storage)?;
        payroll::create_period(&mut conn, &period).await.map_err(|error| {
            if error.is_unique_violation() {
                DomainError::Conflict(format!("payroll period {} already exists", period.label()))
                    .into()
            } else {
                persistence(error)
            }
        })?;
        Ok(period)
    }

    /// Processes a DRAFT period exactly once.
    pub async fn process(
        &self,
        period_id: &str,
        processed_by: &UserId,
        correlation_id: &str,
    ) -> Result<PayrollRun, ApplicationError> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await.map_err(storage)?;

        let period = payroll::find_period(&mut *tx, period_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| DomainError::NotFound {
                entity: "payroll period",
                id: period_id.to_string(),
            })?;
        if period.status == PayrollStatus::Processed {
            return Err(already_processed(&period));
        }

        let cooperative = settings::load(&mut *tx).await.map_err(persistence)?;
        let members = user::list_members(&mut *tx).await.map_err(persistence)?;
        let deposits = deposit::list_collecting(&mut *tx).await.map_err(persistence)?;
        let settling = repayment::loans_in_review(&mut *tx).await.map_err(persistence)?;
        let loans: Vec<Loan> = loan::list_disbursed(&mut *tx)
            .await
            .map_err(persistence)?
            .into_iter()
            .filter(|loan| !settling.contains(&loan.id))
            .collect();

        let lines =
            plan_deductions(&members, &deposits, &loans, cooperative.simpanan_wajib_amount);
        let deposits: HashMap<&str, &Deposit> =
            deposits.iter().map(|deposit| (deposit.id.0.as_str(), deposit)).collect();
        let loans: HashMap<&str, &Loan> =
            loans.iter().map(|loan| (loan.id.0.as_str(), loan)).collect();

        let mut summary = PayrollSummary {
            members: u32::try_from(members.len()).unwrap_or(u32::MAX),
            ..PayrollSummary::default()
        };

        for line in &lines {
            payroll::insert_transaction(&mut *tx, &period.id, line, now)
                .await
                .map_err(persistence)?;
            ensure_account(&mut *tx, &line.user_id, now).await?;

            match line.component {
                PayrollComponent::SimpananWajib => {
                    credit(
                        &mut *tx,
                        line,
                        SavingsType::Wajib,
                        format!("Simpanan wajib {}", period.label()),
                        (PAYROLL_REFERENCE, &period.id),
                        now,
                    )
                    .await?;
                }
                PayrollComponent::DepositInstallment => {
                    let Some(deposit) = reference(line).and_then(|id| deposits.get(id)) else {
                        continue;
                    };
                    if collect_deposit(&mut *tx, deposit, line, &period, now).await? {
                        summary.deposits_completed += 1;
                    }
                }
                PayrollComponent::LoanInstallment => {
                    let Some(loan) = reference(line).and_then(|id| loans.get(id)) else {
                        continue;
                    };
                    if collect_loan(&mut *tx, loan, line, now).await? {
                        summary.loans_completed += 1;
                    }
                }
            }
            summary.record(line);
        }

        if !payroll::mark_processed(&mut *tx, &period.id, processed_by, now)
            .await
            .map_err(persistence)?
        {
            return Err(already_processed(&period));
        }

        let event = AuditEvent::new(
            Some(PAYROLL_REFERENCE.to_string()),
            Some(period.id.clone()),
            correlation_id,
            "payroll.period_processed",
            AuditCategory::Payroll,
            processed_by.0.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("period", period.label())
        .with_metadata("transactions", summary.transactions.to_string())
        .with_metadata("loan_total", summary.loan_total.to_string());
        audit::insert_events(&mut *tx, &[event]).await.map_err(persistence)?;

        let processed = payroll::find_period(&mut *tx, &period.id)
            .await
            .map_err(persistence)?
            .unwrap_or(period);
        tx.commit().await.map_err(storage)?;

        info!(
            event_name = "payroll.period.processed",
            correlation_id,
            period = %processed.label(),
            members = summary.members,
            transactions = summary.transactions,
            "payroll period processed"
        );
        Ok(PayrollRun { period: processed, summary })
    }
}

fn storage(error: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn already_processed(period: &PayrollPeriod) -> ApplicationError {
    DomainError::Conflict(format!("payroll period {} was already processed", period.label())).into()
}

fn reference(line: &PayrollLine) -> Option<&str> {
    line.reference_id.as_deref()
}

/// Members paid through payroll before their passbook existed get one now.
async fn ensure_account(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<(), ApplicationError> {
    if savings::find_by_user(conn, user_id).await.map_err(persistence)?.is_none() {
        savings::open_account(conn, user_id, &reference_number("KOP", now), now)
            .await
            .map_err(persistence)?;
    }
    Ok(())
}

async fn credit(
    conn: &mut SqliteConnection,
    line: &PayrollLine,
    savings_type: SavingsType,
    description: String,
    (reference_kind, reference_id): (&str, &str),
    now: DateTime<Utc>,
) -> Result<(), ApplicationError> {
    savings::post(
        conn,
        &line.user_id,
        LedgerPosting::credit(savings_type, line.amount, description)
            .referencing(reference_kind, reference_id),
        now,
    )
    .await
    .map_err(posting)?;
    Ok(())
}

/// Returns true when this installment completes the deposit.
async fn collect_deposit(
    conn: &mut SqliteConnection,
    collected: &Deposit,
    line: &PayrollLine,
    period: &PayrollPeriod,
    now: DateTime<Utc>,
) -> Result<bool, ApplicationError> {
    deposit::record_installment(conn, collected, now).await.map_err(persistence)?;
    credit(
        conn,
        line,
        SavingsType::Deposito,
        format!("Deposito {} {}", collected.deposit_number, period.label()),
        (WorkflowKind::Deposit.as_str(), &collected.id.0),
        now,
    )
    .await?;

    let completed = collected.installments_paid + 1 >= collected.tenor_months;
    let next = if completed {
        Some(ApplicationStatus::Completed)
    } else if collected.status == ApplicationStatus::Approved {
        Some(ApplicationStatus::Active)
    } else {
        None
    };
    if let Some(next) = next {
        workflow::set_status(conn, WorkflowKind::Deposit, &collected.id.0, next, now)
            .await
            .map_err(persistence)?;
    }
    Ok(completed)
}

/// Returns true when this installment pays the loan off.
async fn collect_loan(
    conn: &mut SqliteConnection,
    collected: &Loan,
    line: &PayrollLine,
    now: DateTime<Utc>,
) -> Result<bool, ApplicationError> {
    loan::record_installment(conn, collected, line.amount, now).await.map_err(persistence)?;
    let completed = collected.installments_paid + 1 >= collected.tenor_months;
    if completed {
        workflow::set_status(conn, WorkflowKind::Loan, &collected.id.0, ApplicationStatus::Completed, now)
            .await
            .map_err(persistence)?;
    }
    Ok(completed)
}
