use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::loan::{Loan, LoanDetail, LoanId, LoanType};
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::PageRequest;
use koperasi_core::workflow::ApplicationStatus;

use super::{
    column, current_step, decimal, fetch_page, optional_timestamp, parsed, status, timestamp,
    unsigned, ApplicationFilter, RepositoryError,
};

const LOAN_COLUMNS: &str = "id, loan_number, user_id, loan_type, amount, tenor_months, \
                            interest_rate, total_repayable, monthly_installment, \
                            installments_paid, paid_amount, detail, status, current_step, \
                            disbursed_at, disbursed_by, created_at, updated_at";

/// Inserts a new loan or rewrites the editable fields of an existing one.
/// Workflow columns are owned by the workflow store and left untouched on
/// conflict.
pub async fn save(conn: &mut SqliteConnection, loan: &Loan) -> Result<(), RepositoryError> {
    let detail = serde_json::to_string(&loan.detail)
        .map_err(|error| RepositoryError::Decode(format!("detail: {error}")))?;

    sqlx::query(
        r#"
        INSERT INTO loan (
            id, loan_number, user_id, loan_type, amount, tenor_months, interest_rate,
            total_repayable, monthly_installment, installments_paid, paid_amount, detail,
            status, current_step, disbursed_at, disbursed_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            loan_type = excluded.loan_type,
            amount = excluded.amount,
            tenor_months = excluded.tenor_months,
            interest_rate = excluded.interest_rate,
            total_repayable = excluded.total_repayable,
            monthly_installment = excluded.monthly_installment,
            detail = excluded.detail,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&loan.id.0)
    .bind(&loan.loan_number)
    .bind(&loan.user_id.0)
    .bind(loan.loan_type.as_str())
    .bind(loan.amount.to_string())
    .bind(i64::from(loan.tenor_months))
    .bind(loan.interest_rate.to_string())
    .bind(loan.total_repayable.to_string())
    .bind(loan.monthly_installment.to_string())
    .bind(i64::from(loan.installments_paid))
    .bind(loan.paid_amount.to_string())
    .bind(detail)
    .bind(loan.status.to_string())
    .bind(loan.current_step.map(|step| step.as_str()))
    .bind(loan.disbursed_at.map(|at| at.to_rfc3339()))
    .bind(loan.disbursed_by.as_ref().map(|user| user.0.as_str()))
    .bind(loan.created_at.to_rfc3339())
    .bind(loan.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find(conn: &mut SqliteConnection, id: &LoanId) -> Result<Option<Loan>, RepositoryError> {
    let sql = format!("SELECT {LOAN_COLUMNS} FROM loan WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| loan_from_row(&value)).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<Loan>, u64), RepositoryError> {
    let (rows, total) = fetch_page(conn, "loan", LOAN_COLUMNS, filter, page).await?;
    let loans = rows.iter().map(loan_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((loans, total))
}

/// Loans currently being repaid through payroll.
pub async fn list_disbursed(conn: &mut SqliteConnection) -> Result<Vec<Loan>, RepositoryError> {
    let sql = format!(
        "SELECT {LOAN_COLUMNS} FROM loan WHERE status = ? ORDER BY disbursed_at ASC, id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(ApplicationStatus::Disbursed.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(loan_from_row).collect()
}

pub async fn record_disbursement(
    conn: &mut SqliteConnection,
    id: &LoanId,
    disbursed_by: &UserId,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE loan SET disbursed_at = ?, disbursed_by = ?, updated_at = ? WHERE id = ?")
        .bind(at.to_rfc3339())
        .bind(&disbursed_by.0)
        .bind(at.to_rfc3339())
        .bind(&id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Records one paid installment; the caller derives the amount from the plan.
pub async fn record_installment(
    conn: &mut SqliteConnection,
    loan: &Loan,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE loan SET installments_paid = ?, paid_amount = ?, updated_at = ? WHERE id = ?",
    )
    .bind(i64::from(loan.installments_paid + 1))
    .bind((loan.paid_amount + amount).to_string())
    .bind(now.to_rfc3339())
    .bind(&loan.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Closes every remaining installment after an approved early settlement.
pub async fn settle(
    conn: &mut SqliteConnection,
    loan: &Loan,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE loan SET installments_paid = tenor_months, paid_amount = total_repayable,
                         updated_at = ?
         WHERE id = ?",
    )
    .bind(now.to_rfc3339())
    .bind(&loan.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn loan_from_row(row: &SqliteRow) -> Result<Loan, RepositoryError> {
    let raw_detail: String = column(row, "detail")?;
    let detail: LoanDetail = serde_json::from_str(&raw_detail)
        .map_err(|error| RepositoryError::Decode(format!("detail: {error}")))?;
    let disbursed_by: Option<String> = column(row, "disbursed_by")?;

    Ok(Loan {
        id: LoanId(column(row, "id")?),
        loan_number: column(row, "loan_number")?,
        user_id: UserId(column(row, "user_id")?),
        loan_type: parsed(row, "loan_type", LoanType::parse)?,
        amount: decimal(row, "amount")?,
        tenor_months: unsigned(row, "tenor_months")?,
        interest_rate: decimal(row, "interest_rate")?,
        total_repayable: decimal(row, "total_repayable")?,
        monthly_installment: decimal(row, "monthly_installment")?,
        installments_paid: unsigned(row, "installments_paid")?,
        paid_amount: decimal(row, "paid_amount")?,
        detail,
        status: status(row)?,
        current_step: current_step(row)?,
        disbursed_at: optional_timestamp(row, "disbursed_at")?,
        disbursed_by: disbursed_by.map(UserId),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::loan::{InstallmentPlan, Loan, LoanDetail, LoanId, LoanType};
    use koperasi_core::domain::user::UserId;
    use koperasi_core::workflow::ApplicationStatus;

    pub fn cash_loan(id: &str, owner: &str, amount: i64, tenor: u32) -> Loan {
        let now = Utc::now();
        let plan = InstallmentPlan::flat(Decimal::new(amount, 0), Decimal::new(12, 0), tenor);
        Loan {
            id: LoanId(id.to_string()),
            loan_number: format!("LN-{id}"),
            user_id: UserId(owner.to_string()),
            loan_type: LoanType::CashLoan,
            amount: plan.principal,
            tenor_months: tenor,
            interest_rate: Decimal::new(12, 0),
            total_repayable: plan.total,
            monthly_installment: plan.monthly,
            installments_paid: 0,
            paid_amount: Decimal::ZERO,
            detail: LoanDetail::CashLoan { purpose: "Renovasi rumah".to_string() },
            status: ApplicationStatus::Draft,
            current_step: None,
            disbursed_at: None,
            disbursed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
