use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::new_id;
use koperasi_core::domain::payroll::{
    PayrollComponent, PayrollLine, PayrollPeriod, PayrollStatus, PayrollTransaction,
};
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::PageRequest;

use super::{
    column, decimal, fetch_page, optional_timestamp, parsed, timestamp, unsigned,
    ApplicationFilter, RepositoryError,
};

const PERIOD_COLUMNS: &str = "id, month, year, status, processed_at, processed_by, created_at";
const TRANSACTION_COLUMNS: &str = "id, period_id, user_id, component, reference_id, \
                                   installment_number, amount, created_at";

/// Fails with a unique violation when the month already has a period.
pub async fn create_period(
    conn: &mut SqliteConnection,
    period: &PayrollPeriod,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO payroll_period (id, month, year, status, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&period.id)
    .bind(i64::from(period.month))
    .bind(i64::from(period.year))
    .bind(period.status.as_str())
    .bind(period.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_period(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<PayrollPeriod>, RepositoryError> {
    let sql = format!("SELECT {PERIOD_COLUMNS} FROM payroll_period WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.map(|value| period_from_row(&value)).transpose()
}

pub async fn list_periods(
    conn: &mut SqliteConnection,
    page: &PageRequest,
) -> Result<(Vec<PayrollPeriod>, u64), RepositoryError> {
    let (rows, total) =
        fetch_page(conn, "payroll_period", PERIOD_COLUMNS, &ApplicationFilter::default(), page)
            .await?;
    let periods = rows.iter().map(period_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((periods, total))
}

/// Moves a DRAFT period to PROCESSED. Returns false when another run got
/// there first.
pub async fn mark_processed(
    conn: &mut SqliteConnection,
    id: &str,
    processed_by: &UserId,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE payroll_period SET status = ?, processed_at = ?, processed_by = ?
         WHERE id = ? AND status = ?",
    )
    .bind(PayrollStatus::Processed.as_str())
    .bind(now.to_rfc3339())
    .bind(&processed_by.0)
    .bind(id)
    .bind(PayrollStatus::Draft.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    period_id: &str,
    line: &PayrollLine,
    now: DateTime<Utc>,
) -> Result<PayrollTransaction, RepositoryError> {
    let transaction = PayrollTransaction {
        id: new_id(),
        period_id: period_id.to_string(),
        user_id: line.user_id.clone(),
        component: line.component,
        reference_id: line.reference_id.clone(),
        installment_number: line.installment_number,
        amount: line.amount,
        created_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO payroll_transaction (
            id, period_id, user_id, component, reference_id, installment_number, amount,
            created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&transaction.id)
    .bind(&transaction.period_id)
    .bind(&transaction.user_id.0)
    .bind(transaction.component.as_str())
    .bind(transaction.reference_id.as_deref())
    .bind(transaction.installment_number.map(i64::from))
    .bind(transaction.amount.to_string())
    .bind(transaction.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(transaction)
}

pub async fn list_transactions(
    conn: &mut SqliteConnection,
    period_id: &str,
    page: &PageRequest,
) -> Result<(Vec<PayrollTransaction>, u64), RepositoryError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM payroll_transaction WHERE period_id = ?")
            .bind(period_id)
            .fetch_one(&mut *conn)
            .await?;

    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM payroll_transaction WHERE period_id = ?
         {}, rowid ASC LIMIT ? OFFSET ?",
        page.order_clause()
    );
    let rows = sqlx::query(&sql)
        .bind(period_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset()))
        .fetch_all(&mut *conn)
        .await?;
    let transactions = rows.iter().map(transaction_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((transactions, u64::try_from(total).unwrap_or_default()))
}

fn period_from_row(row: &SqliteRow) -> Result<PayrollPeriod, RepositoryError> {
    let processed_by: Option<String> = column(row, "processed_by")?;
    let year: i64 = column(row, "year")?;
    Ok(PayrollPeriod {
        id: column(row, "id")?,
        month: unsigned(row, "month")?,
        year: i32::try_from(year)
            .map_err(|_| RepositoryError::Decode(format!("year: out of range {year}")))?,
        status: parsed(row, "status", PayrollStatus::parse)?,
        processed_at: optional_timestamp(row, "processed_at")?,
        processed_by: processed_by.map(UserId),
        created_at: timestamp(row, "created_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<PayrollTransaction, RepositoryError> {
    let installment_number: Option<i64> = column(row, "installment_number")?;
    Ok(PayrollTransaction {
        id: column(row, "id")?,
        period_id: column(row, "period_id")?,
        user_id: UserId(column(row, "user_id")?),
        component: parsed(row, "component", PayrollComponent::parse)?,
        reference_id: column(row, "reference_id")?,
        installment_number: installment_number
            .map(|value| {
                u32::try_from(value).map_err(|_| {
                    RepositoryError::Decode(format!("installment_number: out of range {value}"))
                })
            })
            .transpose()?,
        amount: decimal(row, "amount")?,
        created_at: timestamp(row, "created_at")?,
    })
}
