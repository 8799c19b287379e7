use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::user::UserId;
use koperasi_core::domain::withdrawal::{SavingsWithdrawal, WithdrawalId};
use koperasi_core::pagination::PageRequest;

use super::{
    column, current_step, decimal, fetch_page, optional_timestamp, status, timestamp,
    ApplicationFilter, RepositoryError,
};

const WITHDRAWAL_COLUMNS: &str = "id, withdrawal_number, user_id, amount, bank_account_number, \
                                  reason, status, current_step, disbursed_at, disbursed_by, \
                                  created_at, updated_at";

pub async fn save(
    conn: &mut SqliteConnection,
    withdrawal: &SavingsWithdrawal,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO savings_withdrawal (
            id, withdrawal_number, user_id, amount, bank_account_number, reason, status,
            current_step, disbursed_at, disbursed_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            amount = excluded.amount,
            bank_account_number = excluded.bank_account_number,
            reason = excluded.reason,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&withdrawal.id.0)
    .bind(&withdrawal.withdrawal_number)
    .bind(&withdrawal.user_id.0)
    .bind(withdrawal.amount.to_string())
    .bind(withdrawal.bank_account_number.trim())
    .bind(withdrawal.reason.as_deref())
    .bind(withdrawal.status.to_string())
    .bind(withdrawal.current_step.map(|step| step.as_str()))
    .bind(withdrawal.disbursed_at.map(|at| at.to_rfc3339()))
    .bind(withdrawal.disbursed_by.as_ref().map(|user| user.0.as_str()))
    .bind(withdrawal.created_at.to_rfc3339())
    .bind(withdrawal.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: &WithdrawalId,
) -> Result<Option<SavingsWithdrawal>, RepositoryError> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM savings_withdrawal WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| withdrawal_from_row(&value)).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<SavingsWithdrawal>, u64), RepositoryError> {
    let (rows, total) =
        fetch_page(conn, "savings_withdrawal", WITHDRAWAL_COLUMNS, filter, page).await?;
    let withdrawals = rows.iter().map(withdrawal_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((withdrawals, total))
}

pub async fn record_disbursement(
    conn: &mut SqliteConnection,
    id: &WithdrawalId,
    disbursed_by: &UserId,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE savings_withdrawal SET disbursed_at = ?, disbursed_by = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(at.to_rfc3339())
    .bind(&disbursed_by.0)
    .bind(at.to_rfc3339())
    .bind(&id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn withdrawal_from_row(row: &SqliteRow) -> Result<SavingsWithdrawal, RepositoryError> {
    let disbursed_by: Option<String> = column(row, "disbursed_by")?;
    Ok(SavingsWithdrawal {
        id: WithdrawalId(column(row, "id")?),
        withdrawal_number: column(row, "withdrawal_number")?,
        user_id: UserId(column(row, "user_id")?),
        amount: decimal(row, "amount")?,
        bank_account_number: column(row, "bank_account_number")?,
        reason: column(row, "reason")?,
        status: status(row)?,
        current_step: current_step(row)?,
        disbursed_at: optional_timestamp(row, "disbursed_at")?,
        disbursed_by: disbursed_by.map(UserId),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}
