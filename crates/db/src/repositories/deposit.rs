use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::deposit::{Deposit, DepositId, DepositOption, DepositOptionKind};
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::PageRequest;
use koperasi_core::workflow::ApplicationStatus;

use super::{
    column, current_step, decimal, fetch_page, flag, parsed, status, timestamp, unsigned,
    ApplicationFilter, RepositoryError,
};

const DEPOSIT_COLUMNS: &str = "id, deposit_number, user_id, monthly_amount, tenor_months, \
                               interest_rate, installments_paid, total_saved, status, \
                               current_step, created_at, updated_at";

pub async fn save(conn: &mut SqliteConnection, deposit: &Deposit) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO deposit (
            id, deposit_number, user_id, monthly_amount, tenor_months, interest_rate,
            installments_paid, total_saved, status, current_step, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            monthly_amount = excluded.monthly_amount,
            tenor_months = excluded.tenor_months,
            interest_rate = excluded.interest_rate,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&deposit.id.0)
    .bind(&deposit.deposit_number)
    .bind(&deposit.user_id.0)
    .bind(deposit.monthly_amount.to_string())
    .bind(i64::from(deposit.tenor_months))
    .bind(deposit.interest_rate.to_string())
    .bind(i64::from(deposit.installments_paid))
    .bind(deposit.total_saved.to_string())
    .bind(deposit.status.to_string())
    .bind(deposit.current_step.map(|step| step.as_str()))
    .bind(deposit.created_at.to_rfc3339())
    .bind(deposit.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: &DepositId,
) -> Result<Option<Deposit>, RepositoryError> {
    let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM deposit WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| deposit_from_row(&value)).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<Deposit>, u64), RepositoryError> {
    let (rows, total) = fetch_page(conn, "deposit", DEPOSIT_COLUMNS, filter, page).await?;
    let deposits = rows.iter().map(deposit_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((deposits, total))
}

/// Approved or active deposits that payroll still collects from.
pub async fn list_collecting(conn: &mut SqliteConnection) -> Result<Vec<Deposit>, RepositoryError> {
    let sql = format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposit
         WHERE status IN (?, ?) AND installments_paid < tenor_months
         ORDER BY created_at ASC, id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(ApplicationStatus::Approved.to_string())
        .bind(ApplicationStatus::Active.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(deposit_from_row).collect()
}

pub async fn record_installment(
    conn: &mut SqliteConnection,
    deposit: &Deposit,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE deposit SET installments_paid = ?, total_saved = ?, updated_at = ? WHERE id = ?",
    )
    .bind(i64::from(deposit.installments_paid + 1))
    .bind((deposit.total_saved + deposit.monthly_amount).to_string())
    .bind(now.to_rfc3339())
    .bind(&deposit.id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_options(
    conn: &mut SqliteConnection,
    include_inactive: bool,
) -> Result<Vec<DepositOption>, RepositoryError> {
    let sql = if include_inactive {
        "SELECT id, kind, value, label, is_active, created_at FROM deposit_option"
    } else {
        "SELECT id, kind, value, label, is_active, created_at FROM deposit_option WHERE is_active = 1"
    };
    let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;
    let mut options = rows.iter().map(option_from_row).collect::<Result<Vec<_>, _>>()?;
    options.sort_by(|left, right| {
        left.kind.as_str().cmp(right.kind.as_str()).then(left.value.cmp(&right.value))
    });
    Ok(options)
}

pub async fn find_option(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<DepositOption>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, kind, value, label, is_active, created_at FROM deposit_option WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|value| option_from_row(&value)).transpose()
}

pub async fn save_option(
    conn: &mut SqliteConnection,
    option: &DepositOption,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO deposit_option (id, kind, value, label, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            value = excluded.value,
            label = excluded.label,
            is_active = excluded.is_active
        "#,
    )
    .bind(&option.id)
    .bind(option.kind.as_str())
    .bind(option.value.normalize().to_string())
    .bind(option.label.as_deref())
    .bind(i64::from(option.is_active))
    .bind(option.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_option(conn: &mut SqliteConnection, id: &str) -> Result<bool, RepositoryError> {
    let result =
        sqlx::query("DELETE FROM deposit_option WHERE id = ?").bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected() > 0)
}

fn deposit_from_row(row: &SqliteRow) -> Result<Deposit, RepositoryError> {
    Ok(Deposit {
        id: DepositId(column(row, "id")?),
        deposit_number: column(row, "deposit_number")?,
        user_id: UserId(column(row, "user_id")?),
        monthly_amount: decimal(row, "monthly_amount")?,
        tenor_months: unsigned(row, "tenor_months")?,
        interest_rate: decimal(row, "interest_rate")?,
        installments_paid: unsigned(row, "installments_paid")?,
        total_saved: decimal(row, "total_saved")?,
        status: status(row)?,
        current_step: current_step(row)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn option_from_row(row: &SqliteRow) -> Result<DepositOption, RepositoryError> {
    Ok(DepositOption {
        id: column(row, "id")?,
        kind: parsed(row, "kind", DepositOptionKind::parse)?,
        value: decimal(row, "value")?,
        label: column(row, "label")?,
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::deposit::{Deposit, DepositId, DepositOption, DepositOptionKind};
    use koperasi_core::domain::user::UserId;
    use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};

    use super::{
        delete_option, find, list_collecting, list_options, record_installment, save, save_option,
    };
    use crate::repositories::test_support::{insert_user, setup};
    use crate::repositories::workflow;

    fn deposit(id: &str) -> Deposit {
        let now = Utc::now();
        Deposit {
            id: DepositId(id.to_string()),
            deposit_number: format!("DP-{id}"),
            user_id: UserId("u-1".to_string()),
            monthly_amount: Decimal::new(500_000, 0),
            tenor_months: 2,
            interest_rate: Decimal::new(6, 0),
            installments_paid: 0,
            total_saved: Decimal::ZERO,
            status: ApplicationStatus::Draft,
            current_step: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn collecting_deposits_stop_after_tenor() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");

        save(&mut conn, &deposit("dp-1")).await.expect("insert");
        save(&mut conn, &deposit("dp-draft")).await.expect("insert draft");
        workflow::set_status(&mut conn, WorkflowKind::Deposit, "dp-1", ApplicationStatus::Approved, Utc::now())
            .await
            .expect("approve");

        for _ in 0..2 {
            let collecting = list_collecting(&mut conn).await.expect("collecting");
            assert_eq!(collecting.len(), 1);
            record_installment(&mut conn, &collecting[0], Utc::now()).await.expect("installment");
        }
        assert!(list_collecting(&mut conn).await.expect("collecting").is_empty());

        let stored = find(&mut conn, &DepositId("dp-1".to_string())).await.expect("find").expect("exists");
        assert_eq!(stored.installments_paid, 2);
        assert_eq!(stored.total_saved, Decimal::new(1_000_000, 0));
    }

    #[tokio::test]
    async fn options_are_unique_per_kind_and_value() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.expect("conn");
        let option = |id: &str, kind, value: i64, active| DepositOption {
            id: id.to_string(),
            kind,
            value: Decimal::new(value, 0),
            label: None,
            is_active: active,
            created_at: Utc::now(),
        };

        save_option(&mut conn, &option("o-1", DepositOptionKind::Amount, 500_000, true))
            .await
            .expect("amount");
        save_option(&mut conn, &option("o-2", DepositOptionKind::Tenor, 12, true)).await.expect("tenor");
        save_option(&mut conn, &option("o-3", DepositOptionKind::Tenor, 24, false))
            .await
            .expect("inactive tenor");
        let duplicate = save_option(&mut conn, &option("o-4", DepositOptionKind::Tenor, 12, true))
            .await
            .expect_err("duplicate value");
        assert!(duplicate.is_unique_violation());

        assert_eq!(list_options(&mut conn, false).await.expect("active").len(), 2);
        assert_eq!(list_options(&mut conn, true).await.expect("all").len(), 3);
        assert!(delete_option(&mut conn, "o-3").await.expect("delete"));
        assert!(!delete_option(&mut conn, "o-3").await.expect("delete twice"));
    }
}
