//! Buku tabungan storage: the per-member balance row plus its append-only
//! transaction log. Balances and entries are always written together.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use thiserror::Error;

use koperasi_core::domain::new_id;
use koperasi_core::domain::savings::{
    EntryDirection, LedgerError, LedgerPosting, SavingsAccount, SavingsBalances,
    SavingsTransaction, SavingsType,
};
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::PageRequest;

use super::{column, decimal, parsed, timestamp, RepositoryError};

const ACCOUNT_COLUMNS: &str = "id, account_number, user_id, pokok_balance, wajib_balance, \
                               sukarela_balance, deposito_balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, savings_type, direction, amount, \
                                   balance_after, reference_kind, reference_id, description, \
                                   created_at";

#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("savings account `{0}` not found")]
    AccountNotFound(String),
}

fn balance_column(savings_type: SavingsType) -> &'static str {
    match savings_type {
        SavingsType::Pokok => "pokok_balance",
        SavingsType::Wajib => "wajib_balance",
        SavingsType::Sukarela => "sukarela_balance",
        SavingsType::Deposito => "deposito_balance",
    }
}

/// Opens the member's account, or returns the existing one.
pub async fn open_account(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    account_number: &str,
    now: DateTime<Utc>,
) -> Result<SavingsAccount, RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO savings_account (id, account_number, user_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(new_id())
    .bind(account_number)
    .bind(&user_id.0)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    find_by_user(conn, user_id).await?.ok_or_else(|| {
        RepositoryError::Decode(format!("savings account for `{}` vanished after insert", user_id.0))
    })
}

pub async fn find_by_user(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<SavingsAccount>, RepositoryError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM savings_account WHERE user_id = ?");
    let row = sqlx::query(&sql).bind(&user_id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| account_from_row(&value)).transpose()
}

/// Applies one posting to the member's account and appends the entry.
/// A debit larger than the balance fails without writing anything.
pub async fn post(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    posting: LedgerPosting,
    now: DateTime<Utc>,
) -> Result<SavingsTransaction, PostingError> {
    let account = find_by_user(conn, user_id)
        .await?
        .ok_or_else(|| PostingError::AccountNotFound(user_id.0.clone()))?;
    post_to_account(conn, account, posting, now).await
}

async fn post_to_account(
    conn: &mut SqliteConnection,
    account: SavingsAccount,
    posting: LedgerPosting,
    now: DateTime<Utc>,
) -> Result<SavingsTransaction, PostingError> {
    let mut balances = account.balances;
    let balance_after = balances.post(posting.savings_type, posting.direction, posting.amount)?;

    let update = format!(
        "UPDATE savings_account SET {} = ?, updated_at = ? WHERE id = ?",
        balance_column(posting.savings_type)
    );
    sqlx::query(&update)
        .bind(balance_after.to_string())
        .bind(now.to_rfc3339())
        .bind(&account.id)
        .execute(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;

    let entry = SavingsTransaction {
        id: new_id(),
        account_id: account.id,
        savings_type: posting.savings_type,
        direction: posting.direction,
        amount: posting.amount,
        balance_after,
        reference_kind: posting.reference_kind,
        reference_id: posting.reference_id,
        description: posting.description,
        created_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO savings_transaction (
            id, account_id, savings_type, direction, amount, balance_after,
            reference_kind, reference_id, description, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.account_id)
    .bind(entry.savings_type.as_str())
    .bind(entry.direction.as_str())
    .bind(entry.amount.to_string())
    .bind(entry.balance_after.to_string())
    .bind(entry.reference_kind.as_deref())
    .bind(entry.reference_id.as_deref())
    .bind(&entry.description)
    .bind(entry.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(RepositoryError::from)?;

    Ok(entry)
}

/// Passbook entries, newest first unless the page asks otherwise.
pub async fn list_transactions(
    conn: &mut SqliteConnection,
    account_id: &str,
    savings_type: Option<SavingsType>,
    page: &PageRequest,
) -> Result<(Vec<SavingsTransaction>, u64), RepositoryError> {
    let type_clause = if savings_type.is_some() { "AND savings_type = ?" } else { "" };

    let count_sql =
        format!("SELECT COUNT(1) FROM savings_transaction WHERE account_id = ? {type_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(account_id);
    if let Some(savings_type) = savings_type {
        count_query = count_query.bind(savings_type.as_str());
    }
    let total = count_query.fetch_one(&mut *conn).await?;

    // rowid breaks ties between entries posted in the same instant.
    let select_sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM savings_transaction
         WHERE account_id = ? {type_clause}
         {}, rowid {} LIMIT ? OFFSET ?",
        page.order_clause(),
        page.sort_order.as_sql()
    );
    let mut select_query = sqlx::query(&select_sql).bind(account_id);
    if let Some(savings_type) = savings_type {
        select_query = select_query.bind(savings_type.as_str());
    }
    let rows = select_query
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset()))
        .fetch_all(&mut *conn)
        .await?;

    let entries = rows.iter().map(transaction_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((entries, u64::try_from(total).unwrap_or_default()))
}

fn account_from_row(row: &SqliteRow) -> Result<SavingsAccount, RepositoryError> {
    Ok(SavingsAccount {
        id: column(row, "id")?,
        account_number: column(row, "account_number")?,
        user_id: UserId(column(row, "user_id")?),
        balances: SavingsBalances {
            pokok: decimal(row, "pokok_balance")?,
            wajib: decimal(row, "wajib_balance")?,
            sukarela: decimal(row, "sukarela_balance")?,
            deposito: decimal(row, "deposito_balance")?,
        },
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<SavingsTransaction, RepositoryError> {
    Ok(SavingsTransaction {
        id: column(row, "id")?,
        account_id: column(row, "account_id")?,
        savings_type: parsed(row, "savings_type", SavingsType::parse)?,
        direction: parsed(row, "direction", EntryDirection::parse)?,
        amount: decimal(row, "amount")?,
        balance_after: decimal(row, "balance_after")?,
        reference_kind: column(row, "reference_kind")?,
        reference_id: column(row, "reference_id")?,
        description: column(row, "description")?,
        created_at: timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::savings::{LedgerError, LedgerPosting, SavingsType};
    use koperasi_core::domain::user::UserId;
    use koperasi_core::pagination::PageRequest;

    use super::{find_by_user, list_transactions, open_account, post, PostingError};
    use crate::repositories::test_support::{insert_user, setup};

    fn rupiah(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    #[tokio::test]
    async fn open_account_is_idempotent_per_member() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");
        let user = UserId("u-1".to_string());

        let first = open_account(&mut conn, &user, "SA-0001", Utc::now()).await.expect("open");
        let second = open_account(&mut conn, &user, "SA-0002", Utc::now()).await.expect("reopen");
        assert_eq!(first.id, second.id);
        assert_eq!(second.account_number, "SA-0001");
    }

    #[tokio::test]
    async fn postings_update_balances_and_append_entries() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");
        let user = UserId("u-1".to_string());
        open_account(&mut conn, &user, "SA-0001", Utc::now()).await.expect("open");

        post(&mut conn, &user, LedgerPosting::credit(SavingsType::Pokok, rupiah(100_000), "Simpanan pokok"), Utc::now())
            .await
            .expect("pokok");
        post(&mut conn, &user, LedgerPosting::credit(SavingsType::Sukarela, rupiah(300_000), "Setoran"), Utc::now())
            .await
            .expect("sukarela");
        let debit = post(
            &mut conn,
            &user,
            LedgerPosting::debit(SavingsType::Sukarela, rupiah(120_000), "Penarikan")
                .referencing("SAVINGS_WITHDRAWAL", "wd-1"),
            Utc::now(),
        )
        .await
        .expect("debit");
        assert_eq!(debit.balance_after, rupiah(180_000));

        let account = find_by_user(&mut conn, &user).await.expect("find").expect("exists");
        assert_eq!(account.balances.pokok, rupiah(100_000));
        assert_eq!(account.balances.sukarela, rupiah(180_000));
        assert_eq!(account.balances.total(), rupiah(280_000));

        let (all, total) = list_transactions(&mut conn, &account.id, None, &PageRequest::default())
            .await
            .expect("entries");
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let (sukarela, total) = list_transactions(
            &mut conn,
            &account.id,
            Some(SavingsType::Sukarela),
            &PageRequest::default(),
        )
        .await
        .expect("sukarela entries");
        assert_eq!(total, 2);
        assert!(sukarela.iter().all(|entry| entry.savings_type == SavingsType::Sukarela));
    }

    #[tokio::test]
    async fn overdraft_is_refused_and_leaves_no_entry() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");
        let user = UserId("u-1".to_string());
        let account = open_account(&mut conn, &user, "SA-0001", Utc::now()).await.expect("open");

        let error = post(&mut conn, &user, LedgerPosting::debit(SavingsType::Sukarela, rupiah(1), "Penarikan"), Utc::now())
            .await
            .expect_err("overdraft");
        assert!(matches!(error, PostingError::Ledger(LedgerError::InsufficientBalance { .. })));

        let (entries, total) = list_transactions(&mut conn, &account.id, None, &PageRequest::default())
            .await
            .expect("entries");
        assert_eq!(total, 0);
        assert!(entries.is_empty());

        let missing = post(
            &mut conn,
            &UserId("ghost".to_string()),
            LedgerPosting::credit(SavingsType::Wajib, rupiah(1), "x"),
            Utc::now(),
        )
        .await
        .expect_err("no account");
        assert!(matches!(missing, PostingError::AccountNotFound(_)));
    }
}
