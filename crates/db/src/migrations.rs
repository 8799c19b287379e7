use sqlx::migrate::{MigrateError, Migrator};
use tracing::info;

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!(
        event_name = "db.migrations.applied",
        known_migrations = known_versions(),
        "schema is up to date"
    );
    Ok(())
}

/// Number of schema versions shipped with this build. Reversible migrations
/// contribute one up and one down script per version.
pub fn known_versions() -> usize {
    MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration()).count()
}

/// Versions recorded in `_sqlx_migrations`, oldest first. Empty on a fresh
/// database.
pub async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if table_exists == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, known_versions, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "department",
        "golongan",
        "level",
        "employee",
        "app_user",
        "user_role",
        "refresh_session",
        "loan",
        "deposit_option",
        "deposit",
        "savings_withdrawal",
        "loan_repayment",
        "member_application",
        "workflow_approval",
        "savings_account",
        "savings_transaction",
        "payroll_period",
        "payroll_transaction",
        "cooperative_setting",
        "email_config",
        "email_log",
        "audit_event",
    ];

    const MANAGED_INDEXES: &[&str] = &[
        "idx_employee_department_id",
        "idx_refresh_session_user_id",
        "idx_loan_user_id",
        "idx_loan_status",
        "idx_deposit_user_id",
        "idx_deposit_status",
        "idx_savings_withdrawal_user_id",
        "idx_loan_repayment_loan_id",
        "idx_member_application_user_id",
        "idx_savings_transaction_account_id",
        "idx_payroll_transaction_period_id",
        "idx_email_log_created_at",
        "idx_audit_event_entity",
        "idx_audit_event_correlation_id",
    ];

    fn is_managed(name: &str) -> bool {
        MANAGED_TABLES.contains(&name) || MANAGED_INDEXES.contains(&name)
    }

    #[tokio::test]
    async fn migrations_create_every_table_and_seed_levels() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table");
            assert_eq!(count, 1, "missing table {table}");
        }

        let levels: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM level")
            .fetch_one(&pool)
            .await
            .expect("count levels");
        assert_eq!(levels, 7);

        let versions = applied_versions(&pool).await.expect("versions");
        assert_eq!(versions.len(), known_versions());
        assert_eq!(known_versions(), 1);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.expect("fresh versions").is_empty());
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let loan_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'loan'",
        )
        .fetch_one(&pool)
        .await
        .expect("check loan table removed")
        .get::<i64, _>("count");

        assert_eq!(loan_count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_TABLES.len() + MANAGED_INDEXES.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if is_managed(&name) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
