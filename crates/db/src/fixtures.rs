use rust_decimal::Decimal;

use koperasi_core::domain::savings::SavingsType;

use crate::connection::DbPool;
use crate::repositories::{settings, RepositoryError};

/// Demo accounts and the level each one is seeded with.
const SEED_USERS: &[SeedUserContract] = &[
    SeedUserContract::member("seed-admin", "admin@koperasi.test", "SUPER_ADMIN"),
    SeedUserContract::member("seed-dsp", "dsp@koperasi.test", "DIVISI_SIMPAN_PINJAM"),
    SeedUserContract::member("seed-ketua", "ketua@koperasi.test", "KETUA"),
    SeedUserContract::member("seed-pengawas", "pengawas@koperasi.test", "PENGAWAS"),
    SeedUserContract::member("seed-bendahara", "bendahara@koperasi.test", "BENDAHARA"),
    SeedUserContract::member("seed-payroll", "payroll@koperasi.test", "PAYROLL"),
    SeedUserContract::member("seed-member", "anggota@koperasi.test", "EMPLOYEE"),
    SeedUserContract {
        id: "seed-applicant",
        email: "pendaftar@koperasi.test",
        role: "EMPLOYEE",
        is_member: false,
    },
];

/// Applications parked at known points of their workflow.
const SEED_APPLICATIONS: &[SeedApplicationContract] = &[
    SeedApplicationContract {
        kind: "LOAN",
        table: "loan",
        entity_id: "ln-seed-disbursed",
        status: "DISBURSED",
        current_step: None,
        approval_rows: 2,
        pending_rows: 0,
        approvals_check: "ln-seed-disbursed-approvals",
        description: "Phone loan paid out, two installments collected",
    },
    SeedApplicationContract {
        kind: "LOAN",
        table: "loan",
        entity_id: "ln-seed-review",
        status: "UNDER_REVIEW_KETUA",
        current_step: Some("KETUA"),
        approval_rows: 2,
        pending_rows: 1,
        approvals_check: "ln-seed-review-approvals",
        description: "Cash loan approved by DSP, awaiting KETUA",
    },
    SeedApplicationContract {
        kind: "DEPOSIT",
        table: "deposit",
        entity_id: "dp-seed-approved",
        status: "APPROVED",
        current_step: None,
        approval_rows: 2,
        pending_rows: 0,
        approvals_check: "dp-seed-approved-approvals",
        description: "Deposit waiting for its first payroll deduction",
    },
    SeedApplicationContract {
        kind: "MEMBER_APPLICATION",
        table: "member_application",
        entity_id: "ma-seed-member",
        status: "APPROVED",
        current_step: None,
        approval_rows: 2,
        pending_rows: 0,
        approvals_check: "ma-seed-member-approvals",
        description: "Membership of the demo member",
    },
    SeedApplicationContract {
        kind: "MEMBER_APPLICATION",
        table: "member_application",
        entity_id: "ma-seed-pending",
        status: "SUBMITTED",
        current_step: Some("DIVISI_SIMPAN_PINJAM"),
        approval_rows: 2,
        pending_rows: 2,
        approvals_check: "ma-seed-pending-approvals",
        description: "New applicant awaiting DSP review",
    },
];

const SEED_SAVINGS_ACCOUNT_ID: &str = "sa-seed-member";
const SEED_DEPOSIT_OPTION_COUNT: i64 = 6;
const SEED_AUDIT_EVENT_COUNT: i64 = 3;

/// Deterministic demo data for a fresh koperasi database.
///
/// Every account shares the password in [`SeedDataset::DEMO_PASSWORD`].
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/koperasi_seed.sql");

    pub const DEMO_PASSWORD: &str = "Koperasi123!";

    /// Loads the dataset. Rows that already exist are left untouched, so
    /// loading twice is harmless.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(SeedResult {
            users: SEED_USERS.iter().map(|user| (user.email, user.role)).collect(),
            applications: SEED_APPLICATIONS
                .iter()
                .map(|application| ApplicationSeedInfo {
                    kind: application.kind,
                    entity_id: application.entity_id,
                    status: application.status,
                    description: application.description,
                })
                .collect(),
        })
    }

    /// Checks the stored dataset against the contract above.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user in SEED_USERS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM app_user u JOIN user_role r ON r.user_id = u.id
                    WHERE u.id = ?1 AND u.email = ?2 AND r.role = ?3 AND u.is_member = ?4
                )",
            )
            .bind(user.id)
            .bind(user.email)
            .bind(user.role)
            .bind(i64::from(user.is_member))
            .fetch_one(pool)
            .await?;
            checks.push((user.id, present == 1));
        }

        let levels: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM level").fetch_one(pool).await?;
        checks.push(("level-catalog", levels == 7));

        let options: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM deposit_option WHERE id LIKE 'dopt-%' AND is_active = 1")
                .fetch_one(pool)
                .await?;
        checks.push(("deposit-options", options == SEED_DEPOSIT_OPTION_COUNT));

        let settings_ok = {
            let mut conn = pool.acquire().await?;
            settings::load(&mut conn).await.is_ok()
        };
        checks.push(("cooperative-settings", settings_ok));

        for application in SEED_APPLICATIONS {
            checks.push((application.entity_id, Self::verify_application(pool, application).await?));
            checks.push((
                application.approvals_check,
                Self::verify_approvals(pool, application).await?,
            ));
        }

        checks.push(("savings-ledger", Self::verify_ledger(pool).await?));

        let audits: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM audit_event WHERE id LIKE 'ae-seed-%'")
                .fetch_one(pool)
                .await?;
        checks.push(("audit-events", audits == SEED_AUDIT_EVENT_COUNT));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_application(
        pool: &DbPool,
        application: &SeedApplicationContract,
    ) -> Result<bool, RepositoryError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1 AND status = ?2 AND current_step IS ?3)",
            application.table
        );
        let present: i64 = sqlx::query_scalar(&sql)
            .bind(application.entity_id)
            .bind(application.status)
            .bind(application.current_step)
            .fetch_one(pool)
            .await?;
        Ok(present == 1)
    }

    async fn verify_approvals(
        pool: &DbPool,
        application: &SeedApplicationContract,
    ) -> Result<bool, RepositoryError> {
        let (rows, pending): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(1), COALESCE(SUM(decision = 'PENDING'), 0)
             FROM workflow_approval WHERE entity_kind = ?1 AND entity_id = ?2",
        )
        .bind(application.kind)
        .bind(application.entity_id)
        .fetch_one(pool)
        .await?;
        if rows != application.approval_rows || pending != application.pending_rows {
            return Ok(false);
        }

        let Some(step) = application.current_step else {
            return Ok(true);
        };
        let first_pending: Option<String> = sqlx::query_scalar(
            "SELECT step FROM workflow_approval
             WHERE entity_kind = ?1 AND entity_id = ?2 AND decision = 'PENDING'
             ORDER BY sequence ASC LIMIT 1",
        )
        .bind(application.kind)
        .bind(application.entity_id)
        .fetch_optional(pool)
        .await?;
        Ok(first_pending.as_deref() == Some(step))
    }

    /// Each stored balance equals the last running balance of its type.
    async fn verify_ledger(pool: &DbPool) -> Result<bool, RepositoryError> {
        let balances: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT pokok_balance, wajib_balance, sukarela_balance, deposito_balance
             FROM savings_account WHERE id = ?1",
        )
        .bind(SEED_SAVINGS_ACCOUNT_ID)
        .fetch_optional(pool)
        .await?;
        let Some((pokok, wajib, sukarela, deposito)) = balances else {
            return Ok(false);
        };

        for (savings_type, stored) in SavingsType::ALL.into_iter().zip([pokok, wajib, sukarela, deposito]) {
            let last: Option<String> = sqlx::query_scalar(
                "SELECT balance_after FROM savings_transaction
                 WHERE account_id = ?1 AND savings_type = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            )
            .bind(SEED_SAVINGS_ACCOUNT_ID)
            .bind(savings_type.as_str())
            .fetch_optional(pool)
            .await?;

            let expected = parse_amount(last.as_deref().unwrap_or("0"))?;
            if parse_amount(&stored)? != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Removes every seeded row, children first.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        const STATEMENTS: &[&str] = &[
            "DELETE FROM audit_event WHERE id LIKE 'ae-seed-%'",
            "DELETE FROM workflow_approval WHERE entity_id LIKE '%-seed-%'",
            "DELETE FROM payroll_transaction WHERE id LIKE 'pt-seed-%'",
            "DELETE FROM payroll_period WHERE id LIKE 'pp-seed-%'",
            "DELETE FROM savings_transaction WHERE account_id = 'sa-seed-member'",
            "DELETE FROM savings_account WHERE id = 'sa-seed-member'",
            "DELETE FROM member_application WHERE id LIKE 'ma-seed-%'",
            "DELETE FROM deposit WHERE id LIKE 'dp-seed-%'",
            "DELETE FROM loan WHERE id LIKE 'ln-seed-%'",
            "DELETE FROM email_config WHERE id = 'mail-seed-log'",
            "DELETE FROM deposit_option WHERE id LIKE 'dopt-%'",
            "DELETE FROM cooperative_setting WHERE updated_by = 'seed-admin'",
            "DELETE FROM user_role WHERE user_id LIKE 'seed-%'",
            "DELETE FROM refresh_session WHERE user_id LIKE 'seed-%'",
            "DELETE FROM app_user WHERE id LIKE 'seed-%'",
            "DELETE FROM employee WHERE id LIKE 'emp-seed-%'",
            "DELETE FROM golongan WHERE id LIKE 'gol-%'",
            "DELETE FROM department WHERE id LIKE 'dept-%'",
        ];

        let mut tx = pool.begin().await?;
        for statement in STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, RepositoryError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("savings balance `{raw}`: {error}")))
}

struct SeedUserContract {
    id: &'static str,
    email: &'static str,
    role: &'static str,
    is_member: bool,
}

impl SeedUserContract {
    const fn member(id: &'static str, email: &'static str, role: &'static str) -> Self {
        Self { id, email, role, is_member: true }
    }
}

struct SeedApplicationContract {
    kind: &'static str,
    table: &'static str,
    entity_id: &'static str,
    status: &'static str,
    current_step: Option<&'static str>,
    approval_rows: i64,
    pending_rows: i64,
    approvals_check: &'static str,
    description: &'static str,
}

#[derive(Debug)]
pub struct SeedResult {
    /// `(email, role)` of every demo account.
    pub users: Vec<(&'static str, &'static str)>,
    pub applications: Vec<ApplicationSeedInfo>,
}

#[derive(Debug)]
pub struct ApplicationSeedInfo {
    pub kind: &'static str,
    pub entity_id: &'static str,
    pub status: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::{SeedDataset, SEED_APPLICATIONS, SEED_USERS};
    use crate::repositories::test_support::setup;

    #[test]
    fn sql_fixture_mentions_every_contracted_row() {
        for user in SEED_USERS {
            assert!(SeedDataset::SQL.contains(user.email), "missing {}", user.email);
        }
        for application in SEED_APPLICATIONS {
            assert!(SeedDataset::SQL.contains(application.entity_id), "missing {}", application.entity_id);
        }
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifies() {
        let pool = setup().await;

        let first = SeedDataset::load(&pool).await.expect("first load");
        SeedDataset::load(&pool).await.expect("second load");
        assert_eq!(first.users.len(), SEED_USERS.len());
        assert_eq!(first.applications.len(), SEED_APPLICATIONS.len());

        let verification = SeedDataset::verify(&pool).await.expect("verify");
        let failed: Vec<_> =
            verification.checks.iter().filter(|(_, passed)| !passed).map(|(label, _)| *label).collect();
        assert!(verification.all_present, "failed checks: {failed:?}");
    }

    #[tokio::test]
    async fn clean_removes_the_dataset() {
        let pool = setup().await;
        SeedDataset::load(&pool).await.expect("load");
        SeedDataset::clean(&pool).await.expect("clean");

        let users: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM app_user")
            .fetch_one(&pool)
            .await
            .expect("count users");
        assert_eq!(users, 0);

        let verification = SeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);

        SeedDataset::load(&pool).await.expect("reload");
        assert!(SeedDataset::verify(&pool).await.expect("verify again").all_present);
    }
}
