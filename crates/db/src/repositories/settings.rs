use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use koperasi_core::domain::settings::CooperativeSettings;
use koperasi_core::domain::user::UserId;

use super::RepositoryError;
use crate::DbPool;

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Stored rows as `(key, value)` pairs; keys missing from storage fall
    /// back to the defaults of [`CooperativeSettings`].
    async fn load_raw(&self) -> Result<Vec<(String, String)>, RepositoryError>;
    async fn save(
        &self,
        settings: &CooperativeSettings,
        updated_by: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

pub struct SqlSettingsRepository {
    pool: DbPool,
}

impl SqlSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlSettingsRepository {
    async fn load_raw(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_raw(&mut conn).await
    }

    async fn save(
        &self,
        settings: &CooperativeSettings,
        updated_by: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for entry in settings.entries() {
            sqlx::query(
                r#"
                INSERT INTO cooperative_setting (key, value, updated_by, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_by = excluded.updated_by,
                    updated_at = excluded.updated_at
                WHERE cooperative_setting.value <> excluded.value
                "#,
            )
            .bind(&entry.key)
            .bind(&entry.value)
            .bind(&updated_by.0)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

pub async fn load_raw(conn: &mut SqliteConnection) -> Result<Vec<(String, String)>, RepositoryError> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM cooperative_setting ORDER BY key")
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows)
}

/// Typed settings as seen inside a transaction. Rows that no longer parse are
/// reported as a decode error rather than silently replaced.
pub async fn load(conn: &mut SqliteConnection) -> Result<CooperativeSettings, RepositoryError> {
    let rows = load_raw(conn).await?;
    CooperativeSettings::from_entries(rows.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .map_err(|errors| RepositoryError::Decode(errors.messages().join("; ")))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::settings::CooperativeSettings;
    use koperasi_core::domain::user::UserId;

    use super::{load, SettingsRepository, SqlSettingsRepository};
    use crate::repositories::test_support::{insert_user, setup};

    #[tokio::test]
    async fn empty_storage_yields_defaults_and_saves_round_trip() {
        let pool = setup().await;
        insert_user(&pool, "u-admin", &["SUPER_ADMIN"]).await;
        let repo = SqlSettingsRepository::new(pool.clone());

        {
            let mut conn = pool.acquire().await.expect("conn");
            assert_eq!(load(&mut conn).await.expect("defaults"), CooperativeSettings::default());
        }

        let updated = CooperativeSettings::default()
            .updated([("loan.interest_rate", "9.5"), ("loan.max_tenor_months", "48")])
            .expect("valid change");
        repo.save(&updated, &UserId("u-admin".to_string()), Utc::now()).await.expect("save");

        let raw = repo.load_raw().await.expect("raw");
        assert_eq!(raw.len(), updated.entries().len());

        let mut conn = pool.acquire().await.expect("conn");
        let stored = load(&mut conn).await.expect("load");
        assert_eq!(stored.loan_interest_rate, Decimal::new(95, 1));
        assert_eq!(stored.loan_max_tenor_months, 48);
    }

    #[tokio::test]
    async fn unparsable_rows_surface_as_decode_errors() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO cooperative_setting (key, value, updated_at)
             VALUES ('loan.interest_rate', 'lots', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert");

        let mut conn = pool.acquire().await.expect("conn");
        let error = load(&mut conn).await.expect_err("bad value");
        assert!(error.to_string().contains("loan.interest_rate"));
    }
}
