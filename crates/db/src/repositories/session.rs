use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use koperasi_core::domain::user::UserId;

use super::{column, optional_timestamp, timestamp, RepositoryError};
use crate::DbPool;

/// A refresh token as stored: only the digest of the token is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: String,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &RefreshSession) -> Result<(), RepositoryError>;
    async fn find_by_hash(&self, token_hash: &str)
        -> Result<Option<RefreshSession>, RepositoryError>;
    /// Revokes one session; false when it was already revoked or unknown.
    async fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError>;
    async fn revoke_all_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn create(&self, session: &RefreshSession) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_session (id, user_id, token_hash, expires_at, revoked_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id.0)
        .bind(&session.token_hash)
        .bind(session.expires_at.to_rfc3339())
        .bind(session.revoked_at.map(|at| at.to_rfc3339()))
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, token_hash, expires_at, revoked_at, created_at
             FROM refresh_session WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|value| session_from_row(&value)).transpose()
    }

    async fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_session SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_session SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(&user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn session_from_row(row: &SqliteRow) -> Result<RefreshSession, RepositoryError> {
    Ok(RefreshSession {
        id: column(row, "id")?,
        user_id: UserId(column(row, "user_id")?),
        token_hash: column(row, "token_hash")?,
        expires_at: timestamp(row, "expires_at")?,
        revoked_at: optional_timestamp(row, "revoked_at")?,
        created_at: timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use koperasi_core::domain::user::UserId;

    use super::{RefreshSession, SessionRepository, SqlSessionRepository};
    use crate::repositories::test_support::{insert_user, setup};

    fn session(id: &str, hash: &str) -> RefreshSession {
        let now = Utc::now();
        RefreshSession {
            id: id.to_string(),
            user_id: UserId("u-1".to_string()),
            token_hash: hash.to_string(),
            expires_at: now + Duration::days(7),
            revoked_at: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn revoked_sessions_are_not_usable() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let repo = SqlSessionRepository::new(pool);

        repo.create(&session("s-1", "hash-1")).await.expect("create");
        repo.create(&session("s-2", "hash-2")).await.expect("create");

        let found = repo.find_by_hash("hash-1").await.expect("find").expect("exists");
        assert!(found.is_usable(Utc::now()));
        assert!(!found.is_usable(Utc::now() + Duration::days(8)));

        assert!(repo.revoke("s-1", Utc::now()).await.expect("revoke"));
        assert!(!repo.revoke("s-1", Utc::now()).await.expect("revoke twice"));
        let revoked = repo.find_by_hash("hash-1").await.expect("find").expect("exists");
        assert!(!revoked.is_usable(Utc::now()));

        let count = repo
            .revoke_all_for_user(&UserId("u-1".to_string()), Utc::now())
            .await
            .expect("revoke all");
        assert_eq!(count, 1);
    }
}
