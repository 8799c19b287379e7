use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::user::{Role, User, UserId};
use koperasi_core::pagination::PageRequest;

use super::{column, fetch_page, flag, timestamp, ApplicationFilter, RepositoryError};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, password_hash, employee_id, is_verified, is_member, \
                            is_active, created_at, updated_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn list(&self, page: &PageRequest) -> Result<(Vec<User>, u64), RepositoryError>;
    /// Active users holding `role`, used to address approver notifications.
    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, RepositoryError>;
    async fn assign_roles(
        &self,
        id: &UserId,
        roles: &[Role],
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn set_verified(
        &self,
        id: &UserId,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn set_active(
        &self,
        id: &UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn update_flag(
        &self,
        column_name: &str,
        id: &UserId,
        value: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let sql = format!("UPDATE app_user SET {column_name} = ?, updated_at = ? WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(i64::from(value))
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO app_user (
                id, name, email, password_hash, employee_id, is_verified, is_member,
                is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(user.email.trim())
        .bind(&user.password_hash)
        .bind(user.employee_id.as_deref())
        .bind(i64::from(user.is_verified))
        .bind(i64::from(user.is_member))
        .bind(i64::from(user.is_active))
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        replace_roles(&mut tx, &user.id, &user.roles).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_by_id(&mut conn, id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM app_user WHERE email = ?");
        let row = sqlx::query(&sql).bind(email.trim()).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Ok(Some(hydrate(&mut conn, &row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, page: &PageRequest) -> Result<(Vec<User>, u64), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let (rows, total) =
            fetch_page(&mut conn, "app_user", USER_COLUMNS, &ApplicationFilter::default(), page)
                .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(hydrate(&mut conn, row).await?);
        }
        Ok((users, total))
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE is_active = 1 AND id IN (SELECT user_id FROM user_role WHERE role = ?)
             ORDER BY name ASC"
        );
        let rows = sqlx::query(&sql).bind(role.as_str()).fetch_all(&mut *conn).await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(hydrate(&mut conn, row).await?);
        }
        Ok(users)
    }

    async fn assign_roles(
        &self,
        id: &UserId,
        roles: &[Role],
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query("UPDATE app_user SET updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if touched == 0 {
            return Ok(false);
        }
        replace_roles(&mut tx, id, roles).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn set_verified(
        &self,
        id: &UserId,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.update_flag("is_verified", id, verified, now).await
    }

    async fn set_active(
        &self,
        id: &UserId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.update_flag("is_active", id, active, now).await
    }
}

pub async fn find_by_id(
    conn: &mut SqliteConnection,
    id: &UserId,
) -> Result<Option<User>, RepositoryError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, &row).await?)),
        None => Ok(None),
    }
}

/// Membership activation: links the employee record and flags the user as a
/// verified member.
pub async fn mark_member(
    conn: &mut SqliteConnection,
    id: &UserId,
    employee_id: &str,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE app_user SET employee_id = ?, is_member = 1, is_verified = 1, updated_at = ?
         WHERE id = ?",
    )
    .bind(employee_id)
    .bind(now.to_rfc3339())
    .bind(&id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// All active members, in a stable order, for the payroll run.
pub async fn list_members(conn: &mut SqliteConnection) -> Result<Vec<UserId>, RepositoryError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM app_user WHERE is_member = 1 AND is_active = 1 ORDER BY created_at, id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(UserId).collect())
}

async fn replace_roles(
    conn: &mut SqliteConnection,
    id: &UserId,
    roles: &[Role],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM user_role WHERE user_id = ?").bind(&id.0).execute(&mut *conn).await?;
    for role in roles {
        sqlx::query("INSERT OR IGNORE INTO user_role (user_id, role) VALUES (?, ?)")
            .bind(&id.0)
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn roles_for(conn: &mut SqliteConnection, id: &str) -> Result<Vec<Role>, RepositoryError> {
    let raw: Vec<String> = sqlx::query_scalar("SELECT role FROM user_role WHERE user_id = ?")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    let mut roles = raw
        .iter()
        .map(|value| {
            Role::parse(value)
                .ok_or_else(|| RepositoryError::Decode(format!("role: unknown value `{value}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    roles.sort();
    Ok(roles)
}

async fn hydrate(conn: &mut SqliteConnection, row: &SqliteRow) -> Result<User, RepositoryError> {
    let id: String = column(row, "id")?;
    let roles = roles_for(conn, &id).await?;
    Ok(User {
        id: UserId(id),
        name: column(row, "name")?,
        email: column(row, "email")?,
        password_hash: column(row, "password_hash")?,
        employee_id: column(row, "employee_id")?,
        roles,
        is_verified: flag(row, "is_verified")?,
        is_member: flag(row, "is_member")?,
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}
