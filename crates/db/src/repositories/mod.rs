use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use thiserror::Error;

use koperasi_core::pagination::PageRequest;
use koperasi_core::workflow::{ApplicationStatus, ApprovalStep};

pub mod audit;
pub mod deposit;
pub mod email;
pub mod loan;
pub mod membership;
pub mod organization;
pub mod payroll;
pub mod repayment;
pub mod savings;
pub mod session;
pub mod settings;
pub mod user;
pub mod withdrawal;
pub mod workflow;

pub use email::{EmailRepository, SqlEmailRepository};
pub use organization::{OrganizationRepository, SqlOrganizationRepository};
pub use session::{SessionRepository, SqlSessionRepository};
pub use settings::{SettingsRepository, SqlSettingsRepository};
pub use user::{SqlUserRepository, UserRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// True when the failure is a UNIQUE constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => error.is_unique_violation(),
            _ => false,
        }
    }

    /// True when a row is still referenced by another table.
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(error)) => error.is_foreign_key_violation(),
            _ => false,
        }
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_timestamp(name, &raw)
}

pub(crate) fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| parse_timestamp(name, &value)).transpose()
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn decimal(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(raw.trim())
        .map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn unsigned(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name}: out of range {raw}")))
}

pub(crate) fn flag(row: &SqliteRow, name: &str) -> Result<bool, RepositoryError> {
    let raw: i64 = column(row, name)?;
    Ok(raw != 0)
}

pub(crate) fn parsed<T>(
    row: &SqliteRow,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    let raw: String = column(row, name)?;
    parse(&raw).ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown value `{raw}`")))
}

pub(crate) fn status(row: &SqliteRow) -> Result<ApplicationStatus, RepositoryError> {
    parsed(row, "status", ApplicationStatus::parse)
}

pub(crate) fn current_step(row: &SqliteRow) -> Result<Option<ApprovalStep>, RepositoryError> {
    let raw: Option<String> = column(row, "current_step")?;
    raw.map(|value| {
        ApprovalStep::parse(&value).ok_or_else(|| {
            RepositoryError::Decode(format!("current_step: unknown value `{value}`"))
        })
    })
    .transpose()
}

/// WHERE clause over an approvable entity table, built from optional filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub user_id: Option<String>,
    /// Only rows currently awaiting one of these steps.
    pub awaiting_steps: Option<Vec<ApprovalStep>>,
}

impl ApplicationFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Self::default() }
    }

    pub fn awaiting(steps: Vec<ApprovalStep>) -> Self {
        Self { awaiting_steps: Some(steps), ..Self::default() }
    }

    fn clause(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(status) = self.status {
            conditions.push("status = ?".to_string());
            binds.push(status.to_string());
        }
        if let Some(user_id) = &self.user_id {
            conditions.push("user_id = ?".to_string());
            binds.push(user_id.clone());
        }
        if let Some(steps) = &self.awaiting_steps {
            if steps.is_empty() {
                conditions.push("1 = 0".to_string());
            } else {
                let placeholders = vec!["?"; steps.len()].join(", ");
                conditions.push(format!("current_step IN ({placeholders})"));
                binds.extend(steps.iter().map(|step| step.as_str().to_string()));
            }
        }

        if conditions.is_empty() {
            (String::new(), binds)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), binds)
        }
    }
}

/// Runs a filtered, paginated SELECT plus its COUNT over `table`.
pub(crate) async fn fetch_page(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &str,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<SqliteRow>, u64), RepositoryError> {
    let (where_clause, binds) = filter.clause();

    let count_sql = format!("SELECT COUNT(1) FROM {table} {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &binds {
        count_query = count_query.bind(value);
    }
    let total = count_query.fetch_one(&mut *conn).await?;

    let select_sql = format!(
        "SELECT {columns} FROM {table} {where_clause} {} LIMIT ? OFFSET ?",
        page.order_clause()
    );
    let mut select_query = sqlx::query(&select_sql);
    for value in &binds {
        select_query = select_query.bind(value);
    }
    let rows = select_query
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset()))
        .fetch_all(&mut *conn)
        .await?;

    Ok((rows, u64::try_from(total).unwrap_or_default()))
}
