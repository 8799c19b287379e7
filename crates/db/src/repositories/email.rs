use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use koperasi_core::domain::email::{EmailConfig, EmailLog, EmailStatus, MailTransportKind};
use koperasi_core::pagination::PageRequest;

use super::{column, fetch_page, flag, parsed, timestamp, ApplicationFilter, RepositoryError};
use crate::DbPool;

const CONFIG_COLUMNS: &str =
    "id, name, from_address, from_name, transport, relay_url, is_active, created_at, updated_at";
const LOG_COLUMNS: &str =
    "id, recipient, subject, template, status, error, entity_kind, entity_id, created_at";

#[async_trait]
pub trait EmailRepository: Send + Sync {
    async fn list_configs(&self) -> Result<Vec<EmailConfig>, RepositoryError>;
    async fn find_config(&self, id: &str) -> Result<Option<EmailConfig>, RepositoryError>;
    async fn active_config(&self) -> Result<Option<EmailConfig>, RepositoryError>;
    /// Saving an active configuration deactivates every other one.
    async fn save_config(&self, config: &EmailConfig) -> Result<(), RepositoryError>;
    async fn delete_config(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn insert_log(&self, log: &EmailLog) -> Result<(), RepositoryError>;
    async fn list_logs(&self, page: &PageRequest) -> Result<(Vec<EmailLog>, u64), RepositoryError>;
}

pub struct SqlEmailRepository {
    pool: DbPool,
}

impl SqlEmailRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailRepository for SqlEmailRepository {
    async fn list_configs(&self) -> Result<Vec<EmailConfig>, RepositoryError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM email_config ORDER BY created_at ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(config_from_row).collect()
    }

    async fn find_config(&self, id: &str) -> Result<Option<EmailConfig>, RepositoryError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM email_config WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|value| config_from_row(&value)).transpose()
    }

    async fn active_config(&self) -> Result<Option<EmailConfig>, RepositoryError> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM email_config WHERE is_active = 1
             ORDER BY updated_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|value| config_from_row(&value)).transpose()
    }

    async fn save_config(&self, config: &EmailConfig) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if config.is_active {
            sqlx::query("UPDATE email_config SET is_active = 0, updated_at = ? WHERE id <> ? AND is_active = 1")
                .bind(config.updated_at.to_rfc3339())
                .bind(&config.id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO email_config (
                id, name, from_address, from_name, transport, relay_url, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                from_address = excluded.from_address,
                from_name = excluded.from_name,
                transport = excluded.transport,
                relay_url = excluded.relay_url,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config.id)
        .bind(config.name.trim())
        .bind(config.from_address.trim())
        .bind(config.from_name.trim())
        .bind(config.transport.as_str())
        .bind(config.relay_url.as_deref())
        .bind(i64::from(config.is_active))
        .bind(config.created_at.to_rfc3339())
        .bind(config.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_config(&self, id: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM email_config WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_log(&self, log: &EmailLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO email_log (
                id, recipient, subject, template, status, error, entity_kind, entity_id,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.recipient)
        .bind(&log.subject)
        .bind(&log.template)
        .bind(log.status.as_str())
        .bind(log.error.as_deref())
        .bind(log.entity_kind.as_deref())
        .bind(log.entity_id.as_deref())
        .bind(log.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(&self, page: &PageRequest) -> Result<(Vec<EmailLog>, u64), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let (rows, total) =
            fetch_page(&mut conn, "email_log", LOG_COLUMNS, &ApplicationFilter::default(), page)
                .await?;
        let logs = rows.iter().map(log_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((logs, total))
    }
}

fn config_from_row(row: &SqliteRow) -> Result<EmailConfig, RepositoryError> {
    Ok(EmailConfig {
        id: column(row, "id")?,
        name: column(row, "name")?,
        from_address: column(row, "from_address")?,
        from_name: column(row, "from_name")?,
        transport: parsed(row, "transport", MailTransportKind::parse)?,
        relay_url: column(row, "relay_url")?,
        is_active: flag(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<EmailLog, RepositoryError> {
    Ok(EmailLog {
        id: column(row, "id")?,
        recipient: column(row, "recipient")?,
        subject: column(row, "subject")?,
        template: column(row, "template")?,
        status: parsed(row, "status", EmailStatus::parse)?,
        error: column(row, "error")?,
        entity_kind: column(row, "entity_kind")?,
        entity_id: column(row, "entity_id")?,
        created_at: timestamp(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use koperasi_core::domain::email::{EmailConfig, EmailLog, EmailStatus, MailTransportKind};
    use koperasi_core::pagination::PageRequest;

    use super::{EmailRepository, SqlEmailRepository};
    use crate::repositories::test_support::setup;

    fn config(id: &str, active: bool) -> EmailConfig {
        let now = Utc::now();
        EmailConfig {
            id: id.to_string(),
            name: format!("Config {id}"),
            from_address: "noreply@koperasi.test".to_string(),
            from_name: "Koperasi".to_string(),
            transport: MailTransportKind::Log,
            relay_url: None,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn activating_a_config_deactivates_the_others() {
        let repo = SqlEmailRepository::new(setup().await);
        repo.save_config(&config("c-1", true)).await.expect("first");
        repo.save_config(&config("c-2", true)).await.expect("second");

        let active = repo.active_config().await.expect("active").expect("one active");
        assert_eq!(active.id, "c-2");
        let configs = repo.list_configs().await.expect("list");
        assert_eq!(configs.iter().filter(|config| config.is_active).count(), 1);

        assert!(repo.delete_config("c-1").await.expect("delete"));
        assert!(repo.find_config("c-1").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn logs_are_paginated() {
        let repo = SqlEmailRepository::new(setup().await);
        for index in 0..3 {
            repo.insert_log(&EmailLog {
                id: format!("log-{index}"),
                recipient: "member@koperasi.test".to_string(),
                subject: "Pengajuan disetujui".to_string(),
                template: "applicant_decision".to_string(),
                status: if index == 0 { EmailStatus::Failed } else { EmailStatus::Sent },
                error: (index == 0).then(|| "relay unavailable".to_string()),
                entity_kind: Some("LOAN".to_string()),
                entity_id: Some("ln-1".to_string()),
                created_at: Utc::now(),
            })
            .await
            .expect("insert log");
        }

        let page = PageRequest { limit: 2, ..PageRequest::default() };
        let (logs, total) = repo.list_logs(&page).await.expect("list");
        assert_eq!(total, 3);
        assert_eq!(logs.len(), 2);
    }
}
