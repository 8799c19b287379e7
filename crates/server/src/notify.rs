//! Workflow notifications rendered with tera and delivered through the
//! configured transport. Every attempt is recorded in `email_log`; delivery
//! failures are logged and never propagate to the caller.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{info, warn};

use koperasi_core::config::MailConfig;
use koperasi_core::domain::email::{EmailLog, EmailStatus, MailTransportKind};
use koperasi_core::domain::new_id;
use koperasi_core::workflow::{ApplicationStatus, ApprovalStep, WorkflowKind};
use koperasi_db::repositories::{EmailRepository, SqlEmailRepository};
use koperasi_db::DbPool;

const DEFAULT_FROM_NAME: &str = "Koperasi";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),
    #[error("http client setup failed: {0}")]
    Client(String),
    #[error("relay url is not configured")]
    MissingRelayUrl,
    #[error("relay delivery failed: {0}")]
    Relay(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailTemplate {
    ApprovalRequested,
    ApplicationDecided,
    DisbursementRequested,
}

impl MailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::ApplicationDecided => "application_decided",
            Self::DisbursementRequested => "disbursement_requested",
        }
    }

    fn file(&self) -> String {
        format!("{}.txt.tera", self.name())
    }

    fn subject(&self, kind: WorkflowKind, reference: &str, status: ApplicationStatus) -> String {
        match self {
            Self::ApprovalRequested => {
                format!("[Koperasi] {} {reference} menunggu persetujuan", kind.label())
            }
            Self::ApplicationDecided => format!("[Koperasi] {} {reference}: {status}", kind.label()),
            Self::DisbursementRequested => {
                format!("[Koperasi] {} {reference} menunggu pencairan", kind.label())
            }
        }
    }
}

/// One message about one application, addressed to one recipient.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub template: MailTemplate,
    pub recipient_email: String,
    pub recipient_name: String,
    pub applicant_name: String,
    pub kind: WorkflowKind,
    pub entity_id: String,
    pub reference: String,
    pub status: ApplicationStatus,
    pub step: Option<ApprovalStep>,
    pub amount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug)]
struct Delivery {
    transport: MailTransportKind,
    relay_url: Option<String>,
    from_address: String,
    from_name: String,
}

#[derive(Serialize)]
struct RelayAddress<'a> {
    address: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: RelayAddress<'a>,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

pub struct Mailer {
    templates: Tera,
    client: Client,
    defaults: Delivery,
    api_key: Option<SecretString>,
    emails: SqlEmailRepository,
}

impl Mailer {
    pub fn new(db_pool: DbPool, config: &MailConfig) -> Result<Self, MailError> {
        let mut templates = Tera::default();
        templates.add_raw_templates(vec![
            (
                MailTemplate::ApprovalRequested.file(),
                include_str!("../../../templates/email/approval_requested.txt.tera"),
            ),
            (
                MailTemplate::ApplicationDecided.file(),
                include_str!("../../../templates/email/application_decided.txt.tera"),
            ),
            (
                MailTemplate::DisbursementRequested.file(),
                include_str!("../../../templates/email/disbursement_requested.txt.tera"),
            ),
        ])?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| MailError::Client(error.to_string()))?;

        Ok(Self {
            templates,
            client,
            defaults: Delivery {
                transport: config.transport,
                relay_url: config.relay_url.clone(),
                from_address: config.from_address.clone(),
                from_name: DEFAULT_FROM_NAME.to_string(),
            },
            api_key: config.api_key.clone(),
            emails: SqlEmailRepository::new(db_pool),
        })
    }

    /// Renders, delivers and records one notification.
    pub async fn send(&self, notification: &Notification) -> EmailStatus {
        let delivery = self.delivery().await;
        let subject = notification.template.subject(
            notification.kind,
            &notification.reference,
            notification.status,
        );

        let result = match self.render(notification, &delivery) {
            Ok(body) => self.deliver(&delivery, &notification.recipient_email, &subject, &body).await,
            Err(error) => Err(error),
        };

        let (status, error) = match result {
            Ok(()) => (EmailStatus::Sent, None),
            Err(error) => {
                warn!(
                    event_name = "notify.email.failed",
                    entity_id = %notification.entity_id,
                    template = notification.template.name(),
                    error = %error,
                    "email delivery failed"
                );
                (EmailStatus::Failed, Some(error.to_string()))
            }
        };

        let log = EmailLog {
            id: new_id(),
            recipient: notification.recipient_email.clone(),
            subject,
            template: notification.template.name().to_string(),
            status,
            error,
            entity_kind: Some(notification.kind.as_str().to_string()),
            entity_id: Some(notification.entity_id.clone()),
            created_at: Utc::now(),
        };
        if let Err(error) = self.emails.insert_log(&log).await {
            warn!(
                event_name = "notify.email.log_failed",
                entity_id = %notification.entity_id,
                error = %error,
                "email log could not be stored"
            );
        }
        status
    }

    /// The active stored configuration wins over the process defaults.
    async fn delivery(&self) -> Delivery {
        match self.emails.active_config().await {
            Ok(Some(config)) => Delivery {
                transport: config.transport,
                relay_url: config.relay_url,
                from_address: config.from_address,
                from_name: config.from_name,
            },
            Ok(None) => self.defaults.clone(),
            Err(error) => {
                warn!(
                    event_name = "notify.email.config_unavailable",
                    error = %error,
                    "falling back to configured mail defaults"
                );
                self.defaults.clone()
            }
        }
    }

    fn render(&self, notification: &Notification, delivery: &Delivery) -> Result<String, MailError> {
        let mut context = Context::new();
        context.insert("recipient_name", &notification.recipient_name);
        context.insert("applicant_name", &notification.applicant_name);
        context.insert("kind_label", notification.kind.label());
        context.insert("reference", &notification.reference);
        context.insert("status", &notification.status.to_string());
        context.insert("step", notification.step.map(|step| step.as_str()).unwrap_or_default());
        context.insert(
            "amount",
            &notification.amount.map(|amount| amount.to_string()).unwrap_or_default(),
        );
        context.insert("notes", notification.notes.as_deref().unwrap_or_default());
        context.insert("from_name", &delivery.from_name);
        Ok(self.templates.render(&notification.template.file(), &context)?)
    }

    async fn deliver(
        &self,
        delivery: &Delivery,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        match delivery.transport {
            MailTransportKind::Log => {
                info!(
                    event_name = "notify.email.logged",
                    recipient,
                    subject,
                    "email recorded without delivery"
                );
                Ok(())
            }
            MailTransportKind::Http => {
                let url = delivery.relay_url.as_deref().ok_or(MailError::MissingRelayUrl)?;
                let payload = RelayPayload {
                    from: RelayAddress { address: &delivery.from_address, name: &delivery.from_name },
                    to: recipient,
                    subject,
                    text: body,
                };
                let mut request = self.client.post(url).json(&payload);
                if let Some(api_key) = &self.api_key {
                    request = request.bearer_auth(api_key.expose_secret());
                }
                let response =
                    request.send().await.map_err(|error| MailError::Relay(error.to_string()))?;
                if !response.status().is_success() {
                    return Err(MailError::Relay(format!("relay returned {}", response.status())));
                }
                info!(event_name = "notify.email.sent", recipient, subject, "email relayed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::email::{EmailConfig, EmailStatus, MailTransportKind};
    use koperasi_core::pagination::PageRequest;
    use koperasi_core::workflow::{ApplicationStatus, ApprovalStep, WorkflowKind};
    use koperasi_db::repositories::{EmailRepository, SqlEmailRepository};

    use super::{MailTemplate, Notification};
    use crate::test_support::seeded_state;

    fn notification(template: MailTemplate) -> Notification {
        Notification {
            template,
            recipient_email: "ketua@koperasi.test".to_string(),
            recipient_name: "Ketua".to_string(),
            applicant_name: "Anggota".to_string(),
            kind: WorkflowKind::Loan,
            entity_id: "ln-seed-review".to_string(),
            reference: "LN-202601-SEED0002".to_string(),
            status: ApplicationStatus::UnderReview(ApprovalStep::Ketua),
            step: Some(ApprovalStep::Ketua),
            amount: Some(Decimal::new(5_000_000, 0)),
            notes: None,
        }
    }

    #[tokio::test]
    async fn log_transport_records_a_sent_entry() {
        let state = seeded_state().await;

        let status = state.mailer.send(&notification(MailTemplate::ApprovalRequested)).await;
        assert_eq!(status, EmailStatus::Sent);

        let emails = SqlEmailRepository::new(state.db_pool.clone());
        let (logs, total) = emails.list_logs(&PageRequest::default()).await.expect("logs");
        assert_eq!(total, 1);
        assert_eq!(logs[0].template, "approval_requested");
        assert!(logs[0].subject.contains("LN-202601-SEED0002"));
        assert_eq!(logs[0].entity_id.as_deref(), Some("ln-seed-review"));
    }

    #[tokio::test]
    async fn unreachable_relay_is_logged_as_failed_without_error() {
        let state = seeded_state().await;
        let emails = SqlEmailRepository::new(state.db_pool.clone());
        let now = Utc::now();
        emails
            .save_config(&EmailConfig {
                id: "mail-relay".to_string(),
                name: "Relay".to_string(),
                from_address: "noreply@koperasi.test".to_string(),
                from_name: "Koperasi".to_string(),
                transport: MailTransportKind::Http,
                relay_url: Some("http://127.0.0.1:9/send".to_string()),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("save relay config");

        let status = state.mailer.send(&notification(MailTemplate::ApplicationDecided)).await;
        assert_eq!(status, EmailStatus::Failed);

        let (logs, _) = emails.list_logs(&PageRequest::default()).await.expect("logs");
        assert_eq!(logs[0].status, EmailStatus::Failed);
        assert!(logs[0].error.is_some());
    }
}
