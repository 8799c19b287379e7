use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{Locale, ValidationErrors, Validator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    /// Renders and records messages without delivering them.
    Log,
    /// POSTs rendered messages to an HTTP relay.
    Http,
}

impl MailTransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Http => "http",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Some(Self::Log),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub id: String,
    pub name: String,
    pub from_address: String,
    pub from_name: String,
    pub transport: MailTransportKind,
    pub relay_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfigDraft {
    pub name: String,
    pub from_address: String,
    pub from_name: String,
    pub transport: MailTransportKind,
    pub relay_url: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

impl EmailConfigDraft {
    pub fn validate(&self, locale: Locale) -> Result<(), ValidationErrors> {
        let mut validator = Validator::new(locale);
        validator
            .required("name", &self.name)
            .email("fromAddress", &self.from_address)
            .required("fromName", &self.from_name);
        if self.transport == MailTransportKind::Http {
            let relay_url = self.relay_url.as_deref().unwrap_or_default();
            validator.required("relayUrl", relay_url);
        }
        validator.finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub template: String,
    pub status: EmailStatus,
    pub error: Option<String>,
    pub entity_kind: Option<String>,
    pub entity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
