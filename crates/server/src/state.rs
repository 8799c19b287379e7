use std::sync::Arc;

use chrono::Duration;
use secrecy::ExposeSecret;

use koperasi_core::config::AppConfig;
use koperasi_core::credentials::TokenSigner;
use koperasi_core::validation::Locale;
use koperasi_db::DbPool;

use crate::notify::{MailError, Mailer};
use crate::services::workflow::WorkflowService;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_ttl: Duration,
    pub cookie_secure: bool,
}

/// Everything a request handler needs, shared across the router.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub signer: Arc<TokenSigner>,
    pub sessions: SessionSettings,
    pub locale: Locale,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn from_config(config: &AppConfig, db_pool: DbPool) -> Result<Self, MailError> {
        let signer = TokenSigner::new(
            config.auth.token_secret.expose_secret().as_bytes(),
            Duration::minutes(i64::from(config.auth.access_ttl_minutes.max(1))),
        );
        let mailer = Mailer::new(db_pool.clone(), &config.mail)?;

        Ok(Self {
            db_pool,
            signer: Arc::new(signer),
            sessions: SessionSettings {
                refresh_ttl: Duration::days(i64::from(config.auth.refresh_ttl_days.max(1))),
                cookie_secure: config.auth.cookie_secure,
            },
            locale: config.locale,
            mailer: Arc::new(mailer),
        })
    }

    pub fn workflow(&self) -> WorkflowService {
        WorkflowService::new(self.db_pool.clone(), self.mailer.clone())
    }
}
