use axum::http::{header, HeaderMap, HeaderValue};
use chrono::Utc;
use secrecy::SecretString;

use rust_decimal::Decimal;

use koperasi_core::config::AppConfig;
use koperasi_core::domain::loan::LoanId;
use koperasi_core::domain::repayment::{LoanRepayment, RepaymentId};
use koperasi_core::domain::user::UserId;
use koperasi_core::workflow::ApplicationStatus;
use koperasi_db::repositories::{repayment, SqlUserRepository, UserRepository};
use koperasi_db::{connect_with_settings, migrations, SeedDataset};

use crate::state::AppState;

pub const TEST_TOKEN_SECRET: &str = "koperasi-test-secret-0123456789abcdef";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.auth.token_secret = SecretString::from(TEST_TOKEN_SECRET.to_string());
    config
}

/// In-memory database with the demo dataset loaded.
pub async fn seeded_state() -> AppState {
    let config = test_config();
    let pool = connect_with_settings(&config.database.url, 1, 30).await.expect("pool");
    migrations::run_pending(&pool).await.expect("migrations");
    SeedDataset::load(&pool).await.expect("seed");
    AppState::from_config(&config, pool).expect("state")
}

/// Bearer headers for a stored user, carrying their current roles.
pub async fn headers_for(state: &AppState, user_id: &str) -> HeaderMap {
    let users = SqlUserRepository::new(state.db_pool.clone());
    let user = users
        .find_by_id(&UserId(user_id.to_string()))
        .await
        .expect("load user")
        .expect("user exists");
    let token = state.signer.issue(&user.id.0, &user.roles, Utc::now()).expect("token");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    );
    headers
}

/// Stores a DRAFT early settlement by `seed-member`, priced at `amount`.
pub async fn draft_repayment(state: &AppState, id: &str, loan_id: &str, amount: i64) {
    let now = Utc::now();
    let mut conn = state.db_pool.acquire().await.expect("conn");
    repayment::save(
        &mut conn,
        &LoanRepayment {
            id: RepaymentId(id.to_string()),
            repayment_number: format!("RP-{id}"),
            loan_id: LoanId(loan_id.to_string()),
            user_id: UserId("seed-member".to_string()),
            amount: Decimal::new(amount, 0),
            status: ApplicationStatus::Draft,
            current_step: None,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .expect("save repayment");
}
