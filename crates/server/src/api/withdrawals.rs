//! `/savings-withdrawals`: requests to pay out voluntary savings.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::domain::user::UserId;
use koperasi_core::domain::withdrawal::{SavingsWithdrawal, WithdrawalDraft, WithdrawalId};
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::pagination::{PageRequest, SortColumn, CREATED_AT};
use koperasi_core::validation::Locale;
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{savings, withdrawal, ApplicationFilter, RepositoryError};

use crate::api::locale;
use crate::api::workflow::{load_owned_draft, workflow_routes, Approvable};
use crate::auth::authenticate;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[async_trait]
impl Approvable for SavingsWithdrawal {
    const KIND: WorkflowKind = WorkflowKind::SavingsWithdrawal;
    const SORT: &'static [SortColumn] = &[
        CREATED_AT,
        SortColumn { key: "amount", column: "amount" },
        SortColumn { key: "withdrawalNumber", column: "withdrawal_number" },
        SortColumn { key: "status", column: "status" },
    ];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError> {
        withdrawal::find(conn, &WithdrawalId(id.to_string())).await
    }

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError> {
        withdrawal::list(conn, filter, page).await
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", put(update))
        .merge(workflow_routes::<SavingsWithdrawal>())
}

/// Checked against the balance now; disbursement checks it again.
async fn check_draft(
    state: &AppState,
    owner: &UserId,
    draft: &WithdrawalDraft,
    locale: Locale,
) -> Result<(), ApiError> {
    let mut conn = state.db_pool.acquire().await?;
    let balance = savings::find_by_user(&mut conn, owner)
        .await?
        .map(|account| account.balances.sukarela)
        .unwrap_or(Decimal::ZERO);
    draft.validate(balance, locale)?;
    Ok(())
}

fn normalized(draft: WithdrawalDraft) -> WithdrawalDraft {
    WithdrawalDraft {
        amount: draft.amount,
        bank_account_number: draft.bank_account_number.trim().to_string(),
        reason: draft.reason.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
    }
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<WithdrawalDraft>,
) -> Result<(StatusCode, Json<SavingsWithdrawal>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let draft = normalized(draft);
    check_draft(&state, session.user_id(), &draft, locale(&state, &headers)).await?;

    let now = Utc::now();
    let created = SavingsWithdrawal {
        id: WithdrawalId(new_id()),
        withdrawal_number: reference_number("WD", now),
        user_id: session.user_id().clone(),
        amount: draft.amount,
        bank_account_number: draft.bank_account_number,
        reason: draft.reason,
        status: ApplicationStatus::Draft,
        current_step: None,
        disbursed_at: None,
        disbursed_by: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.db_pool.acquire().await?;
    withdrawal::save(&mut conn, &created).await?;
    info!(
        event_name = "withdrawal.draft_created",
        entity_id = %created.id.0,
        user_id = %created.user_id.0,
        amount = %created.amount,
        "withdrawal draft created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<WithdrawalDraft>,
) -> ApiResult<SavingsWithdrawal> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let mut current = load_owned_draft::<SavingsWithdrawal>(&state, &session, &id).await?;
    let draft = normalized(draft);
    check_draft(&state, session.user_id(), &draft, locale(&state, &headers)).await?;

    current.amount = draft.amount;
    current.bank_account_number = draft.bank_account_number;
    current.reason = draft.reason;
    current.updated_at = Utc::now();

    let mut conn = state.db_pool.acquire().await?;
    withdrawal::save(&mut conn, &current).await?;
    Ok(Json(current))
}
