//! `/deposits` applications and the `/deposit-options` catalog they pick from.

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::domain::deposit::{
    Deposit, DepositDraft, DepositId, DepositOption, DepositOptionKind, DepositProjection,
};
use koperasi_core::domain::user::{Role, UserId};
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::pagination::{PageRequest, SortColumn, CREATED_AT};
use koperasi_core::validation::{Locale, Validator};
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{deposit, settings, ApplicationFilter, RepositoryError};

use crate::api::locale;
use crate::api::workflow::{load_owned_draft, load_with_approvals, workflow_routes, Approvable};
use crate::auth::authenticate;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const OPTION_ADMINS: &[Role] = &[Role::SuperAdmin, Role::DivisiSimpanPinjam];

#[async_trait]
impl Approvable for Deposit {
    const KIND: WorkflowKind = WorkflowKind::Deposit;
    const SORT: &'static [SortColumn] = &[
        CREATED_AT,
        SortColumn { key: "monthlyAmount", column: "monthly_amount" },
        SortColumn { key: "depositNumber", column: "deposit_number" },
        SortColumn { key: "status", column: "status" },
    ];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError> {
        deposit::find(conn, &DepositId(id.to_string())).await
    }

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError> {
        deposit::list(conn, filter, page).await
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", put(update))
        .route("/{id}/projection", get(projection))
        .merge(workflow_routes::<Deposit>())
}

pub fn option_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_options).post(create_option))
        .route("/{id}", put(update_option).delete(delete_option))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRequest {
    pub kind: DepositOptionKind,
    pub value: Decimal,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl OptionRequest {
    fn validate(&self, locale: Locale) -> Result<(), ApiError> {
        let mut validator = Validator::new(locale);
        validator
            .positive("value", self.value)
            .max_length("label", self.label.as_deref().unwrap_or_default(), 100);
        if self.kind == DepositOptionKind::Tenor {
            validator.at_most("value", self.value, Decimal::from(120));
            if !self.value.fract().is_zero() {
                validator.custom("value", tenor_message(locale));
            }
        }
        validator.finish()?;
        Ok(())
    }
}

fn tenor_message(locale: Locale) -> &'static str {
    match locale {
        Locale::Id => "value harus berupa jumlah bulan bulat",
        Locale::En => "value must be a whole number of months",
    }
}

async fn check_draft(
    state: &AppState,
    draft: &DepositDraft,
    locale: Locale,
) -> Result<Decimal, ApiError> {
    let mut conn = state.db_pool.acquire().await?;
    let options = deposit::list_options(&mut conn, false).await?;
    draft.validate(&options, locale)?;
    Ok(settings::load(&mut conn).await?.deposit_interest_rate)
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<DepositDraft>,
) -> Result<(StatusCode, Json<Deposit>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let interest_rate = check_draft(&state, &draft, locale(&state, &headers)).await?;

    let now = Utc::now();
    let created = Deposit {
        id: DepositId(new_id()),
        deposit_number: reference_number("DP", now),
        user_id: session.user_id().clone(),
        monthly_amount: draft.monthly_amount,
        tenor_months: draft.tenor_months,
        interest_rate,
        installments_paid: 0,
        total_saved: Decimal::ZERO,
        status: ApplicationStatus::Draft,
        current_step: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.db_pool.acquire().await?;
    deposit::save(&mut conn, &created).await?;
    info!(
        event_name = "deposit.draft_created",
        entity_id = %created.id.0,
        user_id = %created.user_id.0,
        "deposit draft created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<DepositDraft>,
) -> ApiResult<Deposit> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let mut current = load_owned_draft::<Deposit>(&state, &session, &id).await?;
    let interest_rate = check_draft(&state, &draft, locale(&state, &headers)).await?;

    current.monthly_amount = draft.monthly_amount;
    current.tenor_months = draft.tenor_months;
    current.interest_rate = interest_rate;
    current.updated_at = Utc::now();

    let mut conn = state.db_pool.acquire().await?;
    deposit::save(&mut conn, &current).await?;
    Ok(Json(current))
}

/// Principal, interest and payout at maturity.
pub async fn projection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<DepositProjection> {
    let session = authenticate(&state, &headers).await?;
    let found = load_with_approvals::<Deposit>(&state, &id).await?.entity;
    session.require_owner_or_staff(&found.user_id)?;
    Ok(Json(found.projection()))
}

pub async fn list_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OptionListQuery>,
) -> ApiResult<Vec<DepositOption>> {
    let session = authenticate(&state, &headers).await?;
    if query.include_inactive {
        session.require_any(OPTION_ADMINS)?;
    }
    let mut conn = state.db_pool.acquire().await?;
    Ok(Json(deposit::list_options(&mut conn, query.include_inactive).await?))
}

pub async fn create_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OptionRequest>,
) -> Result<(StatusCode, Json<DepositOption>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(OPTION_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let option = DepositOption {
        id: new_id(),
        kind: request.kind,
        value: request.value,
        label: request.label,
        is_active: request.is_active,
        created_at: Utc::now(),
    };
    let mut conn = state.db_pool.acquire().await?;
    deposit::save_option(&mut conn, &option).await?;
    Ok((StatusCode::CREATED, Json(option)))
}

pub async fn update_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<OptionRequest>,
) -> ApiResult<DepositOption> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(OPTION_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let mut conn = state.db_pool.acquire().await?;
    let mut option = deposit::find_option(&mut conn, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("deposit option", &id))?;
    option.kind = request.kind;
    option.value = request.value;
    option.label = request.label;
    option.is_active = request.is_active;
    deposit::save_option(&mut conn, &option).await?;
    Ok(Json(option))
}

pub async fn delete_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(OPTION_ADMINS)?;
    let mut conn = state.db_pool.acquire().await?;
    if !deposit::delete_option(&mut conn, &id).await? {
        return Err(ApiError::not_found("deposit option", &id));
    }
    Ok(StatusCode::NO_CONTENT)
}
