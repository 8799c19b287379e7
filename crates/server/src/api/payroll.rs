//! `/payroll`: monthly deduction periods.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use koperasi_core::domain::payroll::{PayrollPeriod, PayrollTransaction};
use koperasi_core::domain::user::Role;
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn, CREATED_AT};
use koperasi_db::repositories::payroll;

use crate::api::{correlation_id, locale};
use crate::auth::authenticate;
use crate::error::{ApiError, ApiResult};
use crate::services::payroll::{PayrollRun, PayrollService};
use crate::state::AppState;

const PAYROLL_OFFICERS: &[Role] = &[Role::Payroll, Role::SuperAdmin];
const PAYROLL_READERS: &[Role] = &[Role::Payroll, Role::Bendahara, Role::SuperAdmin];

const PERIOD_SORT: &[SortColumn] = &[
    CREATED_AT,
    SortColumn { key: "year", column: "year" },
    SortColumn { key: "month", column: "month" },
];
const TRANSACTION_SORT: &[SortColumn] = &[CREATED_AT, SortColumn { key: "amount", column: "amount" }];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_periods).post(create_period))
        .route("/{id}", get(get_period))
        .route("/{id}/process", post(process_period))
        .route("/{id}/transactions", get(list_transactions))
}

#[derive(Clone, Debug, Deserialize)]
pub struct PeriodRequest {
    pub month: u32,
    pub year: i32,
}

pub async fn create_period(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PeriodRequest>,
) -> Result<(StatusCode, Json<PayrollPeriod>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(PAYROLL_OFFICERS)?;
    let period = PayrollService::new(state.db_pool.clone())
        .create_period(request.month, request.year, locale(&state, &headers))
        .await?;
    Ok((StatusCode::CREATED, Json(period)))
}

pub async fn list_periods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<PayrollPeriod>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(PAYROLL_READERS)?;
    let request = PageRequest::resolve(&page, PERIOD_SORT);
    let mut conn = state.db_pool.acquire().await?;
    let (periods, total) = payroll::list_periods(&mut conn, &request).await?;
    Ok(Json(Paginated::new(periods, total, &request)))
}

pub async fn get_period(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<PayrollPeriod> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(PAYROLL_READERS)?;
    let mut conn = state.db_pool.acquire().await?;
    let period = payroll::find_period(&mut conn, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("payroll period", id))?;
    Ok(Json(period))
}

pub async fn process_period(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<PayrollRun> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(PAYROLL_OFFICERS)?;
    let run = PayrollService::new(state.db_pool.clone())
        .process(&id, session.user_id(), &correlation_id(&headers))
        .await?;
    Ok(Json(run))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<PayrollTransaction>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(PAYROLL_READERS)?;
    let request = PageRequest::resolve(&page, TRANSACTION_SORT);
    let mut conn = state.db_pool.acquire().await?;
    if payroll::find_period(&mut conn, &id).await?.is_none() {
        return Err(ApiError::not_found("payroll period", id));
    }
    let (transactions, total) = payroll::list_transactions(&mut conn, &id, &request).await?;
    Ok(Json(Paginated::new(transactions, total, &request)))
}
