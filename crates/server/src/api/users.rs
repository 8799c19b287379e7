//! `/users`: account administration for SUPER_ADMIN.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use koperasi_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use koperasi_core::domain::user::{Role, User, UserId};
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn, CREATED_AT};
use koperasi_db::repositories::{
    audit, SessionRepository, SqlSessionRepository, SqlUserRepository, UserRepository,
};

use crate::api::correlation_id;
use crate::auth::{authenticate, Session};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const USER_ADMINS: &[Role] = &[Role::SuperAdmin];

const USER_SORT: &[SortColumn] = &[
    CREATED_AT,
    SortColumn { key: "name", column: "name" },
    SortColumn { key: "email", column: "email" },
];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_one))
        .route("/{id}/roles", put(assign_roles))
        .route("/{id}/verify", patch(set_verified))
        .route("/{id}/active", patch(set_active))
}

#[derive(Clone, Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<Role>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub is_verified: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub is_active: bool,
}

async fn admin(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let session = authenticate(state, headers).await?;
    session.require_any(USER_ADMINS)?;
    Ok(session)
}

async fn reload(state: &AppState, id: &UserId) -> Result<User, ApiError> {
    SqlUserRepository::new(state.db_pool.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", &id.0))
}

async fn record(
    state: &AppState,
    headers: &HeaderMap,
    session: &Session,
    target: &UserId,
    event_type: &str,
    detail: (&str, String),
) -> Result<(), ApiError> {
    let correlation_id = correlation_id(headers);
    let event = AuditEvent::new(
        Some("USER".to_string()),
        Some(target.0.clone()),
        correlation_id.clone(),
        event_type,
        AuditCategory::Auth,
        session.user_id().0.clone(),
        AuditOutcome::Success,
    )
    .with_metadata(detail.0, detail.1.clone());
    let mut conn = state.db_pool.acquire().await?;
    audit::insert_events(&mut conn, &[event]).await?;
    info!(
        event_name = event_type,
        correlation_id = %correlation_id,
        actor = %session.user_id().0,
        entity_id = %target.0,
        detail = %detail.1,
        "user account changed"
    );
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<User>> {
    admin(&state, &headers).await?;
    let request = PageRequest::resolve(&page, USER_SORT);
    let (users, total) = SqlUserRepository::new(state.db_pool.clone()).list(&request).await?;
    Ok(Json(Paginated::new(users, total, &request)))
}

pub async fn get_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<User> {
    admin(&state, &headers).await?;
    Ok(Json(reload(&state, &UserId(id)).await?))
}

/// Replaces the full role set.
pub async fn assign_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<RolesRequest>,
) -> ApiResult<User> {
    let session = admin(&state, &headers).await?;
    if request.roles.is_empty() {
        return Err(ApiError::invalid("roles must not be empty"));
    }
    let mut roles = request.roles;
    roles.sort();
    roles.dedup();

    let target = UserId(id);
    if !SqlUserRepository::new(state.db_pool.clone()).assign_roles(&target, &roles, Utc::now()).await? {
        return Err(ApiError::not_found("user", target.0));
    }
    let names = roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",");
    record(&state, &headers, &session, &target, "user.roles_assigned", ("roles", names)).await?;
    Ok(Json(reload(&state, &target).await?))
}

pub async fn set_verified(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<User> {
    let session = admin(&state, &headers).await?;
    let target = UserId(id);
    if !SqlUserRepository::new(state.db_pool.clone())
        .set_verified(&target, request.is_verified, Utc::now())
        .await?
    {
        return Err(ApiError::not_found("user", target.0));
    }
    record(
        &state,
        &headers,
        &session,
        &target,
        "user.verification_changed",
        ("is_verified", request.is_verified.to_string()),
    )
    .await?;
    Ok(Json(reload(&state, &target).await?))
}

/// Deactivation also revokes every refresh session of the account.
pub async fn set_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ActiveRequest>,
) -> ApiResult<User> {
    let session = admin(&state, &headers).await?;
    let target = UserId(id);
    if !request.is_active && &target == session.user_id() {
        return Err(ApiError::invalid("an administrator cannot deactivate their own account"));
    }

    let now = Utc::now();
    if !SqlUserRepository::new(state.db_pool.clone()).set_active(&target, request.is_active, now).await? {
        return Err(ApiError::not_found("user", target.0));
    }
    if !request.is_active {
        SqlSessionRepository::new(state.db_pool.clone()).revoke_all_for_user(&target, now).await?;
    }
    record(
        &state,
        &headers,
        &session,
        &target,
        "user.activation_changed",
        ("is_active", request.is_active.to_string()),
    )
    .await?;
    Ok(Json(reload(&state, &target).await?))
}
