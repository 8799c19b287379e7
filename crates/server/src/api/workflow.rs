//! Endpoints every approvable entity shares: listings, detail with the
//! approval trail, workflow commands and bulk decisions.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use koperasi_core::domain::user::UserId;
use koperasi_core::domain::WithApprovals;
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn};
use koperasi_core::workflow::{ApprovalStep, WorkflowCommand, WorkflowKind};
use koperasi_db::repositories::{workflow, ApplicationFilter, RepositoryError};

use crate::api::{correlation_id, optional_body, StatusFilter};
use crate::auth::{authenticate, Session, STAFF_ROLES};
use crate::error::{ApiError, ApiResult};
use crate::services::workflow::BulkItemResult;
use crate::state::AppState;

const MAX_BULK_ITEMS: usize = 100;

/// A stored application driven by the shared workflow engine.
#[async_trait]
pub trait Approvable: Serialize + Send + Sync + Sized + 'static {
    const KIND: WorkflowKind;
    const SORT: &'static [SortColumn];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError>;

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError>;

    fn owner(&self) -> &UserId;
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BulkRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

pub fn workflow_routes<T: Approvable>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all::<T>))
        .route("/my", get(list_mine::<T>))
        .route("/pending-approval", get(pending::<T>))
        .route("/bulk-approve", post(bulk_approve::<T>))
        .route("/bulk-reject", post(bulk_reject::<T>))
        .route("/{id}", get(get_one::<T>))
        .route("/{id}/submit", post(submit::<T>))
        .route("/{id}/approve", post(approve::<T>))
        .route("/{id}/reject", post(reject::<T>))
        .route("/{id}/cancel", post(cancel::<T>))
        .route("/{id}/disburse", post(disburse::<T>))
}

/// Loads one entity with its approval trail, or 404.
pub async fn load_with_approvals<T: Approvable>(
    state: &AppState,
    id: &str,
) -> Result<WithApprovals<T>, ApiError> {
    let mut conn = state.db_pool.acquire().await?;
    let entity = T::find(&mut conn, id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::KIND.label(), id))?;
    let approvals = workflow::load_approvals(&mut conn, T::KIND, id).await?;
    Ok(WithApprovals { entity, approvals })
}

/// Loads an entity the caller owns and may still edit.
pub async fn load_owned_draft<T: Approvable>(
    state: &AppState,
    session: &Session,
    id: &str,
) -> Result<T, ApiError> {
    let mut conn = state.db_pool.acquire().await?;
    let entity = T::find(&mut conn, id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::KIND.label(), id))?;
    if entity.owner() != session.user_id() {
        return Err(ApiError::forbidden(format!(
            "user `{}` does not own `{id}`",
            session.user_id().0
        )));
    }
    let current = workflow::load_state(&mut conn, T::KIND, id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::KIND.label(), id))?;
    if !current.status.is_editable() {
        return Err(ApiError::invalid(format!(
            "{} `{id}` is {} and can no longer be edited",
            T::KIND.label(),
            current.status
        )));
    }
    Ok(entity)
}

async fn list_page<T: Approvable>(
    state: &AppState,
    filter: &ApplicationFilter,
    page: &PageQuery,
) -> Result<Paginated<T>, ApiError> {
    let request = PageRequest::resolve(page, T::SORT);
    let mut conn = state.db_pool.acquire().await?;
    let (rows, total) = T::list(&mut conn, filter, &request).await?;
    Ok(Paginated::new(rows, total, &request))
}

pub async fn list_all<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
    Query(status): Query<StatusFilter>,
) -> ApiResult<Paginated<T>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(STAFF_ROLES)?;
    let filter = ApplicationFilter { status: status.parse()?, ..ApplicationFilter::default() };
    Ok(Json(list_page(&state, &filter, &page).await?))
}

pub async fn list_mine<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
    Query(status): Query<StatusFilter>,
) -> ApiResult<Paginated<T>> {
    let session = authenticate(&state, &headers).await?;
    let filter = ApplicationFilter {
        status: status.parse()?,
        ..ApplicationFilter::for_user(session.user_id().0.clone())
    };
    Ok(Json(list_page(&state, &filter, &page).await?))
}

/// Applications waiting on a step the caller can decide.
pub async fn pending<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<T>> {
    let session = authenticate(&state, &headers).await?;
    let steps: Vec<ApprovalStep> =
        [ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua, ApprovalStep::Pengawas]
            .into_iter()
            .filter(|step| session.user.has_role(step.default_role()))
            .collect();
    if steps.is_empty() {
        return Err(ApiError::forbidden(format!(
            "user `{}` holds no approval level",
            session.user_id().0
        )));
    }
    Ok(Json(list_page(&state, &ApplicationFilter::awaiting(steps), &page).await?))
}

pub async fn get_one<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WithApprovals<T>> {
    let session = authenticate(&state, &headers).await?;
    let found = load_with_approvals::<T>(&state, &id).await?;
    session.require_owner_or_staff(found.entity.owner())?;
    Ok(Json(found))
}

async fn run<T: Approvable>(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    command: WorkflowCommand,
) -> ApiResult<WithApprovals<T>> {
    let session = authenticate(state, headers).await?;
    state
        .workflow()
        .transition(T::KIND, id, command, &session.actor(), &correlation_id(headers))
        .await?;
    Ok(Json(load_with_approvals::<T>(state, id).await?))
}

pub async fn submit<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WithApprovals<T>> {
    run::<T>(&state, &headers, &id, WorkflowCommand::Submit).await
}

pub async fn approve<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<WithApprovals<T>> {
    let request: DecisionRequest = optional_body(&body)?;
    run::<T>(&state, &headers, &id, WorkflowCommand::Approve { notes: request.notes }).await
}

pub async fn reject<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<WithApprovals<T>> {
    let request: DecisionRequest = optional_body(&body)?;
    run::<T>(&state, &headers, &id, WorkflowCommand::Reject { notes: request.notes }).await
}

pub async fn cancel<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WithApprovals<T>> {
    run::<T>(&state, &headers, &id, WorkflowCommand::Cancel).await
}

pub async fn disburse<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WithApprovals<T>> {
    run::<T>(&state, &headers, &id, WorkflowCommand::Disburse).await
}

async fn bulk<T: Approvable>(
    state: &AppState,
    headers: &HeaderMap,
    request: BulkRequest,
    approve: bool,
) -> ApiResult<BulkResponse> {
    let session = authenticate(state, headers).await?;
    if request.ids.is_empty() || request.ids.len() > MAX_BULK_ITEMS {
        return Err(ApiError::invalid(format!(
            "ids must contain between 1 and {MAX_BULK_ITEMS} entries"
        )));
    }

    let results = state
        .workflow()
        .bulk_decide(
            T::KIND,
            &request.ids,
            approve,
            request.notes,
            &session.actor(),
            &correlation_id(headers),
        )
        .await;
    let succeeded = results.iter().filter(|result| result.success).count();
    Ok(Json(BulkResponse { succeeded, failed: results.len() - succeeded, results }))
}

pub async fn bulk_approve<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkRequest>,
) -> ApiResult<BulkResponse> {
    bulk::<T>(&state, &headers, request, true).await
}

pub async fn bulk_reject<T: Approvable>(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkRequest>,
) -> ApiResult<BulkResponse> {
    bulk::<T>(&state, &headers, request, false).await
}
