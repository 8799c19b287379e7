//! `/member-applications`: employees applying to join the cooperative.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::domain::membership::{EmployeeDetails, MemberApplication, MemberApplicationId};
use koperasi_core::domain::new_id;
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::{PageRequest, SortColumn, CREATED_AT};
use koperasi_core::validation::Locale;
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{membership, ApplicationFilter, RepositoryError};

use crate::api::locale;
use crate::api::organization::check_references;
use crate::api::workflow::{load_owned_draft, workflow_routes, Approvable};
use crate::auth::{authenticate, Session};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[async_trait]
impl Approvable for MemberApplication {
    const KIND: WorkflowKind = WorkflowKind::MemberApplication;
    const SORT: &'static [SortColumn] = &[
        CREATED_AT,
        SortColumn { key: "fullName", column: "full_name" },
        SortColumn { key: "employeeNumber", column: "employee_number" },
        SortColumn { key: "status", column: "status" },
    ];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError> {
        membership::find(conn, &MemberApplicationId(id.to_string())).await
    }

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError> {
        membership::list(conn, filter, page).await
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", put(update))
        .merge(workflow_routes::<MemberApplication>())
}

fn trimmed(details: EmployeeDetails) -> EmployeeDetails {
    EmployeeDetails {
        employee_number: details.employee_number.trim().to_string(),
        full_name: details.full_name.trim().to_string(),
        department_id: details.department_id.trim().to_string(),
        golongan_id: details.golongan_id.trim().to_string(),
        employee_type: details.employee_type,
        phone: details.phone.trim().to_string(),
        bank_account_number: details.bank_account_number.trim().to_string(),
    }
}

/// Field rules plus the department and golongan references.
async fn check_details(
    state: &AppState,
    details: &EmployeeDetails,
    locale: Locale,
) -> Result<(), ApiError> {
    details.validate(locale)?;
    check_references(state, &details.department_id, &details.golongan_id, locale).await
}

fn require_applicant(session: &Session) -> Result<(), ApiError> {
    if session.user.is_member {
        return Err(ApiError::conflict(format!(
            "user `{}` is already a cooperative member",
            session.user_id().0
        )));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(details): Json<EmployeeDetails>,
) -> Result<(StatusCode, Json<MemberApplication>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    require_applicant(&session)?;
    let details = trimmed(details);
    check_details(&state, &details, locale(&state, &headers)).await?;

    let mut conn = state.db_pool.acquire().await?;
    if membership::has_live_application(&mut conn, session.user_id()).await? {
        return Err(ApiError::conflict(format!(
            "user `{}` already has a membership application in progress",
            session.user_id().0
        )));
    }

    let now = Utc::now();
    let created = MemberApplication {
        id: MemberApplicationId(new_id()),
        user_id: session.user_id().clone(),
        employee: details,
        status: ApplicationStatus::Draft,
        current_step: None,
        created_at: now,
        updated_at: now,
    };
    membership::save(&mut conn, &created).await?;
    info!(
        event_name = "membership.application_created",
        entity_id = %created.id.0,
        user_id = %created.user_id.0,
        "membership application created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(details): Json<EmployeeDetails>,
) -> ApiResult<MemberApplication> {
    let session = authenticate(&state, &headers).await?;
    let mut current = load_owned_draft::<MemberApplication>(&state, &session, &id).await?;
    let details = trimmed(details);
    check_details(&state, &details, locale(&state, &headers)).await?;

    current.employee = details;
    current.updated_at = Utc::now();
    let mut conn = state.db_pool.acquire().await?;
    membership::save(&mut conn, &current).await?;
    Ok(Json(current))
}
