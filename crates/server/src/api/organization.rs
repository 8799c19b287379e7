//! Organization catalogs: `/employees`, `/departments`, `/golongan` and
//! `/levels`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use koperasi_core::domain::new_id;
use koperasi_core::domain::user::{Department, Employee, EmployeeType, Golongan, Level, Role};
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn, CREATED_AT};
use koperasi_core::validation::{FieldError, Locale, ValidationErrors, Validator};
use koperasi_db::repositories::{organization, OrganizationRepository, SqlOrganizationRepository};

use crate::api::locale;
use crate::auth::{authenticate, STAFF_ROLES};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const CATALOG_ADMINS: &[Role] = &[Role::SuperAdmin];

const EMPLOYEE_SORT: &[SortColumn] = &[
    CREATED_AT,
    SortColumn { key: "employeeNumber", column: "employee_number" },
    SortColumn { key: "fullName", column: "full_name" },
];

pub fn employee_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route("/{id}", get(get_employee).put(update_employee))
}

pub fn department_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route("/{id}", get(get_department).put(update_department).delete(delete_department))
}

pub fn golongan_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_golongan).post(create_golongan))
        .route("/{id}", get(get_golongan).put(update_golongan).delete(delete_golongan))
}

pub fn level_routes() -> Router<AppState> {
    Router::new().route("/", get(list_levels))
}

fn catalog(state: &AppState) -> SqlOrganizationRepository {
    SqlOrganizationRepository::new(state.db_pool.clone())
}

fn unknown_reference(locale: Locale, field: &str) -> FieldError {
    let message = match locale {
        Locale::Id => format!("{field} tidak ditemukan"),
        Locale::En => format!("{field} does not exist"),
    };
    FieldError::new(field, message)
}

/// Department and golongan referenced by an employee record must exist.
pub(crate) async fn check_references(
    state: &AppState,
    department_id: &str,
    golongan_id: &str,
    locale: Locale,
) -> Result<(), ApiError> {
    let repository = catalog(state);
    let mut missing = Vec::new();
    if repository.find_department(department_id).await?.is_none() {
        missing.push(unknown_reference(locale, "departmentId"));
    }
    let mut conn = state.db_pool.acquire().await?;
    if organization::find_golongan(&mut conn, golongan_id).await?.is_none() {
        missing.push(unknown_reference(locale, "golonganId"));
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors::from(missing).into())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GolonganRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub max_loan_amount: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRequest {
    pub employee_number: String,
    pub full_name: String,
    pub department_id: String,
    pub golongan_id: String,
    pub employee_type: EmployeeType,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bank_account_number: Option<String>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

fn optional_trimmed(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

impl DepartmentRequest {
    fn validate(&self, locale: Locale) -> Result<(), ValidationErrors> {
        Validator::new(locale)
            .required("name", &self.name)
            .max_length("name", &self.name, 100)
            .finish()
    }
}

impl GolonganRequest {
    fn validate(&self, locale: Locale) -> Result<(), ValidationErrors> {
        let mut validator = Validator::new(locale);
        validator
            .required("name", &self.name)
            .max_length("name", &self.name, 50)
            .positive("maxLoanAmount", self.max_loan_amount);
        if let Some(description) = &self.description {
            validator.max_length("description", description, 255);
        }
        validator.finish()
    }
}

impl EmployeeRequest {
    fn normalized(self) -> Self {
        Self {
            employee_number: self.employee_number.trim().to_string(),
            full_name: self.full_name.trim().to_string(),
            department_id: self.department_id.trim().to_string(),
            golongan_id: self.golongan_id.trim().to_string(),
            phone: optional_trimmed(self.phone),
            bank_account_number: optional_trimmed(self.bank_account_number),
            ..self
        }
    }

    fn validate(&self, locale: Locale) -> Result<(), ValidationErrors> {
        let mut validator = Validator::new(locale);
        validator
            .required("employeeNumber", &self.employee_number)
            .digits("employeeNumber", &self.employee_number)
            .max_length("employeeNumber", &self.employee_number, 20)
            .required("fullName", &self.full_name)
            .max_length("fullName", &self.full_name, 100)
            .required("departmentId", &self.department_id)
            .required("golonganId", &self.golongan_id);
        if let Some(phone) = &self.phone {
            validator.digits("phone", phone).max_length("phone", phone, 15);
        }
        if let Some(account) = &self.bank_account_number {
            validator.digits("bankAccountNumber", account).max_length("bankAccountNumber", account, 30);
        }
        validator.finish()
    }
}

pub async fn list_employees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<Employee>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(STAFF_ROLES)?;
    let request = PageRequest::resolve(&page, EMPLOYEE_SORT);
    let (employees, total) = catalog(&state).list_employees(&request).await?;
    Ok(Json(Paginated::new(employees, total, &request)))
}

pub async fn get_employee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Employee> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(STAFF_ROLES)?;
    let employee =
        catalog(&state).find_employee(&id).await?.ok_or_else(|| ApiError::not_found("employee", id))?;
    Ok(Json(employee))
}

async fn checked_employee(
    state: &AppState,
    headers: &HeaderMap,
    request: EmployeeRequest,
) -> Result<EmployeeRequest, ApiError> {
    let locale = locale(state, headers);
    let request = request.normalized();
    request.validate(locale)?;
    check_references(state, &request.department_id, &request.golongan_id, locale).await?;
    Ok(request)
}

pub async fn create_employee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    let request = checked_employee(&state, &headers, request).await?;

    {
        let mut conn = state.db_pool.acquire().await?;
        if organization::find_employee_by_number(&mut conn, &request.employee_number).await?.is_some() {
            return Err(ApiError::conflict(format!(
                "employee number `{}` is already registered",
                request.employee_number
            )));
        }
    }

    let now = Utc::now();
    let employee = Employee {
        id: new_id(),
        employee_number: request.employee_number,
        full_name: request.full_name,
        department_id: request.department_id,
        golongan_id: request.golongan_id,
        employee_type: request.employee_type,
        phone: request.phone,
        bank_account_number: request.bank_account_number,
        is_active: request.is_active,
        created_at: now,
        updated_at: now,
    };
    catalog(&state).save_employee(&employee).await?;
    info!(
        event_name = "organization.employee_created",
        entity_id = %employee.id,
        employee_number = %employee.employee_number,
        "employee registered"
    );
    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn update_employee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<EmployeeRequest>,
) -> ApiResult<Employee> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    let repository = catalog(&state);
    let current =
        repository.find_employee(&id).await?.ok_or_else(|| ApiError::not_found("employee", id))?;
    let request = checked_employee(&state, &headers, request).await?;

    let employee = Employee {
        employee_number: request.employee_number,
        full_name: request.full_name,
        department_id: request.department_id,
        golongan_id: request.golongan_id,
        employee_type: request.employee_type,
        phone: request.phone,
        bank_account_number: request.bank_account_number,
        is_active: request.is_active,
        updated_at: Utc::now(),
        ..current
    };
    repository.save_employee(&employee).await?;
    Ok(Json(employee))
}

pub async fn list_departments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Department>> {
    authenticate(&state, &headers).await?;
    Ok(Json(catalog(&state).list_departments().await?))
}

pub async fn get_department(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Department> {
    authenticate(&state, &headers).await?;
    let department = catalog(&state)
        .find_department(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("department", id))?;
    Ok(Json(department))
}

pub async fn create_department(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DepartmentRequest>,
) -> Result<(StatusCode, Json<Department>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let department =
        Department { id: new_id(), name: request.name.trim().to_string(), created_at: Utc::now() };
    catalog(&state).save_department(&department).await?;
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn update_department(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<DepartmentRequest>,
) -> ApiResult<Department> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let repository = catalog(&state);
    let current =
        repository.find_department(&id).await?.ok_or_else(|| ApiError::not_found("department", id))?;
    let department = Department { name: request.name.trim().to_string(), ..current };
    repository.save_department(&department).await?;
    Ok(Json(department))
}

/// Departments still referenced by employees answer 409.
pub async fn delete_department(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    if !catalog(&state).delete_department(&id).await? {
        return Err(ApiError::not_found("department", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_golongan(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Golongan>> {
    authenticate(&state, &headers).await?;
    Ok(Json(catalog(&state).list_golongan().await?))
}

pub async fn get_golongan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Golongan> {
    authenticate(&state, &headers).await?;
    let golongan =
        catalog(&state).find_golongan(&id).await?.ok_or_else(|| ApiError::not_found("golongan", id))?;
    Ok(Json(golongan))
}

pub async fn create_golongan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GolonganRequest>,
) -> Result<(StatusCode, Json<Golongan>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let golongan = Golongan {
        id: new_id(),
        name: request.name.trim().to_string(),
        description: optional_trimmed(request.description),
        max_loan_amount: request.max_loan_amount,
        created_at: Utc::now(),
    };
    catalog(&state).save_golongan(&golongan).await?;
    Ok((StatusCode::CREATED, Json(golongan)))
}

pub async fn update_golongan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<GolonganRequest>,
) -> ApiResult<Golongan> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    request.validate(locale(&state, &headers))?;

    let repository = catalog(&state);
    let current =
        repository.find_golongan(&id).await?.ok_or_else(|| ApiError::not_found("golongan", id))?;
    let golongan = Golongan {
        name: request.name.trim().to_string(),
        description: optional_trimmed(request.description),
        max_loan_amount: request.max_loan_amount,
        ..current
    };
    repository.save_golongan(&golongan).await?;
    info!(
        event_name = "organization.golongan_updated",
        entity_id = %golongan.id,
        max_loan_amount = %golongan.max_loan_amount,
        "golongan loan ceiling updated"
    );
    Ok(Json(golongan))
}

pub async fn delete_golongan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(CATALOG_ADMINS)?;
    if !catalog(&state).delete_golongan(&id).await? {
        return Err(ApiError::not_found("golongan", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_levels(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<Level>> {
    authenticate(&state, &headers).await?;
    Ok(Json(catalog(&state).list_levels().await?))
}
