use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use koperasi_core::errors::{ApplicationError, DomainError, InterfaceError, FORBIDDEN_MESSAGE};
use koperasi_core::validation::ValidationErrors;
use koperasi_core::workflow::WorkflowError;
use koperasi_db::repositories::savings::PostingError;
use koperasi_db::repositories::RepositoryError;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Error body shared by every endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub message: Vec<String>,
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApplicationError::Unauthenticated(message.into()).into()
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        DomainError::Forbidden(reason.into()).into()
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound { entity, id: id.into() }.into()
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict(message.into()).into()
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DomainError::InvariantViolation(message.into()).into()
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let status = self.status();
        let message = match &self.0 {
            InterfaceError::BadRequest { message, details, .. } => {
                if details.is_empty() {
                    vec![message.clone()]
                } else {
                    details.clone()
                }
            }
            InterfaceError::Forbidden { .. } => vec![FORBIDDEN_MESSAGE.to_string()],
            InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
                vec![self.0.user_message().to_string()]
            }
            InterfaceError::Unauthorized { message, .. }
            | InterfaceError::NotFound { message, .. }
            | InterfaceError::Conflict { message, .. } => vec![message.clone()],
        };

        ErrorBody {
            status_code: status.as_u16(),
            message,
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        Self(value.into_interface(Self::correlation_id()))
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApplicationError::Domain(value).into()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(value: WorkflowError) -> Self {
        ApplicationError::from(value).into()
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        ApplicationError::from(value).into()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::from(persistence(value)).into()
    }
}

impl From<PostingError> for ApiError {
    fn from(value: PostingError) -> Self {
        ApplicationError::from(posting(value)).into()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(value: sqlx::Error) -> Self {
        ApplicationError::Persistence(value.to_string()).into()
    }
}

/// Storage failures surface as 503 unless they are constraint violations the
/// caller caused.
pub fn persistence(error: RepositoryError) -> ApplicationError {
    if error.is_unique_violation() {
        return DomainError::Conflict("resource already exists".to_string()).into();
    }
    if error.is_foreign_key_violation() {
        return DomainError::Conflict("resource is still referenced".to_string()).into();
    }
    ApplicationError::Persistence(error.to_string())
}

pub fn posting(error: PostingError) -> ApplicationError {
    match error {
        PostingError::Ledger(error) => DomainError::Ledger(error).into(),
        PostingError::Repository(error) => persistence(error),
        PostingError::AccountNotFound(user_id) => {
            DomainError::NotFound { entity: "savings account", id: user_id }.into()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %body.correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.refused",
                correlation_id = %body.correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request refused"
            );
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use koperasi_core::domain::savings::{LedgerError, SavingsType};
    use koperasi_core::validation::{FieldError, ValidationErrors};
    use koperasi_core::workflow::{ApplicationStatus, WorkflowError};
    use koperasi_db::repositories::savings::PostingError;
    use rust_decimal::Decimal;

    use super::ApiError;

    #[test]
    fn validation_errors_list_every_field_message() {
        let error = ApiError::from(ValidationErrors::from(vec![
            FieldError::new("amount", "amount wajib diisi"),
            FieldError::new("tenorMonths", "tenorMonths harus antara 1 dan 36"),
        ]));

        let body = error.body();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body.status_code, 400);
        assert_eq!(body.error, "Bad Request");
        assert_eq!(body.message.len(), 2);
        assert!(!body.correlation_id.is_empty());
    }

    #[test]
    fn authority_failures_use_the_fixed_forbidden_message() {
        let error = ApiError::from(WorkflowError::NotAuthorized {
            reason: "KETUA role required".to_string(),
            failure: None,
        });

        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.body().message, vec!["Forbidden resource".to_string()]);
    }

    #[test]
    fn invalid_transitions_are_bad_requests() {
        let error = ApiError::from(WorkflowError::InvalidTransition {
            status: ApplicationStatus::Approved,
            command: "approve",
        });
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn ledger_and_missing_account_failures_map_to_client_errors() {
        let short = ApiError::from(PostingError::Ledger(LedgerError::InsufficientBalance {
            savings_type: SavingsType::Sukarela,
            balance: Decimal::new(10, 0),
            requested: Decimal::new(20, 0),
        }));
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from(PostingError::AccountNotFound("u-1".to_string()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthenticated_requests_are_401() {
        let error = ApiError::unauthorized("missing access token");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.body().message, vec!["missing access token".to_string()]);
    }
}
