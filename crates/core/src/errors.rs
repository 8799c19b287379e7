use thiserror::Error;

use crate::domain::savings::LedgerError;
use crate::validation::ValidationErrors;
use crate::workflow::WorkflowError;

pub const FORBIDDEN_MESSAGE: &str = "Forbidden resource";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<ValidationErrors> for DomainError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("authentication required: {0}")]
    Unauthenticated(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<WorkflowError> for ApplicationError {
    fn from(value: WorkflowError) -> Self {
        Self::Domain(DomainError::Workflow(value))
    }
}

impl From<ValidationErrors> for ApplicationError {
    fn from(value: ValidationErrors) -> Self {
        Self::Domain(DomainError::Validation(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, details: Vec<String>, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "Authentication is required.",
            Self::Forbidden { .. } => FORBIDDEN_MESSAGE,
            Self::NotFound { .. } => "The requested resource was not found.",
            Self::Conflict { .. } => "The request conflicts with the current state of the resource.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn set_correlation_id(&mut self, value: String) {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => *correlation_id = value,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        mapped.set_correlation_id(correlation_id.into());
        mapped
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(errors)) => Self::BadRequest {
                message: "validation failed".to_owned(),
                details: errors.messages(),
                correlation_id,
            },
            ApplicationError::Domain(DomainError::Workflow(error)) => match error {
                WorkflowError::NotAuthorized { .. } | WorkflowError::NotOwner { .. } => {
                    Self::Forbidden { message: FORBIDDEN_MESSAGE.to_owned(), correlation_id }
                }
                WorkflowError::InvalidTransition { .. } => Self::BadRequest {
                    message: error.to_string(),
                    details: Vec::new(),
                    correlation_id,
                },
                WorkflowError::InconsistentState { .. } => {
                    Self::Conflict { message: error.to_string(), correlation_id }
                }
                WorkflowError::KindMismatch { .. } | WorkflowError::NoSteps { .. } => {
                    Self::Internal { message: error.to_string(), correlation_id }
                }
            },
            ApplicationError::Domain(DomainError::Ledger(error)) => Self::BadRequest {
                message: error.to_string(),
                details: vec![error.to_string()],
                correlation_id,
            },
            ApplicationError::Domain(DomainError::NotFound { entity, id }) => {
                Self::NotFound { message: format!("{entity} `{id}` not found"), correlation_id }
            }
            ApplicationError::Domain(DomainError::Conflict(message)) => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::Forbidden(_)) => {
                Self::Forbidden { message: FORBIDDEN_MESSAGE.to_owned(), correlation_id }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, details: Vec::new(), correlation_id }
            }
            ApplicationError::Unauthenticated(message) => {
                Self::Unauthorized { message, correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError, FORBIDDEN_MESSAGE};
    use crate::validation::{FieldError, ValidationErrors};
    use crate::workflow::{ApplicationStatus, WorkflowError};

    #[test]
    fn validation_error_maps_to_bad_request_with_field_messages() {
        let errors = ValidationErrors::from(vec![FieldError::new("amount", "amount wajib diisi")]);
        let interface = ApplicationError::from(errors).into_interface("req-1");

        match interface {
            InterfaceError::BadRequest { details, correlation_id, .. } => {
                assert_eq!(details, vec!["amount wajib diisi".to_string()]);
                assert_eq!(correlation_id, "req-1");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn authority_failures_map_to_fixed_forbidden_message() {
        let interface = ApplicationError::from(WorkflowError::NotAuthorized {
            reason: "actor does not hold required level `KETUA`".to_owned(),
            failure: None,
        })
        .into_interface("req-2");

        assert_eq!(
            interface,
            InterfaceError::Forbidden {
                message: FORBIDDEN_MESSAGE.to_owned(),
                correlation_id: "req-2".to_owned()
            }
        );
        assert_eq!(interface.user_message(), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn invalid_transition_maps_to_bad_request() {
        let interface = ApplicationError::from(WorkflowError::InvalidTransition {
            status: ApplicationStatus::Rejected,
            command: "approve",
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn not_found_and_conflict_keep_their_classes() {
        let not_found = ApplicationError::from(DomainError::NotFound {
            entity: "loan",
            id: "LN-1".to_owned(),
        })
        .into_interface("req-4");
        assert!(matches!(not_found, InterfaceError::NotFound { .. }));

        let conflict = ApplicationError::from(DomainError::Conflict(
            "payroll period already processed".to_owned(),
        ))
        .into_interface("req-5");
        assert!(matches!(conflict, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing token secret".to_owned()).into_interface("req-7");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "req-7");
    }
}
