pub mod audit;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod pagination;
pub mod validation;
pub mod workflow;

pub use domain::user::{Role, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use pagination::{PageQuery, PageRequest, Paginated};
pub use validation::{Locale, ValidationErrors, Validator};
pub use workflow::{
    Actor, ApplicationStatus, ApprovalStep, WorkflowAction, WorkflowCommand, WorkflowEngine,
    WorkflowError, WorkflowKind, WorkflowState,
};
