pub mod authority;
pub mod engine;
pub mod states;

pub use authority::{AuthorityFailure, AuthorityResult, AuthorityValidator};
pub use engine::{
    definition_for, DepositWorkflow, Disbursement, DynWorkflowDefinition, LoanRepaymentWorkflow,
    LoanWorkflow, MemberApplicationWorkflow, SavingsWithdrawalWorkflow, WorkflowDefinition,
    WorkflowEngine, WorkflowError,
};
pub use states::{
    Actor, ApplicationStatus, ApprovalRecord, ApprovalStep, Decision, TransitionOutcome,
    WorkflowAction, WorkflowCommand, WorkflowContext, WorkflowKind, WorkflowState,
};
