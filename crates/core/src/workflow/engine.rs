use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::workflow::authority::{AuthorityFailure, AuthorityValidator};
use crate::workflow::states::{
    Actor, ApplicationStatus, ApprovalRecord, ApprovalStep, Decision, TransitionOutcome,
    WorkflowAction, WorkflowCommand, WorkflowContext, WorkflowKind, WorkflowState,
};

/// What happens once an approved entity is paid out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disbursement {
    pub status: ApplicationStatus,
    pub actions: Vec<WorkflowAction>,
}

pub trait WorkflowDefinition {
    fn kind(&self) -> WorkflowKind;
    fn steps(&self, context: &WorkflowContext) -> Vec<ApprovalStep>;
    fn approved_status(&self) -> ApplicationStatus;
    fn approval_actions(&self) -> Vec<WorkflowAction>;

    fn disbursement(&self) -> Option<Disbursement> {
        None
    }
}

impl<T> WorkflowDefinition for Box<T>
where
    T: WorkflowDefinition + ?Sized,
{
    fn kind(&self) -> WorkflowKind {
        (**self).kind()
    }

    fn steps(&self, context: &WorkflowContext) -> Vec<ApprovalStep> {
        (**self).steps(context)
    }

    fn approved_status(&self) -> ApplicationStatus {
        (**self).approved_status()
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        (**self).approval_actions()
    }

    fn disbursement(&self) -> Option<Disbursement> {
        (**self).disbursement()
    }
}

/// DSP -> KETUA, plus PENGAWAS once the principal reaches the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoanWorkflow {
    pub pengawas_threshold: Option<Decimal>,
}

impl WorkflowDefinition for LoanWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Loan
    }

    fn steps(&self, context: &WorkflowContext) -> Vec<ApprovalStep> {
        let mut steps = vec![ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua];
        if self.pengawas_threshold.is_some_and(|threshold| context.amount >= threshold) {
            steps.push(ApprovalStep::Pengawas);
        }
        steps
    }

    fn approved_status(&self) -> ApplicationStatus {
        ApplicationStatus::ApprovedPendingDisbursement
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::NotifyApplicant, WorkflowAction::NotifyDisbursement]
    }

    fn disbursement(&self) -> Option<Disbursement> {
        Some(Disbursement {
            status: ApplicationStatus::Disbursed,
            actions: vec![WorkflowAction::RecordLoanDisbursement, WorkflowAction::NotifyApplicant],
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepositWorkflow;

impl WorkflowDefinition for DepositWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Deposit
    }

    fn steps(&self, _context: &WorkflowContext) -> Vec<ApprovalStep> {
        vec![ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua]
    }

    fn approved_status(&self) -> ApplicationStatus {
        ApplicationStatus::Approved
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::EnrollPayrollDeduction, WorkflowAction::NotifyApplicant]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SavingsWithdrawalWorkflow;

impl WorkflowDefinition for SavingsWithdrawalWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::SavingsWithdrawal
    }

    fn steps(&self, _context: &WorkflowContext) -> Vec<ApprovalStep> {
        vec![ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua]
    }

    fn approved_status(&self) -> ApplicationStatus {
        ApplicationStatus::ApprovedPendingDisbursement
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::NotifyApplicant, WorkflowAction::NotifyDisbursement]
    }

    fn disbursement(&self) -> Option<Disbursement> {
        Some(Disbursement {
            status: ApplicationStatus::Completed,
            actions: vec![WorkflowAction::PostWithdrawalDebit, WorkflowAction::NotifyApplicant],
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemberApplicationWorkflow;

impl WorkflowDefinition for MemberApplicationWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::MemberApplication
    }

    fn steps(&self, _context: &WorkflowContext) -> Vec<ApprovalStep> {
        vec![ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua]
    }

    fn approved_status(&self) -> ApplicationStatus {
        ApplicationStatus::Approved
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::ActivateMembership, WorkflowAction::NotifyApplicant]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoanRepaymentWorkflow;

impl WorkflowDefinition for LoanRepaymentWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::LoanRepayment
    }

    fn steps(&self, _context: &WorkflowContext) -> Vec<ApprovalStep> {
        vec![ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua]
    }

    fn approved_status(&self) -> ApplicationStatus {
        ApplicationStatus::Approved
    }

    fn approval_actions(&self) -> Vec<WorkflowAction> {
        vec![WorkflowAction::SettleLoan, WorkflowAction::NotifyApplicant]
    }
}

pub type DynWorkflowDefinition = Box<dyn WorkflowDefinition + Send + Sync>;

pub fn definition_for(kind: WorkflowKind, pengawas_threshold: Option<Decimal>) -> DynWorkflowDefinition {
    match kind {
        WorkflowKind::Loan => Box::new(LoanWorkflow { pengawas_threshold }),
        WorkflowKind::Deposit => Box::new(DepositWorkflow),
        WorkflowKind::SavingsWithdrawal => Box::new(SavingsWithdrawalWorkflow),
        WorkflowKind::MemberApplication => Box::new(MemberApplicationWorkflow),
        WorkflowKind::LoanRepayment => Box::new(LoanRepaymentWorkflow),
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {command} an application in status {status}")]
    InvalidTransition { status: ApplicationStatus, command: &'static str },
    #[error("only the applicant `{owner_id}` may {command} this application")]
    NotOwner { owner_id: String, command: &'static str },
    #[error("not authorized: {reason}")]
    NotAuthorized { reason: String, failure: Option<AuthorityFailure> },
    #[error("workflow kind mismatch: expected {expected:?}, found {found:?}")]
    KindMismatch { expected: WorkflowKind, found: WorkflowKind },
    #[error("workflow {kind:?} produced no approval steps")]
    NoSteps { kind: WorkflowKind },
    #[error("application `{entity_id}` has no pending approval for its current step")]
    InconsistentState { entity_id: String },
}

pub struct WorkflowEngine<D> {
    definition: D,
    authority: AuthorityValidator,
}

impl<D> WorkflowEngine<D>
where
    D: WorkflowDefinition,
{
    pub fn new(definition: D) -> Self {
        Self { definition, authority: AuthorityValidator::default() }
    }

    pub fn with_authority(definition: D, authority: AuthorityValidator) -> Self {
        Self { definition, authority }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.definition.kind()
    }

    pub fn planned_steps(&self, context: &WorkflowContext) -> Vec<ApprovalStep> {
        self.definition.steps(context)
    }

    pub fn apply(
        &self,
        state: &WorkflowState,
        command: &WorkflowCommand,
        actor: &Actor,
        context: &WorkflowContext,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if state.kind != self.definition.kind() {
            return Err(WorkflowError::KindMismatch {
                expected: self.definition.kind(),
                found: state.kind,
            });
        }

        let mut next = state.clone();
        let mut decided_step = None;

        let actions = match command {
            WorkflowCommand::Submit => {
                if state.status != ApplicationStatus::Draft {
                    return Err(invalid(state, command));
                }
                ensure_owner(state, actor, command)?;

                let steps = self.definition.steps(context);
                let Some(first) = steps.first().copied() else {
                    return Err(WorkflowError::NoSteps { kind: state.kind });
                };

                next.approvals = steps
                    .iter()
                    .enumerate()
                    .map(|(index, step)| {
                        ApprovalRecord::pending(u32::try_from(index + 1).unwrap_or(u32::MAX), *step)
                    })
                    .collect();
                next.status = ApplicationStatus::Submitted;
                next.current_step = Some(first);
                vec![WorkflowAction::NotifyApprovers(first)]
            }
            WorkflowCommand::Approve { notes } | WorkflowCommand::Reject { notes } => {
                if !state.status.awaits_decision() {
                    return Err(invalid(state, command));
                }
                let step = state.current_step.ok_or_else(|| inconsistent(state))?;

                let authority = self.authority.validate_decision(actor, step, &state.owner_id);
                if !authority.allowed {
                    return Err(WorkflowError::NotAuthorized {
                        reason: authority.reason,
                        failure: authority.failure,
                    });
                }

                let index = next
                    .approvals
                    .iter()
                    .position(|record| record.step == step && record.decision == Decision::Pending)
                    .ok_or_else(|| inconsistent(state))?;

                let approving = matches!(command, WorkflowCommand::Approve { .. });
                let record = &mut next.approvals[index];
                record.decision = if approving { Decision::Approved } else { Decision::Rejected };
                record.decided_by = Some(actor.user_id.clone());
                record.decided_at = Some(now);
                record.notes = notes.clone();
                decided_step = Some(step);

                if !approving {
                    next.status = ApplicationStatus::Rejected;
                    next.current_step = None;
                    vec![WorkflowAction::NotifyApplicant]
                } else if let Some(following) = next.approvals[index + 1..]
                    .iter()
                    .find(|record| record.decision == Decision::Pending)
                    .map(|record| record.step)
                {
                    next.status = ApplicationStatus::UnderReview(following);
                    next.current_step = Some(following);
                    vec![WorkflowAction::NotifyApprovers(following)]
                } else {
                    next.status = self.definition.approved_status();
                    next.current_step = None;
                    self.definition.approval_actions()
                }
            }
            WorkflowCommand::Cancel => {
                if !matches!(state.status, ApplicationStatus::Draft | ApplicationStatus::Submitted) {
                    return Err(invalid(state, command));
                }
                ensure_owner(state, actor, command)?;

                next.status = ApplicationStatus::Cancelled;
                next.current_step = None;
                Vec::new()
            }
            WorkflowCommand::Disburse => {
                let Some(disbursement) = self.definition.disbursement() else {
                    return Err(invalid(state, command));
                };
                if state.status != ApplicationStatus::ApprovedPendingDisbursement {
                    return Err(invalid(state, command));
                }

                let authority = self.authority.validate_disbursement(actor);
                if !authority.allowed {
                    return Err(WorkflowError::NotAuthorized {
                        reason: authority.reason,
                        failure: authority.failure,
                    });
                }

                next.status = disbursement.status;
                next.current_step = None;
                disbursement.actions
            }
        };

        Ok(TransitionOutcome {
            from: state.status,
            to: next.status,
            command: command.clone(),
            decided_step,
            state: next,
            actions,
        })
    }

    pub fn apply_with_audit<S>(
        &self,
        state: &WorkflowState,
        command: &WorkflowCommand,
        actor: &Actor,
        context: &WorkflowContext,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(state, command, actor, context, now);
        let base = |event_type: &str, outcome: AuditOutcome| {
            AuditEvent::new(
                Some(state.kind.as_str().to_string()),
                Some(state.entity_id.clone()),
                audit.correlation_id.clone(),
                event_type,
                AuditCategory::Workflow,
                audit.actor.clone(),
                outcome,
            )
            .with_metadata("command", command.name())
        };

        match &result {
            Ok(outcome) => sink.emit(
                base("workflow.transition_applied", AuditOutcome::Success)
                    .with_metadata("from", outcome.from.to_string())
                    .with_metadata("to", outcome.to.to_string()),
            ),
            Err(error) => sink.emit(
                base("workflow.transition_rejected", AuditOutcome::Rejected)
                    .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}

fn ensure_owner(
    state: &WorkflowState,
    actor: &Actor,
    command: &WorkflowCommand,
) -> Result<(), WorkflowError> {
    if actor.user_id == state.owner_id {
        return Ok(());
    }
    Err(WorkflowError::NotOwner { owner_id: state.owner_id.0.clone(), command: command.name() })
}

fn invalid(state: &WorkflowState, command: &WorkflowCommand) -> WorkflowError {
    WorkflowError::InvalidTransition { status: state.status, command: command.name() }
}

fn inconsistent(state: &WorkflowState) -> WorkflowError {
    WorkflowError::InconsistentState { entity_id: state.entity_id.clone() }
}
