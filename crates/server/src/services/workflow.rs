//! Runs workflow commands against stored applications.
//!
//! One command is one transaction: load the state, let the engine decide,
//! persist the new state together with its side effects and audit trail.
//! Notifications go out after commit and never fail the command.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use koperasi_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, InMemoryAuditSink,
};
use koperasi_core::domain::deposit::DepositId;
use koperasi_core::domain::loan::LoanId;
use koperasi_core::domain::membership::MemberApplicationId;
use koperasi_core::domain::repayment::{settlement_amount, LoanRepayment, RepaymentId};
use koperasi_core::domain::savings::{LedgerPosting, SavingsType};
use koperasi_core::domain::settings::CooperativeSettings;
use koperasi_core::domain::user::{Employee, Role, User};
use koperasi_core::domain::withdrawal::WithdrawalId;
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::errors::{ApplicationError, DomainError};
use koperasi_core::workflow::{
    definition_for, Actor, ApplicationStatus, TransitionOutcome, WorkflowAction, WorkflowCommand,
    WorkflowContext, WorkflowEngine, WorkflowKind,
};
use koperasi_db::repositories::{
    audit, deposit, loan, membership, organization, repayment, savings, settings, user,
    withdrawal, workflow, SqlUserRepository, UserRepository,
};
use koperasi_db::repositories::RepositoryError;
use koperasi_db::DbPool;

use crate::error::{persistence, posting};
use crate::notify::{MailTemplate, Mailer, Notification};

/// Reference number and amount of the application a command targets.
#[derive(Clone, Debug, Default, PartialEq)]
struct Subject {
    reference: String,
    amount: Option<Decimal>,
}

/// Everything the notifications of one committed transition need.
#[derive(Clone, Debug)]
struct Delivery {
    outcome: TransitionOutcome,
    subject: Subject,
    command: WorkflowCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub id: String,
    pub success: bool,
    pub status: Option<ApplicationStatus>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct WorkflowService {
    db_pool: DbPool,
    mailer: Arc<Mailer>,
}

impl WorkflowService {
    pub fn new(db_pool: DbPool, mailer: Arc<Mailer>) -> Self {
        Self { db_pool, mailer }
    }

    /// Commits the command and returns; mail to the people it concerns is
    /// delivered from a spawned task.
    pub async fn transition(
        &self,
        kind: WorkflowKind,
        entity_id: &str,
        command: WorkflowCommand,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let (outcome, delivery) =
            self.commit(kind, entity_id, command, actor, correlation_id).await?;
        let service = self.clone();
        tokio::spawn(async move { service.deliver(delivery).await });
        Ok(outcome)
    }

    async fn commit(
        &self,
        kind: WorkflowKind,
        entity_id: &str,
        command: WorkflowCommand,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<(TransitionOutcome, Delivery), ApplicationError> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await.map_err(storage)?;

        let state = workflow::load_state(&mut *tx, kind, entity_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| DomainError::NotFound { entity: kind.label(), id: entity_id.to_string() })?;
        let cooperative = settings::load(&mut *tx).await.map_err(persistence)?;
        let subject = describe(&mut *tx, kind, entity_id).await.map_err(persistence)?;

        let engine =
            WorkflowEngine::new(definition_for(kind, cooperative.loan_pengawas_threshold));
        let sink = InMemoryAuditSink::default();
        let audit_context = AuditContext::new(
            Some(kind.as_str().to_string()),
            Some(entity_id.to_string()),
            correlation_id,
            actor.user_id.0.clone(),
        );
        let context = WorkflowContext {
            amount: subject.amount.unwrap_or_default(),
        };

        let outcome = match engine.apply_with_audit(
            &state,
            &command,
            actor,
            &context,
            now,
            &sink,
            &audit_context,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                audit::insert_events(&mut *tx, &sink.events()).await.map_err(persistence)?;
                tx.commit().await.map_err(storage)?;
                warn!(
                    event_name = "workflow.transition.rejected",
                    correlation_id,
                    entity_kind = kind.as_str(),
                    entity_id,
                    command = command.name(),
                    error = %error,
                    "workflow command refused"
                );
                return Err(error.into());
            }
        };

        workflow::save_state(&mut *tx, &outcome.state, now).await.map_err(persistence)?;
        let mut events = sink.events();
        for action in &outcome.actions {
            if let Some(event) =
                apply_effect(&mut *tx, action, &outcome, &cooperative, actor, correlation_id, now)
                    .await?
            {
                events.push(event);
            }
        }
        audit::insert_events(&mut *tx, &events).await.map_err(persistence)?;
        tx.commit().await.map_err(storage)?;

        info!(
            event_name = "workflow.transition.committed",
            correlation_id,
            entity_kind = kind.as_str(),
            entity_id,
            command = command.name(),
            from = %outcome.from,
            to = %outcome.to,
            "workflow transition committed"
        );

        let delivery = Delivery { outcome: outcome.clone(), subject, command };
        Ok((outcome, delivery))
    }

    /// Decides every id independently; one failure does not undo the others.
    pub async fn bulk_decide(
        &self,
        kind: WorkflowKind,
        ids: &[String],
        approve: bool,
        notes: Option<String>,
        actor: &Actor,
        correlation_id: &str,
    ) -> Vec<BulkItemResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let command = if approve {
                WorkflowCommand::Approve { notes: notes.clone() }
            } else {
                WorkflowCommand::Reject { notes: notes.clone() }
            };
            let result = match self.transition(kind, id, command, actor, correlation_id).await {
                Ok(outcome) => BulkItemResult {
                    id: id.clone(),
                    success: true,
                    status: Some(outcome.to),
                    error: None,
                },
                Err(error) => BulkItemResult {
                    id: id.clone(),
                    success: false,
                    status: None,
                    error: Some(error.to_string()),
                },
            };
            results.push(result);
        }
        results
    }

    async fn deliver(&self, delivery: Delivery) {
        let Delivery { outcome, subject, command } = &delivery;
        let users = SqlUserRepository::new(self.db_pool.clone());
        let owner = match users.find_by_id(&outcome.state.owner_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    event_name = "workflow.notify.skipped",
                    entity_id = %outcome.state.entity_id,
                    error = %error,
                    "applicant could not be loaded for notification"
                );
                return;
            }
        };
        let notes = match command {
            WorkflowCommand::Approve { notes } | WorkflowCommand::Reject { notes } => notes.clone(),
            _ => None,
        };

        for action in &outcome.actions {
            let (template, step, recipients) = match action {
                WorkflowAction::NotifyApprovers(step) => (
                    MailTemplate::ApprovalRequested,
                    Some(*step),
                    self.staff_with(&users, step.default_role(), &owner).await,
                ),
                WorkflowAction::NotifyDisbursement => (
                    MailTemplate::DisbursementRequested,
                    None,
                    self.staff_with(&users, Role::Bendahara, &owner).await,
                ),
                WorkflowAction::NotifyApplicant => {
                    (MailTemplate::ApplicationDecided, outcome.decided_step, vec![owner.clone()])
                }
                _ => continue,
            };

            for recipient in recipients {
                let notification = Notification {
                    template,
                    recipient_email: recipient.email.clone(),
                    recipient_name: recipient.name.clone(),
                    applicant_name: owner.name.clone(),
                    kind: outcome.state.kind,
                    entity_id: outcome.state.entity_id.clone(),
                    reference: subject.reference.clone(),
                    status: outcome.to,
                    step,
                    amount: subject.amount,
                    notes: notes.clone(),
                };
                self.mailer.send(&notification).await;
            }
        }
    }

    async fn staff_with(&self, users: &SqlUserRepository, role: Role, owner: &User) -> Vec<User> {
        match users.list_by_role(role).await {
            Ok(found) => found.into_iter().filter(|user| user.id != owner.id).collect(),
            Err(error) => {
                warn!(
                    event_name = "workflow.notify.recipients_unavailable",
                    role = role.as_str(),
                    error = %error,
                    "notification recipients could not be loaded"
                );
                Vec::new()
            }
        }
    }
}

fn storage(error: sqlx::Error) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn missing(kind: WorkflowKind, id: &str) -> ApplicationError {
    DomainError::NotFound { entity: kind.label(), id: id.to_string() }.into()
}

async fn describe(
    conn: &mut SqliteConnection,
    kind: WorkflowKind,
    id: &str,
) -> Result<Subject, RepositoryError> {
    let subject = match kind {
        WorkflowKind::Loan => loan::find(conn, &LoanId(id.to_string())).await?.map(|loan| Subject {
            reference: loan.loan_number,
            amount: Some(loan.amount),
        }),
        WorkflowKind::Deposit => deposit::find(conn, &DepositId(id.to_string())).await?.map(
            |deposit| Subject {
                reference: deposit.deposit_number,
                amount: Some(deposit.monthly_amount),
            },
        ),
        WorkflowKind::SavingsWithdrawal => withdrawal::find(conn, &WithdrawalId(id.to_string()))
            .await?
            .map(|withdrawal| Subject {
                reference: withdrawal.withdrawal_number,
                amount: Some(withdrawal.amount),
            }),
        WorkflowKind::MemberApplication => {
            membership::find(conn, &MemberApplicationId(id.to_string())).await?.map(
                |application| Subject {
                    reference: application.employee.employee_number,
                    amount: None,
                },
            )
        }
        WorkflowKind::LoanRepayment => repayment::find(conn, &RepaymentId(id.to_string()))
            .await?
            .map(|repayment| Subject {
                reference: repayment.repayment_number,
                amount: Some(repayment.amount),
            }),
    };
    Ok(subject.unwrap_or_else(|| Subject { reference: id.to_string(), amount: None }))
}

/// Performs one non-notification action inside the transition's transaction.
async fn apply_effect(
    conn: &mut SqliteConnection,
    action: &WorkflowAction,
    outcome: &TransitionOutcome,
    cooperative: &CooperativeSettings,
    actor: &Actor,
    correlation_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<AuditEvent>, ApplicationError> {
    let kind = outcome.state.kind;
    let id = outcome.state.entity_id.as_str();
    let event = |event_type: &str, category: AuditCategory| {
        AuditEvent::new(
            Some(kind.as_str().to_string()),
            Some(id.to_string()),
            correlation_id,
            event_type,
            category,
            actor.user_id.0.clone(),
            AuditOutcome::Success,
        )
    };

    match action {
        WorkflowAction::RecordLoanDisbursement => {
            loan::record_disbursement(conn, &LoanId(id.to_string()), &actor.user_id, now)
                .await
                .map_err(persistence)?;
            Ok(Some(event("loan.disbursed", AuditCategory::Ledger)))
        }
        WorkflowAction::PostWithdrawalDebit => {
            let request = withdrawal::find(conn, &WithdrawalId(id.to_string()))
                .await
                .map_err(persistence)?
                .ok_or_else(|| missing(kind, id))?;
            let entry = savings::post(
                conn,
                &request.user_id,
                LedgerPosting::debit(
                    SavingsType::Sukarela,
                    request.amount,
                    format!("Penarikan {}", request.withdrawal_number),
                )
                .referencing(kind.as_str(), id),
                now,
            )
            .await
            .map_err(posting)?;
            withdrawal::record_disbursement(conn, &request.id, &actor.user_id, now)
                .await
                .map_err(persistence)?;
            Ok(Some(
                event("ledger.withdrawal_debited", AuditCategory::Ledger)
                    .with_metadata("amount", entry.amount.to_string())
                    .with_metadata("balance_after", entry.balance_after.to_string()),
            ))
        }
        // Nothing to write: `PayrollService::process` collects APPROVED deposits.
        WorkflowAction::EnrollPayrollDeduction => {
            Ok(Some(event("payroll.deduction_enrolled", AuditCategory::Payroll)))
        }
        WorkflowAction::ActivateMembership => {
            activate_membership(conn, id, cooperative, now).await?;
            Ok(Some(event("membership.activated", AuditCategory::Workflow)))
        }
        WorkflowAction::SettleLoan => {
            let (settled, amount) = settle_loan(conn, id, now).await?;
            Ok(Some(
                event("loan.settled", AuditCategory::Ledger)
                    .with_metadata("loan_id", settled.0)
                    .with_metadata("amount", amount.to_string()),
            ))
        }
        WorkflowAction::NotifyApprovers(_)
        | WorkflowAction::NotifyApplicant
        | WorkflowAction::NotifyDisbursement => Ok(None),
    }
}

/// Turns an approved application into an employee record, a member flag and
/// a savings account holding the simpanan pokok.
async fn activate_membership(
    conn: &mut SqliteConnection,
    id: &str,
    cooperative: &CooperativeSettings,
    now: DateTime<Utc>,
) -> Result<(), ApplicationError> {
    let application = membership::find(conn, &MemberApplicationId(id.to_string()))
        .await
        .map_err(persistence)?
        .ok_or_else(|| missing(WorkflowKind::MemberApplication, id))?;
    let details = &application.employee;

    let employee_id =
        match organization::find_employee_by_number(conn, &details.employee_number)
            .await
            .map_err(persistence)?
        {
            Some(existing) => existing.id,
            None => {
                let employee = Employee {
                    id: new_id(),
                    employee_number: details.employee_number.clone(),
                    full_name: details.full_name.clone(),
                    department_id: details.department_id.clone(),
                    golongan_id: details.golongan_id.clone(),
                    employee_type: details.employee_type.clone(),
                    phone: Some(details.phone.clone()),
                    bank_account_number: Some(details.bank_account_number.clone()),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                };
                organization::save_employee(conn, &employee).await.map_err(persistence)?;
                employee.id
            }
        };

    user::mark_member(conn, &application.user_id, &employee_id, now)
        .await
        .map_err(persistence)?;

    let account = match savings::find_by_user(conn, &application.user_id)
        .await
        .map_err(persistence)?
    {
        Some(account) => account,
        None => savings::open_account(conn, &application.user_id, &reference_number("KOP", now), now)
            .await
            .map_err(persistence)?,
    };

    if cooperative.simpanan_pokok_amount > Decimal::ZERO && account.balances.pokok.is_zero() {
        savings::post(
            conn,
            &application.user_id,
            LedgerPosting::credit(
                SavingsType::Pokok,
                cooperative.simpanan_pokok_amount,
                "Simpanan pokok",
            )
            .referencing(WorkflowKind::MemberApplication.as_str(), id),
            now,
        )
        .await
        .map_err(posting)?;
    }
    Ok(())
}

/// Closes the loan an approved early settlement refers to. The amount is
/// re-read from the loan so installments collected since the draft count.
async fn settle_loan(
    conn: &mut SqliteConnection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(LoanId, Decimal), ApplicationError> {
    let request = repayment::find(conn, &RepaymentId(id.to_string()))
        .await
        .map_err(persistence)?
        .ok_or_else(|| missing(WorkflowKind::LoanRepayment, id))?;
    let settled = loan::find(conn, &request.loan_id)
        .await
        .map_err(persistence)?
        .ok_or_else(|| missing(WorkflowKind::Loan, &request.loan_id.0))?;

    let amount = settlement_amount(&settled, &request.user_id)?;
    if amount != request.amount {
        let repriced = LoanRepayment { amount, updated_at: now, ..request };
        repayment::save(conn, &repriced).await.map_err(persistence)?;
    }

    loan::settle(conn, &settled, now).await.map_err(persistence)?;
    workflow::set_status(conn, WorkflowKind::Loan, &settled.id.0, ApplicationStatus::Completed, now)
        .await
        .map_err(persistence)?;
    Ok((settled.id, amount))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use koperasi_core::domain::loan::LoanId;
    use koperasi_core::domain::repayment::RepaymentId;
    use koperasi_core::domain::user::{Role, UserId};
    use koperasi_core::domain::withdrawal::{SavingsWithdrawal, WithdrawalId};
    use koperasi_core::errors::{ApplicationError, DomainError};
    use koperasi_core::pagination::PageRequest;
    use koperasi_core::validation::Locale;
    use koperasi_core::workflow::{
        Actor, ApplicationStatus, ApprovalStep, WorkflowCommand, WorkflowError, WorkflowKind,
    };
    use koperasi_db::repositories::{
        audit, loan, repayment, savings, withdrawal, workflow, EmailRepository,
        SqlEmailRepository, SqlUserRepository, UserRepository,
    };

    use crate::services::payroll::PayrollService;
    use crate::state::AppState;
    use crate::test_support::{draft_repayment, seeded_state};

    fn actor(id: &str, role: Role) -> Actor {
        Actor::new(id, vec![Role::Employee, role])
    }

    fn member() -> Actor {
        Actor::new("seed-member", vec![Role::Employee])
    }

    async fn sukarela(state: &AppState) -> Decimal {
        let mut conn = state.db_pool.acquire().await.expect("conn");
        savings::find_by_user(&mut conn, &UserId("seed-member".to_string()))
            .await
            .expect("account")
            .expect("exists")
            .balances
            .sukarela
    }

    async fn draft_withdrawal(state: &AppState, id: &str, amount: i64) {
        let now = Utc::now();
        let mut conn = state.db_pool.acquire().await.expect("conn");
        withdrawal::save(
            &mut conn,
            &SavingsWithdrawal {
                id: WithdrawalId(id.to_string()),
                withdrawal_number: format!("WD-{id}"),
                user_id: UserId("seed-member".to_string()),
                amount: Decimal::new(amount, 0),
                bank_account_number: "1000000007".to_string(),
                reason: None,
                status: ApplicationStatus::Draft,
                current_step: None,
                disbursed_at: None,
                disbursed_by: None,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("save withdrawal");
    }

    async fn run_to_disbursement(state: &AppState, kind: WorkflowKind, id: &str) {
        let service = state.workflow();
        service.transition(kind, id, WorkflowCommand::Submit, &member(), "t").await.expect("submit");
        for approver in [
            actor("seed-dsp", Role::DivisiSimpanPinjam),
            actor("seed-ketua", Role::Ketua),
        ] {
            service
                .transition(kind, id, WorkflowCommand::Approve { notes: None }, &approver, "t")
                .await
                .expect("approve");
        }
    }

    #[tokio::test]
    async fn final_loan_approval_waits_for_disbursement_and_notifies_bendahara() {
        let state = seeded_state().await;
        let service = state.workflow();

        let (outcome, delivery) = service
            .commit(
                WorkflowKind::Loan,
                "ln-seed-review",
                WorkflowCommand::Approve { notes: Some("Disetujui".to_string()) },
                &actor("seed-ketua", Role::Ketua),
                "corr-1",
            )
            .await
            .expect("approve");
        assert_eq!(outcome.to, ApplicationStatus::ApprovedPendingDisbursement);
        assert_eq!(outcome.decided_step, Some(ApprovalStep::Ketua));
        service.deliver(delivery).await;

        let emails = SqlEmailRepository::new(state.db_pool.clone());
        let (logs, _) = emails.list_logs(&PageRequest::default()).await.expect("logs");
        assert!(logs.iter().any(|log| log.template == "disbursement_requested"
            && log.recipient == "bendahara@koperasi.test"));
        assert!(logs
            .iter()
            .any(|log| log.template == "application_decided" && log.recipient == "anggota@koperasi.test"));

        let disbursed = service
            .transition(
                WorkflowKind::Loan,
                "ln-seed-review",
                WorkflowCommand::Disburse,
                &actor("seed-bendahara", Role::Bendahara),
                "corr-2",
            )
            .await
            .expect("disburse");
        assert_eq!(disbursed.to, ApplicationStatus::Disbursed);

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let stored = loan::find(&mut conn, &LoanId("ln-seed-review".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, ApplicationStatus::Disbursed);
        assert_eq!(stored.disbursed_by, Some(UserId("seed-bendahara".to_string())));

        let events = audit::event_types_for_entity(&mut conn, "LOAN", "ln-seed-review")
            .await
            .expect("events");
        assert!(events.iter().any(|event| event == "loan.disbursed"));
    }

    #[tokio::test]
    async fn notifications_are_sent_after_the_command_returns() {
        let state = seeded_state().await;
        let outcome = state
            .workflow()
            .transition(
                WorkflowKind::MemberApplication,
                "ma-seed-pending",
                WorkflowCommand::Approve { notes: None },
                &actor("seed-dsp", Role::DivisiSimpanPinjam),
                "corr-10",
            )
            .await
            .expect("approve");
        assert_eq!(outcome.to, ApplicationStatus::UnderReview(ApprovalStep::Ketua));

        let emails = SqlEmailRepository::new(state.db_pool.clone());
        let mut delivered = false;
        for _ in 0..50 {
            let (logs, _) = emails.list_logs(&PageRequest::default()).await.expect("logs");
            if logs.iter().any(|log| {
                log.template == "approval_requested" && log.recipient == "ketua@koperasi.test"
            }) {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "KETUA should be asked to review");
    }

    #[tokio::test]
    async fn wrong_level_is_refused_and_the_refusal_is_audited() {
        let state = seeded_state().await;
        let error = state
            .workflow()
            .transition(
                WorkflowKind::Loan,
                "ln-seed-review",
                WorkflowCommand::Approve { notes: None },
                &actor("seed-dsp", Role::DivisiSimpanPinjam),
                "corr-3",
            )
            .await
            .expect_err("DSP cannot decide the KETUA step");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::NotAuthorized { .. }))
        ));

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let stored = loan::find(&mut conn, &LoanId("ln-seed-review".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, ApplicationStatus::UnderReview(ApprovalStep::Ketua));

        let events = audit::event_types_for_entity(&mut conn, "LOAN", "ln-seed-review")
            .await
            .expect("events");
        assert!(events.iter().any(|event| event == "workflow.transition_rejected"));
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let state = seeded_state().await;
        let error = state
            .workflow()
            .transition(
                WorkflowKind::Deposit,
                "dp-missing",
                WorkflowCommand::Submit,
                &member(),
                "corr-4",
            )
            .await
            .expect_err("missing");
        assert!(matches!(error, ApplicationError::Domain(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn approved_membership_activates_member_with_simpanan_pokok() {
        let state = seeded_state().await;
        let service = state.workflow();
        for approver in [
            actor("seed-dsp", Role::DivisiSimpanPinjam),
            actor("seed-ketua", Role::Ketua),
        ] {
            service
                .transition(
                    WorkflowKind::MemberApplication,
                    "ma-seed-pending",
                    WorkflowCommand::Approve { notes: None },
                    &approver,
                    "corr-5",
                )
                .await
                .expect("approve");
        }

        let users = SqlUserRepository::new(state.db_pool.clone());
        let applicant = users
            .find_by_id(&UserId("seed-applicant".to_string()))
            .await
            .expect("load")
            .expect("exists");
        assert!(applicant.is_member && applicant.is_verified);
        assert!(applicant.employee_id.is_some());

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let account = savings::find_by_user(&mut conn, &applicant.id)
            .await
            .expect("account")
            .expect("opened");
        assert_eq!(account.balances.pokok, Decimal::new(100_000, 0));
        assert!(account.account_number.starts_with("KOP-"));
    }

    #[tokio::test]
    async fn disbursed_withdrawal_debits_sukarela() {
        let state = seeded_state().await;
        draft_withdrawal(&state, "wd-ok", 400_000).await;
        run_to_disbursement(&state, WorkflowKind::SavingsWithdrawal, "wd-ok").await;

        let outcome = state
            .workflow()
            .transition(
                WorkflowKind::SavingsWithdrawal,
                "wd-ok",
                WorkflowCommand::Disburse,
                &actor("seed-bendahara", Role::Bendahara),
                "corr-6",
            )
            .await
            .expect("disburse");
        assert_eq!(outcome.to, ApplicationStatus::Completed);
        assert_eq!(sukarela(&state).await, Decimal::new(1_100_000, 0));
    }

    #[tokio::test]
    async fn withdrawal_larger_than_balance_fails_without_side_effects() {
        let state = seeded_state().await;
        draft_withdrawal(&state, "wd-big", 2_000_000).await;
        run_to_disbursement(&state, WorkflowKind::SavingsWithdrawal, "wd-big").await;

        let error = state
            .workflow()
            .transition(
                WorkflowKind::SavingsWithdrawal,
                "wd-big",
                WorkflowCommand::Disburse,
                &actor("seed-bendahara", Role::Bendahara),
                "corr-7",
            )
            .await
            .expect_err("insufficient balance");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Ledger(_))));
        assert_eq!(sukarela(&state).await, Decimal::new(1_500_000, 0));

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let stored = withdrawal::find(&mut conn, &WithdrawalId("wd-big".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, ApplicationStatus::ApprovedPendingDisbursement);
    }

    #[tokio::test]
    async fn approved_repayment_settles_the_loan() {
        let state = seeded_state().await;
        draft_repayment(&state, "rp-1", "ln-seed-disbursed", 2_120_000).await;
        run_to_disbursement(&state, WorkflowKind::LoanRepayment, "rp-1").await;

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let settled = loan::find(&mut conn, &LoanId("ln-seed-disbursed".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(settled.status, ApplicationStatus::Completed);
        assert_eq!(settled.installments_paid, settled.tenor_months);
        assert_eq!(settled.paid_amount, settled.total_repayable);
    }

    #[tokio::test]
    async fn settlement_is_repriced_when_payroll_collected_since_the_draft() {
        let state = seeded_state().await;
        draft_repayment(&state, "rp-stale", "ln-seed-disbursed", 2_120_000).await;

        let payroll = PayrollService::new(state.db_pool.clone());
        let period = payroll.create_period(3, 2026, Locale::Id).await.expect("period");
        let run = payroll
            .process(&period.id, &UserId("seed-payroll".to_string()), "corr-9")
            .await
            .expect("process");
        assert_eq!(run.summary.loan_total, Decimal::new(530_000, 0));

        run_to_disbursement(&state, WorkflowKind::LoanRepayment, "rp-stale").await;

        let mut conn = state.db_pool.acquire().await.expect("conn");
        let settlement = repayment::find(&mut conn, &RepaymentId("rp-stale".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(settlement.status, ApplicationStatus::Approved);
        assert_eq!(settlement.amount, Decimal::new(1_590_000, 0));

        let settled = loan::find(&mut conn, &LoanId("ln-seed-disbursed".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(settled.status, ApplicationStatus::Completed);
        assert_eq!(settled.paid_amount, settled.total_repayable);
    }

    #[tokio::test]
    async fn settlement_of_a_loan_already_paid_off_is_refused() {
        let state = seeded_state().await;
        draft_repayment(&state, "rp-late", "ln-seed-disbursed", 2_120_000).await;
        let service = state.workflow();
        service
            .transition(WorkflowKind::LoanRepayment, "rp-late", WorkflowCommand::Submit, &member(), "t")
            .await
            .expect("submit");
        service
            .transition(
                WorkflowKind::LoanRepayment,
                "rp-late",
                WorkflowCommand::Approve { notes: None },
                &actor("seed-dsp", Role::DivisiSimpanPinjam),
                "t",
            )
            .await
            .expect("dsp approves");

        {
            let mut conn = state.db_pool.acquire().await.expect("conn");
            let current = loan::find(&mut conn, &LoanId("ln-seed-disbursed".to_string()))
                .await
                .expect("find")
                .expect("exists");
            loan::settle(&mut conn, &current, Utc::now()).await.expect("paid off");
            workflow::set_status(
                &mut conn,
                WorkflowKind::Loan,
                "ln-seed-disbursed",
                ApplicationStatus::Completed,
                Utc::now(),
            )
            .await
            .expect("complete");
        }

        let error = service
            .transition(
                WorkflowKind::LoanRepayment,
                "rp-late",
                WorkflowCommand::Approve { notes: None },
                &actor("seed-ketua", Role::Ketua),
                "t",
            )
            .await
            .expect_err("nothing left to settle");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));

        let rejected = service
            .transition(
                WorkflowKind::LoanRepayment,
                "rp-late",
                WorkflowCommand::Reject { notes: Some("Pinjaman sudah lunas".to_string()) },
                &actor("seed-ketua", Role::Ketua),
                "t",
            )
            .await
            .expect("ketua can still close it");
        assert_eq!(rejected.to, ApplicationStatus::Rejected);
    }

    #[tokio::test]
    async fn bulk_decisions_report_each_item() {
        let state = seeded_state().await;
        let results = state
            .workflow()
            .bulk_decide(
                WorkflowKind::Loan,
                &["ln-seed-review".to_string(), "ln-missing".to_string()],
                false,
                Some("Dokumen kurang".to_string()),
                &actor("seed-ketua", Role::Ketua),
                "corr-8",
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].status, Some(ApplicationStatus::Rejected));
        assert!(!results[1].success);
        assert!(results[1].error.is_some());
    }
}
