//! Persistence for the shared approval workflow.
//!
//! Every approvable table carries `user_id`, `status` and `current_step`; the
//! approval trail of all of them lives in `workflow_approval`, keyed by
//! `(entity_kind, entity_id, sequence)`. The engine decides, this module only
//! loads and stores its state.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::user::UserId;
use koperasi_core::workflow::{
    ApplicationStatus, ApprovalRecord, ApprovalStep, Decision, WorkflowKind, WorkflowState,
};

use super::{column, current_step, optional_timestamp, parsed, status, unsigned, RepositoryError};

pub fn table_for(kind: WorkflowKind) -> &'static str {
    match kind {
        WorkflowKind::Loan => "loan",
        WorkflowKind::Deposit => "deposit",
        WorkflowKind::SavingsWithdrawal => "savings_withdrawal",
        WorkflowKind::MemberApplication => "member_application",
        WorkflowKind::LoanRepayment => "loan_repayment",
    }
}

fn row_to_record(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let decided_by: Option<String> = column(row, "decided_by")?;
    Ok(ApprovalRecord {
        sequence: unsigned(row, "sequence")?,
        step: parsed(row, "step", ApprovalStep::parse)?,
        decision: parsed(row, "decision", Decision::parse)?,
        decided_by: decided_by.map(UserId),
        decided_at: optional_timestamp(row, "decided_at")?,
        notes: column(row, "notes")?,
    })
}

pub async fn load_approvals(
    conn: &mut SqliteConnection,
    kind: WorkflowKind,
    entity_id: &str,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT sequence, step, decision, decided_by, decided_at, notes
         FROM workflow_approval
         WHERE entity_kind = ? AND entity_id = ?
         ORDER BY sequence ASC",
    )
    .bind(kind.as_str())
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_record).collect()
}

pub async fn load_state(
    conn: &mut SqliteConnection,
    kind: WorkflowKind,
    entity_id: &str,
) -> Result<Option<WorkflowState>, RepositoryError> {
    let sql = format!("SELECT user_id, status, current_step FROM {} WHERE id = ?", table_for(kind));
    let Some(row) = sqlx::query(&sql).bind(entity_id).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };

    let owner: String = column(&row, "user_id")?;
    let approvals = load_approvals(conn, kind, entity_id).await?;
    Ok(Some(WorkflowState {
        kind,
        entity_id: entity_id.to_string(),
        owner_id: UserId(owner),
        status: status(&row)?,
        current_step: current_step(&row)?,
        approvals,
    }))
}

/// Writes status, current step and the approval trail. Decided rows are
/// never overwritten; a stale write surfaces as zero affected rows.
pub async fn save_state(
    conn: &mut SqliteConnection,
    state: &WorkflowState,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let sql = format!(
        "UPDATE {} SET status = ?, current_step = ?, updated_at = ? WHERE id = ?",
        table_for(state.kind)
    );
    sqlx::query(&sql)
        .bind(state.status.to_string())
        .bind(state.current_step.map(|step| step.as_str()))
        .bind(now.to_rfc3339())
        .bind(&state.entity_id)
        .execute(&mut *conn)
        .await?;

    for record in &state.approvals {
        sqlx::query(
            "INSERT INTO workflow_approval (entity_kind, entity_id, sequence, step, decision,
                                            decided_by, decided_at, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_kind, entity_id, sequence) DO UPDATE SET
                 decision = excluded.decision,
                 decided_by = excluded.decided_by,
                 decided_at = excluded.decided_at,
                 notes = excluded.notes
             WHERE workflow_approval.decision = 'PENDING'",
        )
        .bind(state.kind.as_str())
        .bind(&state.entity_id)
        .bind(i64::from(record.sequence))
        .bind(record.step.as_str())
        .bind(record.decision.as_str())
        .bind(record.decided_by.as_ref().map(|user| user.0.as_str()))
        .bind(record.decided_at.map(|at| at.to_rfc3339()))
        .bind(&record.notes)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Post-approval lifecycle moves (ACTIVE, COMPLETED) that are not engine commands.
pub async fn set_status(
    conn: &mut SqliteConnection,
    kind: WorkflowKind,
    entity_id: &str,
    next: ApplicationStatus,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let sql = format!(
        "UPDATE {} SET status = ?, current_step = NULL, updated_at = ? WHERE id = ?",
        table_for(kind)
    );
    sqlx::query(&sql)
        .bind(next.to_string())
        .bind(now.to_rfc3339())
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
