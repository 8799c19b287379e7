use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use koperasi_core::domain::loan::LoanId;
use koperasi_core::domain::repayment::{LoanRepayment, RepaymentId};
use koperasi_core::domain::user::UserId;
use koperasi_core::pagination::PageRequest;
use koperasi_core::workflow::{ApplicationStatus, ApprovalStep};

use super::{
    column, current_step, decimal, fetch_page, status, timestamp, ApplicationFilter,
    RepositoryError,
};

const REPAYMENT_COLUMNS: &str = "id, repayment_number, loan_id, user_id, amount, status, \
                                 current_step, created_at, updated_at";

pub async fn save(
    conn: &mut SqliteConnection,
    repayment: &LoanRepayment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO loan_repayment (
            id, repayment_number, loan_id, user_id, amount, status, current_step,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            amount = excluded.amount,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&repayment.id.0)
    .bind(&repayment.repayment_number)
    .bind(&repayment.loan_id.0)
    .bind(&repayment.user_id.0)
    .bind(repayment.amount.to_string())
    .bind(repayment.status.to_string())
    .bind(repayment.current_step.map(|step| step.as_str()))
    .bind(repayment.created_at.to_rfc3339())
    .bind(repayment.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: &RepaymentId,
) -> Result<Option<LoanRepayment>, RepositoryError> {
    let sql = format!("SELECT {REPAYMENT_COLUMNS} FROM loan_repayment WHERE id = ?");
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;
    row.map(|value| repayment_from_row(&value)).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &ApplicationFilter,
    page: &PageRequest,
) -> Result<(Vec<LoanRepayment>, u64), RepositoryError> {
    let (rows, total) =
        fetch_page(conn, "loan_repayment", REPAYMENT_COLUMNS, filter, page).await?;
    let repayments = rows.iter().map(repayment_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((repayments, total))
}

/// The repayment still in flight for `loan_id`, if any. Closed and approved
/// repayments do not block a new request.
pub async fn find_open_for_loan(
    conn: &mut SqliteConnection,
    loan_id: &LoanId,
) -> Result<Option<LoanRepayment>, RepositoryError> {
    let sql = format!(
        "SELECT {REPAYMENT_COLUMNS} FROM loan_repayment
         WHERE loan_id = ? AND status NOT IN (?, ?, ?)
         ORDER BY created_at DESC
         LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(&loan_id.0)
        .bind(ApplicationStatus::Approved.to_string())
        .bind(ApplicationStatus::Rejected.to_string())
        .bind(ApplicationStatus::Cancelled.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|value| repayment_from_row(&value)).transpose()
}

/// Loans whose early settlement is waiting on an approver. Payroll leaves
/// these alone so the settlement amount stays the outstanding balance.
pub async fn loans_in_review(conn: &mut SqliteConnection) -> Result<Vec<LoanId>, RepositoryError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT loan_id FROM loan_repayment WHERE status IN (?, ?, ?, ?) ORDER BY loan_id",
    )
    .bind(ApplicationStatus::Submitted.to_string())
    .bind(ApplicationStatus::UnderReview(ApprovalStep::DivisiSimpanPinjam).to_string())
    .bind(ApplicationStatus::UnderReview(ApprovalStep::Ketua).to_string())
    .bind(ApplicationStatus::UnderReview(ApprovalStep::Pengawas).to_string())
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(LoanId).collect())
}

fn repayment_from_row(row: &SqliteRow) -> Result<LoanRepayment, RepositoryError> {
    Ok(LoanRepayment {
        id: RepaymentId(column(row, "id")?),
        repayment_number: column(row, "repayment_number")?,
        loan_id: LoanId(column(row, "loan_id")?),
        user_id: UserId(column(row, "user_id")?),
        amount: decimal(row, "amount")?,
        status: status(row)?,
        current_step: current_step(row)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use koperasi_core::domain::repayment::{LoanRepayment, RepaymentId};
    use koperasi_core::workflow::{ApplicationStatus, ApprovalStep, WorkflowKind};

    use super::{find, find_open_for_loan, loans_in_review, save};
    use crate::repositories::loan::{self, fixtures::cash_loan};
    use crate::repositories::test_support::{insert_user, setup};
    use crate::repositories::workflow;

    #[tokio::test]
    async fn only_unfinished_repayments_count_as_open() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");

        let loan = cash_loan("ln-1", "u-1", 3_000_000, 6);
        loan::save(&mut conn, &loan).await.expect("loan");

        let now = Utc::now();
        let repayment = LoanRepayment {
            id: RepaymentId("rp-1".to_string()),
            repayment_number: "RP-202601-0001".to_string(),
            loan_id: loan.id.clone(),
            user_id: loan.user_id.clone(),
            amount: loan.outstanding(),
            status: ApplicationStatus::Draft,
            current_step: None,
            created_at: now,
            updated_at: now,
        };
        save(&mut conn, &repayment).await.expect("repayment");
        assert!(find(&mut conn, &repayment.id).await.expect("find").is_some());

        let open = find_open_for_loan(&mut conn, &loan.id).await.expect("open");
        assert_eq!(open.map(|value| value.id), Some(repayment.id.clone()));

        workflow::set_status(&mut conn, WorkflowKind::LoanRepayment, "rp-1", ApplicationStatus::Cancelled, now)
            .await
            .expect("cancel");
        assert!(find_open_for_loan(&mut conn, &loan.id).await.expect("open").is_none());
    }

    #[tokio::test]
    async fn drafts_do_not_hold_back_payroll_but_submissions_do() {
        let pool = setup().await;
        insert_user(&pool, "u-1", &["EMPLOYEE"]).await;
        let mut conn = pool.acquire().await.expect("conn");

        let loan = cash_loan("ln-1", "u-1", 3_000_000, 6);
        loan::save(&mut conn, &loan).await.expect("loan");

        let now = Utc::now();
        let mut repayment = LoanRepayment {
            id: RepaymentId("rp-1".to_string()),
            repayment_number: "RP-202601-0001".to_string(),
            loan_id: loan.id.clone(),
            user_id: loan.user_id.clone(),
            amount: loan.outstanding(),
            status: ApplicationStatus::Draft,
            current_step: None,
            created_at: now,
            updated_at: now,
        };
        save(&mut conn, &repayment).await.expect("draft");
        assert!(loans_in_review(&mut conn).await.expect("in review").is_empty());

        repayment.id = RepaymentId("rp-2".to_string());
        repayment.repayment_number = "RP-202601-0002".to_string();
        repayment.status = ApplicationStatus::UnderReview(ApprovalStep::Ketua);
        repayment.current_step = Some(ApprovalStep::Ketua);
        save(&mut conn, &repayment).await.expect("in review");
        assert_eq!(loans_in_review(&mut conn).await.expect("in review"), vec![loan.id]);
    }
}
