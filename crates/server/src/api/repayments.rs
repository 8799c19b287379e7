//! `/loan-repayments`: early settlement of a disbursed loan.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::domain::loan::LoanId;
use koperasi_core::domain::repayment::{settlement_amount, LoanRepayment, RepaymentId};
use koperasi_core::domain::user::UserId;
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::pagination::{PageRequest, SortColumn, CREATED_AT};
use koperasi_core::validation::Validator;
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{loan, repayment, ApplicationFilter, RepositoryError};

use crate::api::locale;
use crate::api::workflow::{workflow_routes, Approvable};
use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

#[async_trait]
impl Approvable for LoanRepayment {
    const KIND: WorkflowKind = WorkflowKind::LoanRepayment;
    const SORT: &'static [SortColumn] = &[
        CREATED_AT,
        SortColumn { key: "amount", column: "amount" },
        SortColumn { key: "repaymentNumber", column: "repayment_number" },
        SortColumn { key: "status", column: "status" },
    ];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError> {
        repayment::find(conn, &RepaymentId(id.to_string())).await
    }

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError> {
        repayment::list(conn, filter, page).await
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create)).merge(workflow_routes::<LoanRepayment>())
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentRequest {
    pub loan_id: String,
}

/// Drafts a settlement for the whole outstanding balance.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RepaymentRequest>,
) -> Result<(StatusCode, Json<LoanRepayment>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    Validator::new(locale(&state, &headers)).required("loanId", &request.loan_id).finish()?;

    let mut conn = state.db_pool.acquire().await?;
    let loan_id = LoanId(request.loan_id.trim().to_string());
    let settled = loan::find(&mut conn, &loan_id)
        .await?
        .ok_or_else(|| ApiError::not_found(WorkflowKind::Loan.label(), &loan_id.0))?;
    let amount = settlement_amount(&settled, session.user_id())?;

    if let Some(open) = repayment::find_open_for_loan(&mut conn, &loan_id).await? {
        return Err(ApiError::conflict(format!(
            "loan `{}` already has repayment `{}` in progress",
            settled.loan_number, open.repayment_number
        )));
    }

    let now = Utc::now();
    let created = LoanRepayment {
        id: RepaymentId(new_id()),
        repayment_number: reference_number("RP", now),
        loan_id,
        user_id: session.user_id().clone(),
        amount,
        status: ApplicationStatus::Draft,
        current_step: None,
        created_at: now,
        updated_at: now,
    };
    repayment::save(&mut conn, &created).await?;
    info!(
        event_name = "repayment.draft_created",
        entity_id = %created.id.0,
        loan_id = %created.loan_id.0,
        amount = %created.amount,
        "loan repayment draft created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::Json;
    use rust_decimal::Decimal;

    use koperasi_core::domain::repayment::LoanRepayment;
    use koperasi_core::workflow::ApplicationStatus;

    use super::{create, RepaymentRequest};
    use crate::api::workflow::{reject, submit};
    use crate::test_support::{headers_for, seeded_state};

    fn request(loan_id: &str) -> Json<RepaymentRequest> {
        Json(RepaymentRequest { loan_id: loan_id.to_string() })
    }

    #[tokio::test]
    async fn settlement_covers_the_outstanding_balance_once() {
        let state = seeded_state().await;
        let member = headers_for(&state, "seed-member").await;

        let (status, Json(created)) =
            create(State(state.clone()), member.clone(), request("ln-seed-disbursed"))
                .await
                .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.amount, Decimal::new(2_120_000, 0));

        let error = create(State(state.clone()), member.clone(), request("ln-seed-disbursed"))
            .await
            .expect_err("one open repayment per loan");
        assert_eq!(error.status(), StatusCode::CONFLICT);

        submit::<LoanRepayment>(State(state.clone()), member.clone(), Path(created.id.0.clone()))
            .await
            .expect("submit");
        let dsp = headers_for(&state, "seed-dsp").await;
        let Json(rejected) = reject::<LoanRepayment>(
            State(state.clone()),
            dsp,
            Path(created.id.0),
            Bytes::from_static(br#"{"notes":"Saldo belum cukup"}"#),
        )
        .await
        .expect("reject");
        assert_eq!(rejected.entity.status, ApplicationStatus::Rejected);
        assert_eq!(rejected.approvals[0].notes.as_deref(), Some("Saldo belum cukup"));

        create(State(state), member, request("ln-seed-disbursed"))
            .await
            .expect("a rejected repayment no longer blocks");
    }

    #[tokio::test]
    async fn only_disbursed_loans_of_the_owner_can_be_settled() {
        let state = seeded_state().await;

        let member = headers_for(&state, "seed-member").await;
        let error = create(State(state.clone()), member, request("ln-seed-review"))
            .await
            .expect_err("not disbursed");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let other = headers_for(&state, "seed-dsp").await;
        let error = create(State(state.clone()), other.clone(), request("ln-seed-disbursed"))
            .await
            .expect_err("someone else's loan");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);

        let error = create(State(state), other, request("ln-missing"))
            .await
            .expect_err("unknown loan");
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
