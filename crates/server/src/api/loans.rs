//! `/loans`: drafts, the installment simulator and the shared workflow routes.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use koperasi_core::domain::loan::{InstallmentPlan, Loan, LoanDraft, LoanId};
use koperasi_core::domain::settings::CooperativeSettings;
use koperasi_core::domain::user::UserId;
use koperasi_core::domain::{new_id, reference_number};
use koperasi_core::pagination::{PageRequest, SortColumn, CREATED_AT};
use koperasi_core::validation::{Locale, Validator};
use koperasi_core::workflow::{ApplicationStatus, WorkflowKind};
use koperasi_db::repositories::{loan, organization, settings, ApplicationFilter, RepositoryError};

use crate::api::locale;
use crate::api::workflow::{load_owned_draft, load_with_approvals, workflow_routes, Approvable};
use crate::auth::{authenticate, Session};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[async_trait]
impl Approvable for Loan {
    const KIND: WorkflowKind = WorkflowKind::Loan;
    const SORT: &'static [SortColumn] = &[
        CREATED_AT,
        SortColumn { key: "amount", column: "amount" },
        SortColumn { key: "loanNumber", column: "loan_number" },
        SortColumn { key: "status", column: "status" },
    ];

    async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, RepositoryError> {
        loan::find(conn, &LoanId(id.to_string())).await
    }

    async fn list(
        conn: &mut SqliteConnection,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<(Vec<Self>, u64), RepositoryError> {
        loan::list(conn, filter, page).await
    }

    fn owner(&self) -> &UserId {
        &self.user_id
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/simulate", post(simulate))
        .route("/{id}", put(update))
        .route("/{id}/installments", get(installments))
        .merge(workflow_routes::<Loan>())
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub amount: Decimal,
    pub tenor_months: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentRow {
    pub number: u32,
    pub amount: Decimal,
    pub paid: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentSchedule {
    pub loan_id: LoanId,
    pub plan: InstallmentPlan,
    pub outstanding: Decimal,
    pub installments: Vec<InstallmentRow>,
}

/// Settings and golongan ceiling a draft is checked against.
async fn check_draft(
    state: &AppState,
    session: &Session,
    draft: &LoanDraft,
    locale: Locale,
) -> Result<CooperativeSettings, ApiError> {
    let mut conn = state.db_pool.acquire().await?;
    let cooperative = settings::load(&mut conn).await?;
    let ceiling = organization::loan_ceiling_for_user(&mut conn, &session.user_id().0).await?;
    draft.validate(&cooperative, ceiling, locale)?;
    Ok(cooperative)
}

fn apply_draft(target: &mut Loan, draft: LoanDraft, interest_rate: Decimal) {
    let plan = InstallmentPlan::flat(draft.amount, interest_rate, draft.tenor_months);
    target.loan_type = draft.detail.loan_type();
    target.amount = draft.amount;
    target.tenor_months = draft.tenor_months;
    target.interest_rate = interest_rate;
    target.total_repayable = plan.total;
    target.monthly_installment = plan.monthly;
    target.detail = draft.detail;
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<LoanDraft>,
) -> Result<(StatusCode, Json<Loan>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let cooperative = check_draft(&state, &session, &draft, locale(&state, &headers)).await?;

    let now = Utc::now();
    let plan = InstallmentPlan::flat(draft.amount, cooperative.loan_interest_rate, draft.tenor_months);
    let created = Loan {
        id: LoanId(new_id()),
        loan_number: reference_number("LN", now),
        user_id: session.user_id().clone(),
        loan_type: draft.detail.loan_type(),
        amount: draft.amount,
        tenor_months: draft.tenor_months,
        interest_rate: cooperative.loan_interest_rate,
        total_repayable: plan.total,
        monthly_installment: plan.monthly,
        installments_paid: 0,
        paid_amount: Decimal::ZERO,
        detail: draft.detail,
        status: ApplicationStatus::Draft,
        current_step: None,
        disbursed_at: None,
        disbursed_by: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.db_pool.acquire().await?;
    loan::save(&mut conn, &created).await?;
    info!(
        event_name = "loan.draft_created",
        entity_id = %created.id.0,
        user_id = %created.user_id.0,
        amount = %created.amount,
        "loan draft created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<LoanDraft>,
) -> ApiResult<Loan> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    let mut current = load_owned_draft::<Loan>(&state, &session, &id).await?;
    let cooperative = check_draft(&state, &session, &draft, locale(&state, &headers)).await?;

    apply_draft(&mut current, draft, cooperative.loan_interest_rate);
    current.updated_at = Utc::now();

    let mut conn = state.db_pool.acquire().await?;
    loan::save(&mut conn, &current).await?;
    Ok(Json(current))
}

/// Installment plan for an amount and tenor at the current interest rate.
pub async fn simulate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SimulationRequest>,
) -> ApiResult<InstallmentPlan> {
    authenticate(&state, &headers).await?;
    let mut conn = state.db_pool.acquire().await?;
    let cooperative = settings::load(&mut conn).await?;

    Validator::new(locale(&state, &headers))
        .positive("amount", request.amount)
        .between(
            "tenorMonths",
            request.tenor_months,
            cooperative.loan_min_tenor_months,
            cooperative.loan_max_tenor_months,
        )
        .finish()?;

    Ok(Json(InstallmentPlan::flat(
        request.amount,
        cooperative.loan_interest_rate,
        request.tenor_months,
    )))
}

pub async fn installments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<InstallmentSchedule> {
    let session = authenticate(&state, &headers).await?;
    let found = load_with_approvals::<Loan>(&state, &id).await?.entity;
    session.require_owner_or_staff(&found.user_id)?;

    let plan = found.plan();
    let installments = (1..=plan.tenor_months)
        .filter_map(|number| {
            plan.installment(number).map(|amount| InstallmentRow {
                number,
                amount,
                paid: number <= found.installments_paid,
            })
        })
        .collect();

    Ok(Json(InstallmentSchedule {
        outstanding: found.outstanding(),
        loan_id: found.id,
        plan,
        installments,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use rust_decimal::Decimal;

    use koperasi_core::domain::loan::{Loan, LoanDetail, LoanDraft};
    use koperasi_core::pagination::PageQuery;
    use koperasi_core::workflow::{ApplicationStatus, ApprovalStep};

    use super::{create, installments, simulate, update, SimulationRequest};
    use crate::api::workflow::{approve, get_one, pending, submit};
    use crate::test_support::{headers_for, seeded_state};

    fn rupiah(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    fn cash_draft(amount: i64, tenor_months: u32) -> LoanDraft {
        LoanDraft {
            amount: rupiah(amount),
            tenor_months,
            detail: LoanDetail::CashLoan { purpose: "Renovasi rumah".to_string() },
        }
    }

    #[tokio::test]
    async fn member_drafts_and_submits_a_cash_loan() {
        let state = seeded_state().await;
        let headers = headers_for(&state, "seed-member").await;

        let (status, Json(draft)) =
            create(State(state.clone()), headers.clone(), Json(cash_draft(1_200_000, 12)))
                .await
                .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(draft.status, ApplicationStatus::Draft);
        assert_eq!(draft.total_repayable, rupiah(1_344_000));
        assert_eq!(draft.monthly_installment, rupiah(112_000));
        assert!(draft.loan_number.starts_with("LN-"));

        let Json(submitted) =
            submit::<Loan>(State(state.clone()), headers.clone(), Path(draft.id.0.clone()))
                .await
                .expect("submit");
        assert_eq!(submitted.entity.status, ApplicationStatus::Submitted);
        assert_eq!(submitted.entity.current_step, Some(ApprovalStep::DivisiSimpanPinjam));
        assert_eq!(submitted.approvals.len(), 2);

        let error = update(State(state), headers, Path(draft.id.0), Json(cash_draft(1_000_000, 6)))
            .await
            .expect_err("submitted loans are frozen");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn amount_above_the_golongan_ceiling_is_rejected() {
        let state = seeded_state().await;
        let mut headers = headers_for(&state, "seed-member").await;
        headers.insert("accept-language", "en".parse().expect("header"));

        let error = create(State(state), headers, Json(cash_draft(12_000_000, 12)))
            .await
            .expect_err("over ceiling");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.body().message.len(), 1);
        assert!(error.body().message[0].starts_with("amount"));
    }

    #[tokio::test]
    async fn non_members_and_other_users_are_forbidden() {
        let state = seeded_state().await;
        let applicant = headers_for(&state, "seed-applicant").await;
        let error = create(State(state.clone()), applicant, Json(cash_draft(500_000, 3)))
            .await
            .expect_err("not a member");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.body().message, vec!["Forbidden resource".to_string()]);

        let owner = headers_for(&state, "seed-member").await;
        let (_, Json(draft)) = create(State(state.clone()), owner, Json(cash_draft(500_000, 3)))
            .await
            .expect("create");

        let other = headers_for(&state, "seed-payroll").await;
        let error = update(State(state), other, Path(draft.id.0), Json(cash_draft(600_000, 3)))
            .await
            .expect_err("not the owner");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn simulation_uses_the_configured_rate() {
        let state = seeded_state().await;
        let headers = headers_for(&state, "seed-member").await;

        let Json(plan) = simulate(
            State(state.clone()),
            headers.clone(),
            Json(SimulationRequest { amount: rupiah(1_000_000), tenor_months: 3 }),
        )
        .await
        .expect("simulate");
        assert_eq!(plan.interest_total, rupiah(30_000));
        assert_eq!(plan.monthly, rupiah(343_333));
        assert_eq!(plan.last, rupiah(343_334));

        let error = simulate(
            State(state),
            headers,
            Json(SimulationRequest { amount: rupiah(1_000_000), tenor_months: 60 }),
        )
        .await
        .expect_err("tenor too long");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn installment_schedule_marks_collected_months() {
        let state = seeded_state().await;
        let headers = headers_for(&state, "seed-member").await;

        let Json(schedule) =
            installments(State(state), headers, Path("ln-seed-disbursed".to_string()))
                .await
                .expect("schedule");
        assert_eq!(schedule.installments.len(), 6);
        assert_eq!(schedule.installments.iter().filter(|row| row.paid).count(), 2);
        assert!(schedule.installments.iter().all(|row| row.amount == rupiah(530_000)));
        assert_eq!(schedule.outstanding, rupiah(2_120_000));
    }

    #[tokio::test]
    async fn ketua_sees_the_queue_and_approves_without_a_body() {
        let state = seeded_state().await;
        let ketua = headers_for(&state, "seed-ketua").await;

        let Json(queue) =
            pending::<Loan>(State(state.clone()), ketua.clone(), Query(PageQuery::default()))
                .await
                .expect("queue");
        assert!(queue.data.iter().any(|loan| loan.id.0 == "ln-seed-review"));

        let member = headers_for(&state, "seed-member").await;
        let error = pending::<Loan>(State(state.clone()), member.clone(), Query(PageQuery::default()))
            .await
            .expect_err("no approval level");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);

        let Json(decided) = approve::<Loan>(
            State(state.clone()),
            ketua,
            Path("ln-seed-review".to_string()),
            Bytes::new(),
        )
        .await
        .expect("approve");
        assert_eq!(decided.entity.status, ApplicationStatus::ApprovedPendingDisbursement);
        assert_eq!(decided.entity.current_step, None);

        let Json(seen) = get_one::<Loan>(State(state), member, Path("ln-seed-review".to_string()))
            .await
            .expect("owner view");
        assert_eq!(seen.entity.status, ApplicationStatus::ApprovedPendingDisbursement);
    }
}
