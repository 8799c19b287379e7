//! `/savings`: the buku tabungan view and manual ledger postings.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use koperasi_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use koperasi_core::domain::savings::{
    EntryDirection, LedgerPosting, Passbook, SavingsTransaction, SavingsType,
};
use koperasi_core::domain::user::{Role, UserId};
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn, CREATED_AT};
use koperasi_core::validation::Validator;
use koperasi_db::repositories::{audit, savings};

use crate::api::{correlation_id, locale};
use crate::auth::{authenticate, STAFF_ROLES};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const ENTRY_SORT: &[SortColumn] = &[CREATED_AT, SortColumn { key: "amount", column: "amount" }];

const LEDGER_OFFICERS: &[Role] = &[Role::Bendahara, Role::SuperAdmin];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/my", get(my_passbook))
        .route("/users/{user_id}", get(member_passbook))
        .route("/transactions", post(post_entry))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TypeFilter {
    #[serde(rename = "type")]
    pub savings_type: Option<String>,
}

impl TypeFilter {
    fn parse(&self) -> Result<Option<SavingsType>, ApiError> {
        match self.savings_type.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(None),
            Some(raw) => SavingsType::parse(raw)
                .map(Some)
                .ok_or_else(|| ApiError::invalid(format!("unknown savings type `{raw}`"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingRequest {
    pub user_id: String,
    pub savings_type: SavingsType,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub description: String,
}

async fn passbook(
    state: &AppState,
    owner: &UserId,
    page: &PageQuery,
    filter: &TypeFilter,
) -> Result<Passbook, ApiError> {
    let savings_type = filter.parse()?;
    let request = PageRequest::resolve(page, ENTRY_SORT);
    let mut conn = state.db_pool.acquire().await?;
    let account = savings::find_by_user(&mut conn, owner)
        .await?
        .ok_or_else(|| ApiError::not_found("savings account", &owner.0))?;
    let (entries, total) =
        savings::list_transactions(&mut conn, &account.id, savings_type, &request).await?;

    Ok(Passbook {
        total_balance: account.balances.total(),
        account,
        entries: Paginated::new(entries, total, &request),
    })
}

pub async fn my_passbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TypeFilter>,
) -> ApiResult<Passbook> {
    let session = authenticate(&state, &headers).await?;
    session.require_member()?;
    Ok(Json(passbook(&state, session.user_id(), &page, &filter).await?))
}

pub async fn member_passbook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TypeFilter>,
) -> ApiResult<Passbook> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(STAFF_ROLES)?;
    Ok(Json(passbook(&state, &UserId(user_id), &page, &filter).await?))
}

/// Manual credit or debit, e.g. a cash deposit into sukarela.
pub async fn post_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PostingRequest>,
) -> Result<(StatusCode, Json<SavingsTransaction>), ApiError> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(LEDGER_OFFICERS)?;
    Validator::new(locale(&state, &headers))
        .required("userId", &request.user_id)
        .positive("amount", request.amount)
        .required("description", &request.description)
        .max_length("description", &request.description, 200)
        .finish()?;

    let owner = UserId(request.user_id.trim().to_string());
    let posting = LedgerPosting {
        savings_type: request.savings_type,
        direction: request.direction,
        amount: request.amount,
        reference_kind: Some("MANUAL".to_string()),
        reference_id: None,
        description: request.description.trim().to_string(),
    };
    let correlation_id = correlation_id(&headers);

    let mut tx = state.db_pool.begin().await?;
    let entry = savings::post(&mut *tx, &owner, posting, Utc::now()).await?;
    let event = AuditEvent::new(
        Some("SAVINGS_ACCOUNT".to_string()),
        Some(entry.account_id.clone()),
        correlation_id.clone(),
        "ledger.manual_posting",
        AuditCategory::Ledger,
        session.user_id().0.clone(),
        AuditOutcome::Success,
    )
    .with_metadata("savings_type", entry.savings_type.as_str())
    .with_metadata("direction", entry.direction.as_str())
    .with_metadata("amount", entry.amount.to_string());
    audit::insert_events(&mut *tx, &[event]).await?;
    tx.commit().await?;

    info!(
        event_name = "ledger.manual_posting",
        correlation_id = %correlation_id,
        user_id = %owner.0,
        savings_type = entry.savings_type.as_str(),
        amount = %entry.amount,
        balance_after = %entry.balance_after,
        "manual ledger posting recorded"
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use rust_decimal::Decimal;

    use koperasi_core::domain::savings::{EntryDirection, SavingsType};
    use koperasi_core::pagination::PageQuery;

    use super::{member_passbook, my_passbook, post_entry, PostingRequest, TypeFilter};
    use crate::test_support::{headers_for, seeded_state};

    fn posting(direction: EntryDirection, amount: i64) -> Json<PostingRequest> {
        Json(PostingRequest {
            user_id: "seed-member".to_string(),
            savings_type: SavingsType::Sukarela,
            direction,
            amount: Decimal::new(amount, 0),
            description: "Setoran tunai".to_string(),
        })
    }

    #[tokio::test]
    async fn member_reads_their_passbook() {
        let state = seeded_state().await;
        let headers = headers_for(&state, "seed-member").await;

        let Json(book) = my_passbook(
            State(state.clone()),
            headers.clone(),
            Query(PageQuery::default()),
            Query(TypeFilter::default()),
        )
        .await
        .expect("passbook");
        assert_eq!(book.account.balances.sukarela, Decimal::new(1_500_000, 0));
        assert_eq!(book.total_balance, book.account.balances.total());
        assert_eq!(book.entries.meta.total, 4);

        let Json(wajib) = my_passbook(
            State(state.clone()),
            headers.clone(),
            Query(PageQuery::default()),
            Query(TypeFilter { savings_type: Some("wajib".to_string()) }),
        )
        .await
        .expect("wajib only");
        assert!(wajib.entries.data.iter().all(|entry| entry.savings_type == SavingsType::Wajib));

        let error = my_passbook(
            State(state),
            headers,
            Query(PageQuery::default()),
            Query(TypeFilter { savings_type: Some("emas".to_string()) }),
        )
        .await
        .expect_err("unknown type");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn staff_view_other_passbooks_members_do_not() {
        let state = seeded_state().await;
        let bendahara = headers_for(&state, "seed-bendahara").await;
        member_passbook(
            State(state.clone()),
            bendahara,
            Path("seed-member".to_string()),
            Query(PageQuery::default()),
            Query(TypeFilter::default()),
        )
        .await
        .expect("staff view");

        let payroll = headers_for(&state, "seed-payroll").await;
        let error = member_passbook(
            State(state),
            payroll,
            Path("seed-member".to_string()),
            Query(PageQuery::default()),
            Query(TypeFilter::default()),
        )
        .await
        .expect_err("not staff");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn manual_postings_move_the_balance_but_never_below_zero() {
        let state = seeded_state().await;
        let bendahara = headers_for(&state, "seed-bendahara").await;

        let (status, Json(entry)) =
            post_entry(State(state.clone()), bendahara.clone(), posting(EntryDirection::Credit, 250_000))
                .await
                .expect("credit");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry.balance_after, Decimal::new(1_750_000, 0));

        let error =
            post_entry(State(state.clone()), bendahara, posting(EntryDirection::Debit, 2_000_000))
                .await
                .expect_err("overdraft");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let member = headers_for(&state, "seed-member").await;
        let error = post_entry(State(state), member, posting(EntryDirection::Credit, 1_000))
            .await
            .expect_err("members cannot post");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }
}
