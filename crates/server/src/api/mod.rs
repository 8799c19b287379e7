//! JSON REST surface mounted under `/api/v1`.

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use koperasi_core::validation::Locale;
use koperasi_core::workflow::ApplicationStatus;

use crate::error::ApiError;
use crate::state::AppState;
use crate::{auth, health};

pub mod deposits;
pub mod email;
pub mod loans;
pub mod membership;
pub mod organization;
pub mod payroll;
pub mod repayments;
pub mod savings;
pub mod settings;
pub mod users;
pub mod withdrawals;
pub mod workflow;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/auth", auth::routes())
        .nest("/users", users::routes())
        .nest("/employees", organization::employee_routes())
        .nest("/departments", organization::department_routes())
        .nest("/golongan", organization::golongan_routes())
        .nest("/levels", organization::level_routes())
        .nest("/loans", loans::routes())
        .nest("/loan-repayments", repayments::routes())
        .nest("/deposits", deposits::routes())
        .nest("/deposit-options", deposits::option_routes())
        .nest("/savings-withdrawals", withdrawals::routes())
        .nest("/member-applications", membership::routes())
        .nest("/savings", savings::routes())
        .nest("/payroll", payroll::routes())
        .nest("/settings", settings::routes())
        .nest("/email-configs", email::config_routes())
        .nest("/email-logs", email::log_routes());

    let db_pool = state.db_pool.clone();
    Router::new().nest("/api/v1", api).with_state(state).merge(health::router(db_pool))
}

/// `Accept-Language` wins over the configured default when it names a
/// supported locale.
pub fn locale(state: &AppState, headers: &HeaderMap) -> Locale {
    headers
        .get(axum::http::header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value.split(',').find_map(|tag| {
                let tag = tag.split(';').next().unwrap_or_default().trim();
                Locale::parse(tag)
                    .or_else(|| tag.split('-').next().and_then(Locale::parse))
            })
        })
        .unwrap_or(state.locale)
}

/// Caller-supplied correlation id, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// JSON body that may be omitted entirely; an empty body means defaults.
pub fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| ApiError::invalid(format!("malformed request body: {error}")))
}

/// `?status=` on list endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

impl StatusFilter {
    pub fn parse(&self) -> Result<Option<ApplicationStatus>, ApiError> {
        match self.status.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(None),
            Some(raw) => ApplicationStatus::parse(raw)
                .map(Some)
                .ok_or_else(|| ApiError::invalid(format!("unknown status `{raw}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use axum::http::{HeaderMap, HeaderValue};

    use koperasi_core::validation::Locale;
    use koperasi_core::workflow::{ApplicationStatus, ApprovalStep};

    use super::{correlation_id, locale, optional_body, StatusFilter, CORRELATION_HEADER};
    use crate::api::workflow::DecisionRequest;
    use crate::test_support::seeded_state;

    #[tokio::test]
    async fn accept_language_selects_a_supported_locale() {
        let state = seeded_state().await;
        let mut headers = HeaderMap::new();
        assert_eq!(locale(&state, &headers), Locale::Id);

        headers.insert("accept-language", HeaderValue::from_static("fr-FR, en-US;q=0.8"));
        assert_eq!(locale(&state, &headers), Locale::En);
    }

    #[test]
    fn correlation_id_is_propagated_or_generated() {
        let mut headers = HeaderMap::new();
        assert_eq!(correlation_id(&headers).len(), 36);

        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("req-42"));
        assert_eq!(correlation_id(&headers), "req-42");
    }

    #[test]
    fn omitted_body_falls_back_to_defaults() {
        let empty: DecisionRequest = optional_body(&Bytes::new()).expect("empty body");
        assert_eq!(empty.notes, None);

        let given: DecisionRequest =
            optional_body(&Bytes::from_static(br#"{"notes":"ok"}"#)).expect("json body");
        assert_eq!(given.notes.as_deref(), Some("ok"));

        assert!(optional_body::<DecisionRequest>(&Bytes::from_static(b"{nope")).is_err());
    }

    #[test]
    fn status_filter_accepts_review_steps_and_rejects_unknown_values() {
        let filter = StatusFilter { status: Some("under_review_ketua".to_string()) };
        assert_eq!(
            filter.parse().expect("valid"),
            Some(ApplicationStatus::UnderReview(ApprovalStep::Ketua))
        );
        assert!(StatusFilter { status: Some("PAID".to_string()) }.parse().is_err());
        assert_eq!(StatusFilter::default().parse().expect("empty"), None);
    }

    mod routing {
        use axum::body::{to_bytes, Body};
        use axum::http::{header, Request, StatusCode};
        use serde_json::Value;
        use tower::ServiceExt;

        use koperasi_db::SeedDataset;

        use crate::api::router;
        use crate::test_support::seeded_state;

        async fn json_body(response: axum::response::Response) -> Value {
            let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            serde_json::from_slice(&bytes).expect("json")
        }

        #[tokio::test]
        async fn health_is_served_next_to_the_api() {
            let state = seeded_state().await;
            let response = router(state)
                .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
                .await
                .expect("response");

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await["status"], "ready");
        }

        #[tokio::test]
        async fn protected_routes_require_a_token_and_the_right_role() {
            let state = seeded_state().await;
            let app = router(state);

            let response = app
                .clone()
                .oneshot(Request::get("/api/v1/loans/my").body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let login = format!(
                r#"{{"email":"anggota@koperasi.test","password":"{}"}}"#,
                SeedDataset::DEMO_PASSWORD
            );
            let response = app
                .clone()
                .oneshot(
                    Request::post("/api/v1/auth/login")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(login))
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            let token = json_body(response).await["accessToken"].as_str().expect("token").to_string();

            let response = app
                .clone()
                .oneshot(
                    Request::get("/api/v1/loans/my?page=1&limit=500&sortBy=unknown")
                        .header(header::AUTHORIZATION, format!("Bearer {token}"))
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            let page = json_body(response).await;
            assert_eq!(page["meta"]["total"], 2);
            assert_eq!(page["meta"]["limit"], 100);

            let response = app
                .oneshot(
                    Request::get("/api/v1/loans/pending-approval")
                        .header(header::AUTHORIZATION, format!("Bearer {token}"))
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert_eq!(json_body(response).await["message"][0], "Forbidden resource");
        }

        #[tokio::test]
        async fn approve_accepts_an_omitted_body() {
            let state = seeded_state().await;
            let token = {
                let headers = crate::test_support::headers_for(&state, "seed-ketua").await;
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .expect("bearer")
            };

            let response = router(state)
                .oneshot(
                    Request::post("/api/v1/loans/ln-seed-review/approve")
                        .header(header::AUTHORIZATION, token)
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await["status"], "APPROVED_PENDING_DISBURSEMENT");
        }
    }
}
