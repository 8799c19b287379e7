//! `/settings`: cooperative parameters.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;

use koperasi_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use koperasi_core::domain::settings::SettingEntry;
use koperasi_core::domain::user::Role;
use koperasi_db::repositories::{audit, settings, SettingsRepository, SqlSettingsRepository};

use crate::api::correlation_id;
use crate::auth::authenticate;
use crate::error::ApiResult;
use crate::state::AppState;

const SETTINGS_ADMINS: &[Role] = &[Role::SuperAdmin, Role::Ketua];

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list).put(update))
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<SettingEntry>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(SETTINGS_ADMINS)?;
    let mut conn = state.db_pool.acquire().await?;
    Ok(Json(settings::load(&mut conn).await?.entries()))
}

/// Body is a `{ "key": "value" }` object; unknown keys fail the whole update.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(changes): Json<BTreeMap<String, String>>,
) -> ApiResult<Vec<SettingEntry>> {
    let session = authenticate(&state, &headers).await?;
    session.require_any(SETTINGS_ADMINS)?;

    let current = {
        let mut conn = state.db_pool.acquire().await?;
        settings::load(&mut conn).await?
    };
    let next = current.updated(changes.iter().map(|(key, value)| (key.as_str(), value.as_str())))?;
    SqlSettingsRepository::new(state.db_pool.clone()).save(&next, session.user_id(), Utc::now()).await?;

    let correlation_id = correlation_id(&headers);
    let keys = changes.keys().cloned().collect::<Vec<_>>().join(",");
    let event = AuditEvent::new(
        None,
        None,
        correlation_id.clone(),
        "settings.updated",
        AuditCategory::Settings,
        session.user_id().0.clone(),
        AuditOutcome::Success,
    )
    .with_metadata("keys", keys.clone());
    let mut conn = state.db_pool.acquire().await?;
    audit::insert_events(&mut conn, &[event]).await?;

    info!(
        event_name = "settings.updated",
        correlation_id = %correlation_id,
        actor = %session.user_id().0,
        keys = %keys,
        "cooperative settings updated"
    );
    Ok(Json(next.entries()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;

    use super::{list, update};
    use crate::test_support::{headers_for, seeded_state};

    fn changes(pairs: &[(&str, &str)]) -> Json<BTreeMap<String, String>> {
        Json(pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect())
    }

    fn value_of(entries: &[koperasi_core::domain::settings::SettingEntry], key: &str) -> String {
        entries.iter().find(|entry| entry.key == key).map(|entry| entry.value.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn ketua_updates_settings_atomically() {
        let state = seeded_state().await;
        let ketua = headers_for(&state, "seed-ketua").await;

        let Json(entries) = list(State(state.clone()), ketua.clone()).await.expect("list");
        assert_eq!(entries.len(), 8);
        assert_eq!(value_of(&entries, "loan.interest_rate"), "12");

        let Json(updated) =
            update(State(state.clone()), ketua.clone(), changes(&[("loan.interest_rate", "10.5")]))
                .await
                .expect("update");
        assert_eq!(value_of(&updated, "loan.interest_rate"), "10.5");

        let error = update(
            State(state.clone()),
            ketua.clone(),
            changes(&[("loan.interest_rate", "9"), ("loan.min_tenor_months", "48")]),
        )
        .await
        .expect_err("min above max");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let Json(entries) = list(State(state), ketua).await.expect("list");
        assert_eq!(value_of(&entries, "loan.interest_rate"), "10.5");
    }

    #[tokio::test]
    async fn unknown_keys_and_other_roles_are_refused() {
        let state = seeded_state().await;
        let admin = headers_for(&state, "seed-admin").await;
        let error = update(State(state.clone()), admin, changes(&[("ui.theme", "dark")]))
            .await
            .expect_err("unknown key");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let dsp = headers_for(&state, "seed-dsp").await;
        let error = list(State(state), dsp).await.expect_err("forbidden");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }
}
