//! `/email-configs` and `/email-logs`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;

use koperasi_core::domain::email::{EmailConfig, EmailConfigDraft, EmailLog};
use koperasi_core::domain::new_id;
use koperasi_core::domain::user::Role;
use koperasi_core::pagination::{PageQuery, PageRequest, Paginated, SortColumn, CREATED_AT};
use koperasi_db::repositories::{EmailRepository, SqlEmailRepository};

use crate::api::locale;
use crate::auth::authenticate;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAIL_ADMINS: &[Role] = &[Role::SuperAdmin];

const LOG_SORT: &[SortColumn] = &[
    CREATED_AT,
    SortColumn { key: "status", column: "status" },
    SortColumn { key: "recipient", column: "recipient" },
];

pub fn config_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_configs).post(create_config))
        .route("/{id}", get(get_config).put(update_config).delete(delete_config))
}

pub fn log_routes() -> Router<AppState> {
    Router::new().route("/", get(list_logs))
}

fn normalized(draft: EmailConfigDraft) -> EmailConfigDraft {
    EmailConfigDraft {
        name: draft.name.trim().to_string(),
        from_address: draft.from_address.trim().to_string(),
        from_name: draft.from_name.trim().to_string(),
        relay_url: draft.relay_url.map(|url| url.trim().to_string()).filter(|url| !url.is_empty()),
        ..draft
    }
}

async fn mail_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    authenticate(state, headers).await?.require_any(MAIL_ADMINS)
}

pub async fn list_configs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<EmailConfig>> {
    mail_admin(&state, &headers).await?;
    Ok(Json(SqlEmailRepository::new(state.db_pool.clone()).list_configs().await?))
}

pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<EmailConfig> {
    mail_admin(&state, &headers).await?;
    let config = SqlEmailRepository::new(state.db_pool.clone())
        .find_config(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("email config", id))?;
    Ok(Json(config))
}

/// An active configuration replaces the previously active one.
pub async fn create_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<EmailConfigDraft>,
) -> Result<(StatusCode, Json<EmailConfig>), ApiError> {
    mail_admin(&state, &headers).await?;
    let draft = normalized(draft);
    draft.validate(locale(&state, &headers))?;

    let now = Utc::now();
    let config = EmailConfig {
        id: new_id(),
        name: draft.name,
        from_address: draft.from_address,
        from_name: draft.from_name,
        transport: draft.transport,
        relay_url: draft.relay_url,
        is_active: draft.is_active,
        created_at: now,
        updated_at: now,
    };
    SqlEmailRepository::new(state.db_pool.clone()).save_config(&config).await?;
    info!(
        event_name = "email.config_saved",
        entity_id = %config.id,
        transport = config.transport.as_str(),
        is_active = config.is_active,
        "email configuration created"
    );
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<EmailConfigDraft>,
) -> ApiResult<EmailConfig> {
    mail_admin(&state, &headers).await?;
    let draft = normalized(draft);
    draft.validate(locale(&state, &headers))?;

    let repository = SqlEmailRepository::new(state.db_pool.clone());
    let current =
        repository.find_config(&id).await?.ok_or_else(|| ApiError::not_found("email config", id))?;
    let config = EmailConfig {
        name: draft.name,
        from_address: draft.from_address,
        from_name: draft.from_name,
        transport: draft.transport,
        relay_url: draft.relay_url,
        is_active: draft.is_active,
        updated_at: Utc::now(),
        ..current
    };
    repository.save_config(&config).await?;
    info!(
        event_name = "email.config_saved",
        entity_id = %config.id,
        transport = config.transport.as_str(),
        is_active = config.is_active,
        "email configuration updated"
    );
    Ok(Json(config))
}

pub async fn delete_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    mail_admin(&state, &headers).await?;
    if !SqlEmailRepository::new(state.db_pool.clone()).delete_config(&id).await? {
        return Err(ApiError::not_found("email config", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Paginated<EmailLog>> {
    mail_admin(&state, &headers).await?;
    let request = PageRequest::resolve(&page, LOG_SORT);
    let (logs, total) = SqlEmailRepository::new(state.db_pool.clone()).list_logs(&request).await?;
    Ok(Json(Paginated::new(logs, total, &request)))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::Utc;

    use koperasi_core::domain::email::{EmailConfigDraft, EmailLog, EmailStatus, MailTransportKind};
    use koperasi_core::pagination::PageQuery;
    use koperasi_db::repositories::{EmailRepository, SqlEmailRepository};

    use super::{create_config, delete_config, get_config, list_configs, list_logs, update_config};
    use crate::test_support::{headers_for, seeded_state};

    fn relay(url: Option<&str>, active: bool) -> Json<EmailConfigDraft> {
        Json(EmailConfigDraft {
            name: " Relay kantor ".to_string(),
            from_address: "koperasi@pabrik.test".to_string(),
            from_name: "Koperasi Karyawan".to_string(),
            transport: MailTransportKind::Http,
            relay_url: url.map(str::to_string),
            is_active: active,
        })
    }

    #[tokio::test]
    async fn activating_a_config_retires_the_previous_one() {
        let state = seeded_state().await;
        let admin = headers_for(&state, "seed-admin").await;

        let error = create_config(State(state.clone()), admin.clone(), relay(Some("  "), true))
            .await
            .expect_err("http transport needs a relay url");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);

        let (status, Json(created)) = create_config(
            State(state.clone()),
            admin.clone(),
            relay(Some("http://127.0.0.1:9/send"), true),
        )
        .await
        .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.name, "Relay kantor");

        let Json(previous) =
            get_config(State(state.clone()), admin.clone(), Path("mail-seed-log".to_string()))
                .await
                .expect("seeded config");
        assert!(!previous.is_active);

        let Json(paused) = update_config(
            State(state.clone()),
            admin.clone(),
            Path(created.id.clone()),
            relay(Some("http://127.0.0.1:9/send"), false),
        )
        .await
        .expect("update");
        assert!(!paused.is_active);
        assert_eq!(paused.created_at, created.created_at);

        let status = delete_config(State(state.clone()), admin.clone(), Path(created.id))
            .await
            .expect("delete");
        assert_eq!(status, StatusCode::NO_CONTENT);
        let Json(configs) = list_configs(State(state), admin).await.expect("list");
        assert_eq!(configs.len(), 1);
    }

    #[tokio::test]
    async fn logs_are_paginated_for_admins_only() {
        let state = seeded_state().await;
        let repository = SqlEmailRepository::new(state.db_pool.clone());
        for (index, status) in [EmailStatus::Sent, EmailStatus::Failed].into_iter().enumerate() {
            repository
                .insert_log(&EmailLog {
                    id: format!("log-{index}"),
                    recipient: "anggota@koperasi.test".to_string(),
                    subject: "[Koperasi] Pinjaman".to_string(),
                    template: "application_decided".to_string(),
                    status,
                    error: None,
                    entity_kind: Some("LOAN".to_string()),
                    entity_id: Some("ln-seed-review".to_string()),
                    created_at: Utc::now(),
                })
                .await
                .expect("insert log");
        }

        let admin = headers_for(&state, "seed-admin").await;
        let Json(page) = list_logs(State(state.clone()), admin, Query(PageQuery::default()))
            .await
            .expect("logs");
        assert_eq!(page.meta.total, 2);

        let ketua = headers_for(&state, "seed-ketua").await;
        let error = list_logs(State(state), ketua, Query(PageQuery::default()))
            .await
            .expect_err("forbidden");
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }
}
