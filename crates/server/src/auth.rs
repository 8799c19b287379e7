//! Cookie and bearer authentication, role guards, and the `/auth` endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use koperasi_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use koperasi_core::credentials::{
    generate_refresh_token, hash_password, token_digest, verify_password, CredentialError,
};
use koperasi_core::domain::new_id;
use koperasi_core::domain::user::{Role, User, UserId};
use koperasi_core::errors::ApplicationError;
use koperasi_core::validation::Validator;
use koperasi_core::workflow::Actor;
use koperasi_db::repositories::audit;
use koperasi_db::repositories::session::RefreshSession;
use koperasi_db::repositories::{
    SessionRepository, SqlSessionRepository, SqlUserRepository, UserRepository,
};

use crate::api::{correlation_id, locale, optional_body};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Roles that review, decide or administer applications.
pub const STAFF_ROLES: &[Role] = &[
    Role::DivisiSimpanPinjam,
    Role::Ketua,
    Role::Pengawas,
    Role::Bendahara,
    Role::SuperAdmin,
];

/// The authenticated caller, loaded fresh from storage on every request.
#[derive(Clone, Debug)]
pub struct Session {
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    pub fn actor(&self) -> Actor {
        Actor { user_id: self.user.id.clone(), roles: self.user.roles.clone() }
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), ApiError> {
        if self.user.has_any_role(roles) {
            return Ok(());
        }
        Err(ApiError::forbidden(format!("user `{}` lacks the required level", self.user.id.0)))
    }

    /// Member features need a verified cooperative member.
    pub fn require_member(&self) -> Result<(), ApiError> {
        if self.user.is_verified && self.user.is_member {
            return Ok(());
        }
        Err(ApiError::forbidden(format!("user `{}` is not a verified member", self.user.id.0)))
    }

    pub fn is_staff(&self) -> bool {
        self.user.has_any_role(STAFF_ROLES)
    }

    /// Owners see their own records; staff see everyone's.
    pub fn require_owner_or_staff(&self, owner: &UserId) -> Result<(), ApiError> {
        if &self.user.id == owner || self.is_staff() {
            return Ok(());
        }
        Err(ApiError::forbidden(format!("user `{}` does not own this record", self.user.id.0)))
    }
}

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = access_token(headers).ok_or_else(|| ApiError::unauthorized("missing access token"))?;
    let claims = state
        .signer
        .verify(&token, Utc::now())
        .map_err(|error| ApiError::unauthorized(error.to_string()))?;

    let users = SqlUserRepository::new(state.db_pool.clone());
    let user = users
        .find_by_id(&UserId(claims.sub))
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ApiError::unauthorized("account is not active"))?;
    Ok(Session { user })
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    bearer.or_else(|| cookie_value(headers, ACCESS_COOKIE))
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn set_cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{name}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}{secure}"
    ))
    .ok()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Clone, Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    Validator::new(locale(&state, &headers))
        .required("name", &request.name)
        .max_length("name", &request.name, 120)
        .email("email", &request.email)
        .min_length("password", &request.password, 8)
        .finish()?;

    let now = Utc::now();
    let user = User {
        id: UserId(new_id()),
        name: request.name.trim().to_string(),
        email: request.email.trim().to_ascii_lowercase(),
        password_hash: hash_password(&request.password).map_err(credential_failure)?,
        employee_id: None,
        roles: vec![Role::Employee],
        is_verified: false,
        is_member: false,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let users = SqlUserRepository::new(state.db_pool.clone());
    users.create(&user).await.map_err(|error| {
        if error.is_unique_violation() {
            ApiError::conflict(format!("email `{}` is already registered", user.email))
        } else {
            ApiError::from(error)
        }
    })?;

    info!(event_name = "auth.user.registered", user_id = %user.id.0, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<TokenResponse>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let users = SqlUserRepository::new(state.db_pool.clone());
    let user = users
        .find_by_email(&request.email)
        .await?
        .filter(|user| user.is_active && verify_password(&request.password, &user.password_hash));

    let Some(user) = user else {
        record_auth_event(&state, &correlation_id, "auth.login.failed", &request.email, AuditOutcome::Rejected)
            .await?;
        return Err(ApiError::unauthorized("invalid email or password"));
    };

    let response = issue_tokens(&state, user, Utc::now()).await?;
    record_auth_event(&state, &correlation_id, "auth.login.succeeded", &response.user.id.0, AuditOutcome::Success)
        .await?;
    info!(
        event_name = "auth.login.succeeded",
        correlation_id = %correlation_id,
        user_id = %response.user.id.0,
        "user logged in"
    );
    Ok((token_cookies(&state, &response), Json(response)))
}

/// Rotates the refresh token: the presented one is revoked, a new pair issued.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(HeaderMap, Json<TokenResponse>), ApiError> {
    let request: RefreshRequest = optional_body(&body)?;
    let presented = request
        .refresh_token
        .or_else(|| cookie_value(&headers, REFRESH_COOKIE))
        .ok_or_else(|| ApiError::unauthorized("missing refresh token"))?;

    let now = Utc::now();
    let sessions = SqlSessionRepository::new(state.db_pool.clone());
    let session = sessions
        .find_by_hash(&token_digest(&presented))
        .await?
        .filter(|session| session.is_usable(now))
        .ok_or_else(|| ApiError::unauthorized("refresh token is invalid or expired"))?;

    if !sessions.revoke(&session.id, now).await? {
        return Err(ApiError::unauthorized("refresh token was already used"));
    }

    let users = SqlUserRepository::new(state.db_pool.clone());
    let user = users
        .find_by_id(&session.user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ApiError::unauthorized("account is not active"))?;

    let response = issue_tokens(&state, user, now).await?;
    Ok((token_cookies(&state, &response), Json(response)))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<LogoutResponse>), ApiError> {
    let mut revoked = false;
    if let Some(token) = cookie_value(&headers, REFRESH_COOKIE) {
        let sessions = SqlSessionRepository::new(state.db_pool.clone());
        if let Some(session) = sessions.find_by_hash(&token_digest(&token)).await? {
            revoked = sessions.revoke(&session.id, Utc::now()).await?;
        }
    }

    let mut cleared = HeaderMap::new();
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        if let Some(value) = set_cookie(name, "", 0, state.sessions.cookie_secure) {
            cleared.append(header::SET_COOKIE, value);
        }
    }
    Ok((cleared, Json(LogoutResponse { revoked })))
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<User> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(session.user))
}

async fn issue_tokens(
    state: &AppState,
    user: User,
    now: DateTime<Utc>,
) -> Result<TokenResponse, ApiError> {
    let access_token =
        state.signer.issue(&user.id.0, &user.roles, now).map_err(credential_failure)?;
    let refresh_token = generate_refresh_token();

    let sessions = SqlSessionRepository::new(state.db_pool.clone());
    sessions
        .create(&RefreshSession {
            id: new_id(),
            user_id: user.id.clone(),
            token_hash: token_digest(&refresh_token),
            expires_at: now + state.sessions.refresh_ttl,
            revoked_at: None,
            created_at: now,
        })
        .await?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        expires_in: state.signer.access_ttl().num_seconds(),
        user,
    })
}

fn credential_failure(error: CredentialError) -> ApiError {
    ApplicationError::Configuration(error.to_string()).into()
}

fn token_cookies(state: &AppState, response: &TokenResponse) -> HeaderMap {
    let secure = state.sessions.cookie_secure;
    let mut headers = HeaderMap::new();
    let cookies = [
        set_cookie(ACCESS_COOKIE, &response.access_token, response.expires_in, secure),
        set_cookie(
            REFRESH_COOKIE,
            &response.refresh_token,
            state.sessions.refresh_ttl.num_seconds(),
            secure,
        ),
    ];
    for value in cookies.into_iter().flatten() {
        headers.append(header::SET_COOKIE, value);
    }
    headers
}

async fn record_auth_event(
    state: &AppState,
    correlation_id: &str,
    event_type: &str,
    actor: &str,
    outcome: AuditOutcome,
) -> Result<(), ApiError> {
    let event =
        AuditEvent::new(None, None, correlation_id, event_type, AuditCategory::Auth, actor, outcome);
    let mut conn = state.db_pool.acquire().await?;
    audit::insert_events(&mut conn, &[event]).await?;
    Ok(())
}
