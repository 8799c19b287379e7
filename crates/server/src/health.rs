//! `/health` reports whether the cooperative ledger can take writes: the
//! database answers and every shipped schema version is applied.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use koperasi_db::{migrations, DbPool};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerHealth {
    pub status: Readiness,
    pub version: &'static str,
    pub database: Readiness,
    pub applied_migrations: usize,
    pub known_migrations: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<LedgerHealth>) {
    let report = inspect(&state.db_pool).await;
    let status_code = match report.status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

async fn inspect(pool: &DbPool) -> LedgerHealth {
    let known = migrations::known_versions();
    let mut problems = Vec::new();

    let database = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => Readiness::Ready,
        Err(error) => {
            problems.push(format!("database unreachable: {error}"));
            Readiness::Degraded
        }
    };

    let applied = if database == Readiness::Ready {
        match migrations::applied_versions(pool).await {
            Ok(versions) => versions.len(),
            Err(error) => {
                problems.push(format!("migration history unreadable: {error}"));
                0
            }
        }
    } else {
        0
    };
    if database == Readiness::Ready && applied < known {
        problems.push(format!("{} schema version(s) pending", known - applied));
    }

    let status = if problems.is_empty() { Readiness::Ready } else { Readiness::Degraded };
    match status {
        Readiness::Ready => debug!(
            event_name = "system.health.ready",
            applied_migrations = applied,
            "ledger ready"
        ),
        Readiness::Degraded => warn!(
            event_name = "system.health.degraded",
            applied_migrations = applied,
            known_migrations = known,
            problems = ?problems,
            "ledger not ready for writes"
        ),
    }

    LedgerHealth {
        status,
        version: env!("CARGO_PKG_VERSION"),
        database,
        applied_migrations: applied,
        known_migrations: known,
        problems,
        checked_at: Utc::now(),
    }
}
