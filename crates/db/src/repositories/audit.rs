use sqlx::SqliteConnection;

use koperasi_core::audit::AuditEvent;

use super::RepositoryError;

/// Appends audit events inside the caller's transaction so they commit or
/// roll back with the change they describe.
pub async fn insert_events(
    conn: &mut SqliteConnection,
    events: &[AuditEvent],
) -> Result<(), RepositoryError> {
    for event in events {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(format!("metadata_json: {error}")))?;
        sqlx::query(
            r#"
            INSERT INTO audit_event (
                id, entity_kind, entity_id, correlation_id, event_type, category, actor,
                outcome, metadata_json, occurred_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.event_id)
        .bind(event.entity_kind.as_deref())
        .bind(event.entity_id.as_deref())
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Event types recorded for one entity, oldest first.
pub async fn event_types_for_entity(
    conn: &mut SqliteConnection,
    entity_kind: &str,
    entity_id: &str,
) -> Result<Vec<String>, RepositoryError> {
    let types = sqlx::query_scalar(
        "SELECT event_type FROM audit_event WHERE entity_kind = ? AND entity_id = ?
         ORDER BY occurred_at ASC, rowid ASC",
    )
    .bind(entity_kind)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(types)
}
