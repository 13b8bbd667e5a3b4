use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::runtime::Handle;
use tracing::warn;

use almox_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use almox_core::domain::request::RequestId;

use super::{decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone)]
pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_event
                 (id, request_id, correlation_id, event_type, category, actor, outcome,
                  metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.request_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(encode_timestamp(&event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, correlation_id, event_type, category, actor, outcome,
                    metadata_json, occurred_at
             FROM audit_event WHERE request_id = ? ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

fn parse_category(raw: &str) -> Result<AuditCategory, RepositoryError> {
    match raw {
        "workflow" => Ok(AuditCategory::Workflow),
        "quantity" => Ok(AuditCategory::Quantity),
        "notification" => Ok(AuditCategory::Notification),
        "persistence" => Ok(AuditCategory::Persistence),
        "system" => Ok(AuditCategory::System),
        other => Err(RepositoryError::Decode(format!("unknown audit category `{other}`"))),
    }
}

fn parse_outcome(raw: &str) -> Result<AuditOutcome, RepositoryError> {
    match raw {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

fn row_to_event(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let get = |column: &str| -> Result<String, RepositoryError> {
        row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
    };
    let request_id: Option<String> =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&get("metadata_json")?)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(AuditEvent {
        event_id: get("id")?,
        request_id: request_id.map(RequestId),
        correlation_id: get("correlation_id")?,
        event_type: get("event_type")?,
        category: parse_category(&get("category")?)?,
        actor: get("actor")?,
        outcome: parse_outcome(&get("outcome")?)?,
        metadata,
        occurred_at: decode_timestamp("occurred_at", &get("occurred_at")?)?,
    })
}

/// Audit sink that persists events in the background. Write failures are logged; they never
/// reach the operation that emitted the event.
#[derive(Clone)]
pub struct SqlAuditSink {
    repository: SqlAuditRepository,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { repository: SqlAuditRepository::new(pool) }
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                event_name = "audit.persist.skipped",
                correlation_id = %event.correlation_id,
                audit_event_type = %event.event_type,
                "no async runtime available; audit event not persisted"
            );
            return;
        };

        let repository = self.repository.clone();
        handle.spawn(async move {
            if let Err(error) = repository.append(&event).await {
                warn!(
                    event_name = "audit.persist.failed",
                    correlation_id = %event.correlation_id,
                    audit_event_type = %event.event_type,
                    error = %error,
                    "failed to persist audit event"
                );
            }
        });
    }
}
