use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use carelink_db::queries::audit::NewAudit;
use carelink_db::{Database, now_ts};

use crate::auth::AppState;
use crate::error::{ApiError, blocking, ok};

/// Write an audit row for a state-changing or sensitive-read operation.
/// A failed audit write is logged and never fails the caller's request;
/// callers invoke this inside the same blocking section as the primary
/// write, after it commits.
pub fn record_audit(
    db: &Database,
    actor: Option<(&str, &str)>,
    action: &str,
    resource: &str,
    resource_id: &str,
    detail: serde_json::Value,
    success: bool,
) {
    let entry = NewAudit {
        id: &Uuid::new_v4().to_string(),
        actor_id: actor.map(|(id, _)| id),
        actor_kind: actor.map(|(_, kind)| kind),
        action,
        resource,
        resource_id,
        detail: &detail.to_string(),
        success,
        created_at: &now_ts(),
    };

    if let Err(e) = db.insert_audit(&entry) {
        error!("audit write failed for {} {}: {e:#}", action, resource_id);
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub action: Option<String>,
}

fn default_limit() -> u32 {
    100
}

/// Admin-gated audit log listing.
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let limit = query.limit.min(500);

    let rows = blocking(move || Ok(db.list_audit(limit, query.action.as_deref())?)).await?;

    let entries: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id,
                "actor_id": row.actor_id,
                "actor_kind": row.actor_kind,
                "action": row.action,
                "resource": row.resource,
                "resource_id": row.resource_id,
                "detail": serde_json::from_str::<serde_json::Value>(&row.detail)
                    .unwrap_or(serde_json::Value::Null),
                "success": row.success,
                "created_at": row.created_at,
            })
        })
        .collect();

    Ok(ok(serde_json::json!({ "entries": entries })))
}
