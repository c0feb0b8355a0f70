use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use carelink_db::models::ReminderRow;
use carelink_db::queries::reminders::NewReminder;
use carelink_db::{format_ts, now_ts, parse_ts};
use carelink_types::actor::Actor;
use carelink_types::api::{ReminderResponse, ReminderStatus, ScheduleRemindersRequest};
use carelink_types::recurrence::{RecurrencePattern, RecurrenceRule};

use crate::audit::record_audit;
use crate::auth::AppState;
use crate::error::{ApiError, blocking, created, ok};
use crate::middleware::{ALL_STAFF, require_staff};

pub async fn schedule_reminders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ScheduleRemindersRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    if req.patient_ids.is_empty() {
        return Err(ApiError::validation("patient_ids must not be empty"));
    }
    if req.template.trim().is_empty() {
        return Err(ApiError::validation("template must not be empty"));
    }
    let now = Utc::now();
    if req.scheduled_for <= now {
        return Err(ApiError::validation("scheduled_for must be in the future"));
    }
    if let Some(rule) = &req.recurrence {
        rule.validate(req.scheduled_for).map_err(ApiError::Validation)?;
    }

    let status = if req.recurrence.is_some() {
        ReminderStatus::Active
    } else {
        ReminderStatus::Pending
    };

    let db = state.db.clone();
    let actor_id = actor.id().to_string();
    let rows = blocking(move || {
        // all-or-nothing: verify every patient before inserting any reminder
        let mut patient_ids = Vec::with_capacity(req.patient_ids.len());
        for id in &req.patient_ids {
            let id = id.to_string();
            if db.get_patient_by_id(&id)?.is_none() {
                return Err(ApiError::NotFound);
            }
            patient_ids.push(id);
        }

        let scheduled = format_ts(req.scheduled_for);
        let created_ts = now_ts();
        let rule = req.recurrence.as_ref();
        let end_date = rule.and_then(|r| r.end_date).map(format_ts);

        let mut rows = Vec::with_capacity(patient_ids.len());
        for patient_id in &patient_ids {
            let id = Uuid::new_v4().to_string();
            db.insert_reminder(&NewReminder {
                id: &id,
                patient_id,
                channel: req.channel.as_str(),
                template: &req.template,
                scheduled_for: &scheduled,
                recur_pattern: rule.map(|r| r.pattern.as_str()),
                recur_interval: rule.map(|r| r.interval),
                recur_end_date: end_date.as_deref(),
                recur_count: rule.and_then(|r| r.count),
                status: status.as_str(),
                created_at: &created_ts,
            })?;

            record_audit(&db, Some((&actor_id, "staff")), "reminder.schedule", "reminder", &id,
                serde_json::json!({ "patient_id": patient_id, "channel": req.channel.as_str() }), true);

            // re-read so the response reflects exactly what was stored
            let row = db
                .get_reminder(&id)?
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("reminder vanished after insert")))?;
            rows.push(row);
        }
        Ok(rows)
    })
    .await?;

    let reminders: Vec<ReminderResponse> = rows.into_iter().map(row_to_response).collect();
    Ok(created(serde_json::json!({ "reminders": reminders })))
}

#[derive(Debug, Deserialize)]
pub struct ReminderQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn list_reminders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ReminderQuery>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let limit = query.limit.clamp(1, 500);
    let db = state.db.clone();
    let rows = blocking(move || Ok(db.list_reminders(limit)?)).await?;

    let reminders: Vec<ReminderResponse> = rows.into_iter().map(row_to_response).collect();
    Ok(ok(serde_json::json!({ "reminders": reminders })))
}

pub async fn cancel_reminder(
    State(state): State<AppState>,
    Path(reminder_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let db = state.db.clone();
    let id = reminder_id.to_string();
    let actor_id = actor.id().to_string();
    blocking(move || {
        let row = db.get_reminder(&id)?.ok_or(ApiError::NotFound)?;
        if !db.cancel_reminder(&id, &now_ts())? {
            return Err(ApiError::conflict(format!(
                "reminder in status {} cannot be cancelled",
                row.status
            )));
        }

        record_audit(&db, Some((&actor_id, "staff")), "reminder.cancel", "reminder", &id,
            serde_json::json!({}), true);

        Ok(())
    })
    .await?;

    Ok(ok(serde_json::json!({ "cancelled": true })))
}

fn row_to_response(row: ReminderRow) -> ReminderResponse {
    let parse_uuid = |value: &str, field: &str| -> Uuid {
        value.parse().unwrap_or_else(|e| {
            warn!("Corrupt {} '{}' on reminder: {}", field, value, e);
            Uuid::default()
        })
    };

    let channel = row.channel.parse().unwrap_or_else(|e| {
        warn!("Corrupt channel on reminder '{}': {}", row.id, e);
        carelink_types::api::ReminderChannel::Sms
    });
    let status = row.status.parse().unwrap_or_else(|e| {
        warn!("Corrupt status on reminder '{}': {}", row.id, e);
        ReminderStatus::Failed
    });

    let recurrence = row.recur_pattern.as_deref().and_then(|raw| {
        let pattern: RecurrencePattern = raw
            .parse()
            .map_err(|e| warn!("Corrupt recur_pattern on reminder '{}': {}", row.id, e))
            .ok()?;
        Some(RecurrenceRule {
            pattern,
            interval: row.recur_interval.unwrap_or(1),
            end_date: row.recur_end_date.as_deref().map(parse_ts),
            count: row.recur_count,
        })
    });

    ReminderResponse {
        id: parse_uuid(&row.id, "id"),
        patient_id: parse_uuid(&row.patient_id, "patient_id"),
        channel,
        template: row.template,
        scheduled_for: parse_ts(&row.scheduled_for),
        status,
        recurrence,
        next_execution: row.next_execution.as_deref().map(parse_ts),
        executions: row.executions,
    }
}
