use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use carelink_db::models::RevenueGapRow;
use carelink_db::{format_ts, now_ts, parse_ts};
use carelink_types::actor::Actor;
use carelink_types::api::{
    CreateBillingRequest, CreateNoteRequest, GapStatus, RevenueGapResponse, UpdateGapRequest,
};

use crate::audit::record_audit;
use crate::auth::AppState;
use crate::error::{ApiError, blocking, created, ok};
use crate::middleware::{ALL_STAFF, require_staff};

/// Extracts billable procedure codes from free-text clinical notes.
/// The keyword catalog is the built-in implementation; swapping in an
/// NLP-backed extractor only requires a new impl wired into app state.
pub trait ProcedureExtractor: Send + Sync {
    fn extract(&self, note: &str) -> Vec<String>;
}

/// Case-insensitive keyword matching against a fixed CPT catalog.
pub struct KeywordCatalog {
    entries: Vec<(&'static str, Vec<&'static str>)>,
}

impl Default for KeywordCatalog {
    fn default() -> Self {
        Self {
            entries: vec![
                ("99213", vec!["office visit", "follow-up", "follow up"]),
                ("93000", vec!["ecg", "ekg", "electrocardiogram"]),
                ("80053", vec!["metabolic panel", "cmp"]),
                ("71046", vec!["chest x-ray", "chest xray", "chest radiograph"]),
                ("90471", vec!["immunization", "vaccine", "vaccination"]),
            ],
        }
    }
}

impl ProcedureExtractor for KeywordCatalog {
    fn extract(&self, note: &str) -> Vec<String> {
        let haystack = note.to_lowercase();
        self.entries
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|kw| haystack.contains(kw)))
            .map(|(code, _)| (*code).to_string())
            .collect()
    }
}

pub async fn create_note(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;
    if req.body.trim().is_empty() {
        return Err(ApiError::validation("note body must not be empty"));
    }

    let db = state.db.clone();
    let pid = patient_id.to_string();
    let author_id = actor.id().to_string();
    let note_id = Uuid::new_v4();
    blocking(move || {
        db.get_patient_by_id(&pid)?.ok_or(ApiError::NotFound)?;

        let id = note_id.to_string();
        db.insert_note(&id, &pid, &author_id, &req.body, &now_ts())?;

        record_audit(&db, Some((&author_id, "staff")), "note.create", "clinical_note", &id,
            serde_json::json!({ "patient_id": pid }), true);

        Ok(())
    })
    .await?;

    Ok(created(serde_json::json!({ "note_id": note_id })))
}

pub async fn create_billing(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateBillingRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;
    if req.procedure_code.trim().is_empty() {
        return Err(ApiError::validation("procedure_code must not be empty"));
    }

    let db = state.db.clone();
    let pid = patient_id.to_string();
    let actor_id = actor.id().to_string();
    let billing_id = Uuid::new_v4();
    let billed_at = req.billed_at.map(format_ts).unwrap_or_else(now_ts);
    let code = req.procedure_code.trim().to_string();
    blocking(move || {
        db.get_patient_by_id(&pid)?.ok_or(ApiError::NotFound)?;

        let id = billing_id.to_string();
        db.insert_billing(&id, &pid, &code, &billed_at)?;

        record_audit(&db, Some((&actor_id, "staff")), "billing.create", "billing_record", &id,
            serde_json::json!({ "patient_id": pid, "procedure_code": code }), true);

        Ok(())
    })
    .await?;

    Ok(created(serde_json::json!({ "billing_id": billing_id })))
}

/// Sweep a patient's notes for procedure mentions never billed for that
/// patient. Each unbilled mention opens one gap; re-running the audit is
/// idempotent per (note, code) pair.
pub async fn run_revenue_audit(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let db = state.db.clone();
    let extractor = state.extractor.clone();
    let pid = patient_id.to_string();
    let actor_id = actor.id().to_string();
    let gaps_created = blocking(move || {
        db.get_patient_by_id(&pid)?.ok_or(ApiError::NotFound)?;

        let notes = db.notes_for_patient(&pid)?;
        let billed: HashSet<String> = db.billed_codes_for_patient(&pid)?.into_iter().collect();

        let ts = now_ts();
        let mut opened = 0u32;
        for note in &notes {
            for code in extractor.extract(&note.body) {
                if billed.contains(&code) {
                    continue;
                }
                if db.insert_gap(&Uuid::new_v4().to_string(), &pid, &note.id, &code, &ts)? {
                    opened += 1;
                }
            }
        }

        record_audit(&db, Some((&actor_id, "staff")), "revenue.audit", "patient", &pid,
            serde_json::json!({ "notes_scanned": notes.len(), "gaps_created": opened }), true);

        Ok(opened)
    })
    .await?;

    Ok(ok(serde_json::json!({ "gaps_created": gaps_created })))
}

#[derive(Debug, Deserialize)]
pub struct GapQuery {
    pub status: Option<GapStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn list_gaps(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<GapQuery>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let limit = query.limit.clamp(1, 500);
    let db = state.db.clone();
    let status = query.status.map(|s| s.as_str());
    let rows = blocking(move || Ok(db.list_gaps(status, limit)?)).await?;

    let gaps: Vec<RevenueGapResponse> = rows.into_iter().map(row_to_response).collect();
    Ok(ok(serde_json::json!({ "gaps": gaps })))
}

pub async fn update_gap(
    State(state): State<AppState>,
    Path(gap_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<UpdateGapRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let db = state.db.clone();
    let id = gap_id.to_string();
    let actor_id = actor.id().to_string();
    let row = blocking(move || {
        let row = db.get_gap(&id)?.ok_or(ApiError::NotFound)?;
        let current: GapStatus = row
            .status
            .parse()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt gap status: {e}")))?;

        if !current.can_transition_to(req.status) {
            return Err(ApiError::conflict(format!(
                "cannot move gap from {} to {}",
                current.as_str(),
                req.status.as_str()
            )));
        }

        db.set_gap_status(&id, req.status.as_str(), &now_ts())?;

        record_audit(&db, Some((&actor_id, "staff")), "revenue.gap.update", "revenue_gap", &id,
            serde_json::json!({ "from": current.as_str(), "to": req.status.as_str() }), true);

        db.get_gap(&id)?.ok_or(ApiError::NotFound)
    })
    .await?;

    Ok(ok(serde_json::json!({ "gap": row_to_response(row) })))
}

fn row_to_response(row: RevenueGapRow) -> RevenueGapResponse {
    let parse_uuid = |value: &str, field: &str| -> Uuid {
        value.parse().unwrap_or_else(|e| {
            warn!("Corrupt {} '{}' on revenue gap: {}", field, value, e);
            Uuid::default()
        })
    };

    let status = row.status.parse().unwrap_or_else(|e| {
        warn!("Corrupt status on gap '{}': {}", row.id, e);
        GapStatus::Open
    });

    RevenueGapResponse {
        id: parse_uuid(&row.id, "id"),
        patient_id: parse_uuid(&row.patient_id, "patient_id"),
        note_id: parse_uuid(&row.note_id, "note_id"),
        procedure_code: row.procedure_code,
        status,
        created_at: parse_ts(&row.created_at),
    }
}
