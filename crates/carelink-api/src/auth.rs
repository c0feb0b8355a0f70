use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, response::Response};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use carelink_db::queries::conversations::NewPatient;
use carelink_db::{Database, now_ts};
use carelink_gateway::Dispatcher;
use carelink_notify::{Notifier, SearchIndex};
use carelink_types::actor::{Actor, ActorKind, StaffRole};
use carelink_types::api::{
    Claims, CreatePatientRequest, CreateStaffRequest, LoginRequest, LoginResponse, PatientResponse,
};

use crate::audit::record_audit;
use crate::error::{ApiError, blocking, created, ok};
use crate::middleware::{ALL_STAFF, require_staff};
use crate::revenue::ProcedureExtractor;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub admin_token: String,
    pub dispatcher: Dispatcher,
    pub search: SearchIndex,
    pub notifier: Notifier,
    pub extractor: Arc<dyn ProcedureExtractor>,
}

/// Staff session login.
pub async fn staff_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let username = req.username.clone();
    let row = blocking(move || Ok(db.get_staff_by_username(&username)?))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    verify_password(&req.password, &row.password)?;

    let user_id: Uuid = row
        .id
        .parse()
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("corrupt staff id {}", row.id)))?;
    let role: StaffRole = row
        .role
        .parse()
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("corrupt staff role {}", row.role)))?;

    let token = create_token(
        &state.jwt_secret,
        user_id,
        &row.display_name,
        ActorKind::Staff,
        Some(role),
    )?;

    let db = state.db.clone();
    let id = row.id.clone();
    blocking(move || {
        record_audit(&db, Some((&id, "staff")), "auth.login", "staff", &id,
            serde_json::json!({}), true);
        Ok(())
    })
    .await?;

    Ok(ok(LoginResponse {
        user_id,
        display_name: row.display_name,
        kind: ActorKind::Staff,
        role: Some(role),
        token,
    }))
}

/// Patient portal login — a separately-issued session from staff logins.
pub async fn patient_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let username = req.username.clone();
    let row = blocking(move || Ok(db.get_patient_by_username(&username)?))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    verify_password(&req.password, &row.password)?;

    let user_id: Uuid = row
        .id
        .parse()
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("corrupt patient id {}", row.id)))?;

    let token = create_token(
        &state.jwt_secret,
        user_id,
        &row.display_name,
        ActorKind::Patient,
        None,
    )?;

    let db = state.db.clone();
    let id = row.id.clone();
    blocking(move || {
        record_audit(&db, Some((&id, "patient")), "auth.login", "patient", &id,
            serde_json::json!({}), true);
        Ok(())
    })
    .await?;

    Ok(ok(LoginResponse {
        user_id,
        display_name: row.display_name,
        kind: ActorKind::Patient,
        role: None,
        token,
    }))
}

/// Create a staff account. Reachable only through the admin-token gate.
pub async fn create_staff(
    State(state): State<AppState>,
    Json(req): Json<CreateStaffRequest>,
) -> Result<Response, ApiError> {
    validate_credentials(&req.username, &req.password)?;

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    blocking(move || {
        if db.get_staff_by_username(&req.username)?.is_some() {
            return Err(ApiError::conflict("username already taken"));
        }

        let id = user_id.to_string();
        db.create_staff(
            &id,
            &req.username,
            &password_hash,
            &req.display_name,
            req.role.as_str(),
            &now_ts(),
        )?;

        record_audit(&db, None, "staff.create", "staff", &id,
            serde_json::json!({ "role": req.role.as_str() }), true);

        Ok(())
    })
    .await?;

    Ok(created(serde_json::json!({ "user_id": user_id })))
}

/// Create a patient account along with their conversation and its initial
/// participants (the patient plus the creating staff member).
pub async fn create_patient(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;
    validate_credentials(&req.username, &req.password)?;

    let password_hash = hash_password(&req.password)?;
    let patient_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    let db = state.db.clone();
    let creator_id = actor.id().to_string();
    let display_name = req.display_name.clone();
    blocking(move || {
        if db.get_patient_by_username(&req.username)?.is_some() {
            return Err(ApiError::conflict("username already taken"));
        }

        let id = patient_id.to_string();
        db.create_patient_with_conversation(
            &NewPatient {
                id: &id,
                username: &req.username,
                password_hash: &password_hash,
                display_name: &req.display_name,
                phone: req.phone.as_deref(),
                email: req.email.as_deref(),
            },
            &conversation_id.to_string(),
            Some(&creator_id),
            &now_ts(),
        )?;

        record_audit(&db, Some((&creator_id, "staff")), "patient.create", "patient", &id,
            serde_json::json!({ "conversation_id": conversation_id }), true);

        Ok(())
    })
    .await?;

    Ok(created(PatientResponse {
        id: patient_id,
        display_name,
        conversation_id,
    }))
}

fn validate_credentials(username: &str, password: &str) -> Result<(), ApiError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::validation("username must be 3-32 characters"));
    }
    if password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::Unauthorized)
}

fn create_token(
    secret: &str,
    sub: Uuid,
    name: &str,
    kind: ActorKind,
    role: Option<StaffRole>,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub,
        name: name.to_string(),
        kind,
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encoding failed: {e}")))?;

    Ok(token)
}
