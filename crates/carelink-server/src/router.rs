use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use carelink_api::auth::{self, AppState};
use carelink_api::middleware::{RateLimiter, rate_limit, require_admin_token, resolve_actor};
use carelink_api::{audit, messages, reminders, revenue};
use carelink_gateway::{Dispatcher, connection};

/// State for the WebSocket route: the gateway authenticates and checks
/// memberships itself instead of going through the HTTP middleware.
#[derive(Clone)]
pub struct ServerState {
    pub app: AppState,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

pub fn build_router(app_state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let public = Router::new()
        .route("/api/auth/login", post(auth::staff_login))
        .route("/api/portal/login", post(auth::patient_login))
        .with_state(app_state.clone());

    let protected = Router::new()
        .route("/api/conversations", get(messages::list_conversations))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/api/conversations/{conversation_id}/read", post(messages::mark_read))
        .route(
            "/api/conversations/{conversation_id}/messages/{message_id}/archive",
            post(messages::archive_message),
        )
        .route(
            "/api/conversations/{conversation_id}/participants",
            post(messages::add_participant),
        )
        .route(
            "/api/conversations/{conversation_id}/participants/{user_id}",
            delete(messages::remove_participant),
        )
        .route("/api/patients", post(auth::create_patient))
        .route(
            "/api/reminders",
            get(reminders::list_reminders).post(reminders::schedule_reminders),
        )
        .route("/api/reminders/{reminder_id}", delete(reminders::cancel_reminder))
        .route("/api/patients/{patient_id}/notes", post(revenue::create_note))
        .route("/api/patients/{patient_id}/billing", post(revenue::create_billing))
        .route(
            "/api/patients/{patient_id}/revenue-audit",
            post(revenue::run_revenue_audit),
        )
        .route("/api/revenue-gaps", get(revenue::list_gaps))
        .route("/api/revenue-gaps/{gap_id}", patch(revenue::update_gap))
        .layer(from_fn_with_state(app_state.clone(), resolve_actor))
        .with_state(app_state.clone());

    let admin = Router::new()
        .route("/api/admin/staff", post(auth::create_staff))
        .route("/api/admin/audit", get(audit::list_audit))
        .layer(from_fn_with_state(app_state.clone(), require_admin_token))
        .with_state(app_state.clone());

    let ws = Router::new().route("/gateway", get(ws_upgrade)).with_state(ServerState {
        app: app_state.clone(),
        dispatcher: app_state.dispatcher.clone(),
        jwt_secret: app_state.jwt_secret.clone(),
    });

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        .merge(ws)
        .layer(from_fn_with_state(limiter, rate_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.app.db.clone(), state.jwt_secret)
    })
}
