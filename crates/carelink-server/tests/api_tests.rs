use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use carelink_api::auth::{AppState, AppStateInner};
use carelink_api::middleware::RateLimiter;
use carelink_api::revenue::KeywordCatalog;
use carelink_db::Database;
use carelink_gateway::Dispatcher;
use carelink_notify::{Notifier, SearchIndex};
use carelink_server::build_router;

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_app() -> Router {
    test_app_with_limit(10_000)
}

fn test_app_with_limit(max_requests: u32) -> Router {
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(Database::open_in_memory().unwrap()),
        jwt_secret: "test-secret".into(),
        admin_token: ADMIN_TOKEN.into(),
        dispatcher: Dispatcher::new(),
        search: SearchIndex::disabled(),
        notifier: Notifier::disabled(),
        extractor: Arc::new(KeywordCatalog::default()),
    });
    let limiter = Arc::new(RateLimiter::new(max_requests, Duration::from_secs(60)));
    build_router(state, limiter)
}

async fn request(
    app: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

struct Clinic {
    staff_token: String,
    patient_token: String,
    patient_id: String,
    conversation_id: String,
}

/// Bootstrap a clinician, a patient, and the patient's conversation.
async fn setup_clinic(app: &Router) -> Clinic {
    let (status, _) = request(
        app,
        "POST",
        "/api/admin/staff",
        Some(ADMIN_TOKEN),
        Some(json!({
            "username": "dr.garcia",
            "password": "correct-horse",
            "display_name": "Dr. Garcia",
            "role": "CLINICIAN",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "dr.garcia", "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let staff_token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = request(
        app,
        "POST",
        "/api/patients",
        Some(&staff_token),
        Some(json!({
            "username": "pat.lee",
            "password": "hunter2hunter2",
            "display_name": "Pat Lee",
            "phone": "+15550100",
            "email": "pat@example.com",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let patient_id = body["data"]["id"].as_str().unwrap().to_string();
    let conversation_id = body["data"]["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = request(
        app,
        "POST",
        "/api/portal/login",
        None,
        Some(json!({ "username": "pat.lee", "password": "hunter2hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let patient_token = body["data"]["token"].as_str().unwrap().to_string();

    Clinic {
        staff_token,
        patient_token,
        patient_id,
        conversation_id,
    }
}

async fn send(app: &Router, clinic: &Clinic, token: &str, content: &str) -> Value {
    let (status, body) = request(
        app,
        "POST",
        &format!("/api/conversations/{}/messages", clinic.conversation_id),
        Some(token),
        Some(json!({ "content": content })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["message"].clone()
}

#[tokio::test]
async fn bad_admin_token_is_rejected() {
    let app = test_app();
    let (status, body) = request(
        &app,
        "POST",
        "/api/admin/staff",
        Some("wrong-token"),
        Some(json!({
            "username": "eve",
            "password": "password123",
            "display_name": "Eve",
            "role": "ADMIN",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn send_echoes_content_and_updates_conversation() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let message = send(&app, &clinic, &clinic.staff_token, "Your results are in.").await;
    assert_eq!(message["content"], "Your results are in.");
    assert_eq!(message["sender_kind"], "staff");

    // the patient's conversation header reflects the send
    let (status, body) = request(&app, "GET", "/api/conversations", Some(&clinic.patient_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let conversations = body["data"]["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["last_message_text"], "Your results are in.");
    assert_eq!(conversations[0]["unread_count"], 1);
}

#[tokio::test]
async fn empty_message_is_rejected_without_side_effects() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/conversations/{}/messages", clinic.conversation_id),
        Some(&clinic.staff_token),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/conversations/{}/messages", clinic.conversation_id),
        Some(&clinic.staff_token),
        None,
    )
    .await;
    assert!(body["data"]["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn attachment_only_message_is_accepted() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/conversations/{}/messages", clinic.conversation_id),
        Some(&clinic.staff_token),
        Some(json!({
            "attachments": [{
                "file_name": "results.pdf",
                "url": "https://files.example.com/results.pdf",
                "content_type": "application/pdf",
            }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["message"]["content"], "");

    let (_, body) = request(&app, "GET", "/api/conversations", Some(&clinic.patient_token), None).await;
    assert_eq!(body["data"]["conversations"][0]["last_message_text"], "[attachment]");
}

#[tokio::test]
async fn unauthenticated_request_leaves_no_audit_trail() {
    let app = test_app();

    let (status, body) = request(&app, "GET", "/api/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, body) = request(&app, "GET", "/api/admin/audit", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn garbled_token_is_rejected() {
    let app = test_app();
    let (status, _) = request(&app, "GET", "/api/conversations", Some("not.a.jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mark_read_zeroes_counter_and_is_idempotent() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    for text in ["one", "two", "three"] {
        send(&app, &clinic, &clinic.staff_token, text).await;
    }

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/conversations/{}/read", clinic.conversation_id),
        Some(&clinic.patient_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["read_count"], 3);

    let (_, body) = request(&app, "GET", "/api/conversations", Some(&clinic.patient_token), None).await;
    assert_eq!(body["data"]["conversations"][0]["unread_count"], 0);

    // second pass finds nothing left to stamp
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/conversations/{}/read", clinic.conversation_id),
        Some(&clinic.patient_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["read_count"], 0);
}

#[tokio::test]
async fn before_pagination_enumerates_every_message_once() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let mut sent_ids = Vec::new();
    for i in 0..5 {
        let message = send(&app, &clinic, &clinic.staff_token, &format!("msg {i}")).await;
        sent_ids.push(message["id"].as_str().unwrap().to_string());
    }

    let mut collected: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let path = match &cursor {
            Some(c) => format!(
                "/api/conversations/{}/messages?limit=2&direction=before&cursor={}",
                clinic.conversation_id, c
            ),
            None => format!("/api/conversations/{}/messages?limit=2", clinic.conversation_id),
        };
        let (status, body) = request(&app, "GET", &path, Some(&clinic.patient_token), None).await;
        assert_eq!(status, StatusCode::OK);

        let page = body["data"]["messages"].as_array().unwrap();
        for message in page {
            collected.push(message["id"].as_str().unwrap().to_string());
        }

        if !body["data"]["pagination"]["has_more"].as_bool().unwrap() {
            break;
        }
        cursor = Some(
            body["data"]["pagination"]["prev_cursor"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    assert_eq!(collected.len(), 5);
    let mut seen = collected.clone();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5, "pagination duplicated a message");
    let mut expected = sent_ids.clone();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn unknown_cursor_is_a_validation_error() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let path = format!(
        "/api/conversations/{}/messages?cursor={}",
        clinic.conversation_id,
        uuid::Uuid::new_v4()
    );
    let (status, _) = request(&app, "GET", &path, Some(&clinic.staff_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn archive_hides_message_and_conflicts_on_repeat() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let message = send(&app, &clinic, &clinic.staff_token, "oops").await;
    let message_id = message["id"].as_str().unwrap();

    let archive_path = format!(
        "/api/conversations/{}/messages/{}/archive",
        clinic.conversation_id, message_id
    );
    let (status, _) = request(&app, "POST", &archive_path, Some(&clinic.staff_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&app, "POST", &archive_path, Some(&clinic.staff_token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/conversations/{}/messages", clinic.conversation_id),
        Some(&clinic.staff_token),
        None,
    )
    .await;
    assert!(body["data"]["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn patient_cannot_schedule_reminders() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/reminders",
        Some(&clinic.patient_token),
        Some(json!({
            "patient_ids": [clinic.patient_id],
            "template": "Hi {{name}}",
            "channel": "SMS",
            "scheduled_for": (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn past_reminder_is_rejected_and_nothing_persists() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/reminders",
        Some(&clinic.staff_token),
        Some(json!({
            "patient_ids": [clinic.patient_id],
            "template": "Hi {{name}}",
            "channel": "SMS",
            "scheduled_for": (Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = request(&app, "GET", "/api/reminders", Some(&clinic.staff_token), None).await;
    assert!(body["data"]["reminders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn reminder_lifecycle_schedule_then_cancel() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/reminders",
        Some(&clinic.staff_token),
        Some(json!({
            "patient_ids": [clinic.patient_id],
            "template": "See you on {{date}} at {{time}}, {{name}}",
            "channel": "EMAIL",
            "scheduled_for": (Utc::now() + chrono::Duration::days(7)).to_rfc3339(),
            "recurrence": { "pattern": "WEEKLY", "interval": 2, "count": 4 },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reminders = body["data"]["reminders"].as_array().unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0]["status"], "ACTIVE");
    assert_eq!(reminders[0]["recurrence"]["interval"], 2);
    let reminder_id = reminders[0]["id"].as_str().unwrap().to_string();

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/api/reminders/{reminder_id}"),
        Some(&clinic.staff_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // already cancelled
    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/api/reminders/{reminder_id}"),
        Some(&clinic.staff_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn reminder_for_unknown_patient_creates_nothing() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/reminders",
        Some(&clinic.staff_token),
        Some(json!({
            "patient_ids": [clinic.patient_id, uuid::Uuid::new_v4()],
            "template": "Hi {{name}}",
            "channel": "SMS",
            "scheduled_for": (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = request(&app, "GET", "/api/reminders", Some(&clinic.staff_token), None).await;
    assert!(body["data"]["reminders"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn revenue_audit_opens_gaps_once_and_enforces_transitions() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/patients/{}/notes", clinic.patient_id),
        Some(&clinic.staff_token),
        Some(json!({ "body": "Ordered an electrocardiogram, results pending." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let audit_path = format!("/api/patients/{}/revenue-audit", clinic.patient_id);
    let (status, body) = request(&app, "POST", &audit_path, Some(&clinic.staff_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["gaps_created"], 1);

    // idempotent per (note, code)
    let (_, body) = request(&app, "POST", &audit_path, Some(&clinic.staff_token), None).await;
    assert_eq!(body["data"]["gaps_created"], 0);

    let (_, body) = request(&app, "GET", "/api/revenue-gaps?status=OPEN", Some(&clinic.staff_token), None).await;
    let gaps = body["data"]["gaps"].as_array().unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0]["procedure_code"], "93000");
    let gap_id = gaps[0]["id"].as_str().unwrap().to_string();

    // OPEN -> BILLED skips review
    let gap_path = format!("/api/revenue-gaps/{gap_id}");
    let (status, _) = request(&app, "PATCH", &gap_path, Some(&clinic.staff_token), Some(json!({ "status": "BILLED" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request(&app, "PATCH", &gap_path, Some(&clinic.staff_token), Some(json!({ "status": "REVIEWED" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "PATCH", &gap_path, Some(&clinic.staff_token), Some(json!({ "status": "BILLED" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["gap"]["status"], "BILLED");

    // terminal
    let (status, _) = request(&app, "PATCH", &gap_path, Some(&clinic.staff_token), Some(json!({ "status": "DISMISSED" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn billed_code_produces_no_gap() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/patients/{}/billing", clinic.patient_id),
        Some(&clinic.staff_token),
        Some(json!({ "procedure_code": "93000" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    request(
        &app,
        "POST",
        &format!("/api/patients/{}/notes", clinic.patient_id),
        Some(&clinic.staff_token),
        Some(json!({ "body": "Follow-up ECG reviewed." })),
    )
    .await;

    let (_, body) = request(
        &app,
        "POST",
        &format!("/api/patients/{}/revenue-audit", clinic.patient_id),
        Some(&clinic.staff_token),
        None,
    )
    .await;
    // ECG already billed; only the follow-up visit is a gap
    assert_eq!(body["data"]["gaps_created"], 1);

    let (_, body) = request(&app, "GET", "/api/revenue-gaps", Some(&clinic.staff_token), None).await;
    assert_eq!(body["data"]["gaps"][0]["procedure_code"], "99213");
}

#[tokio::test]
async fn audit_log_records_actions() {
    let app = test_app();
    let clinic = setup_clinic(&app).await;
    send(&app, &clinic, &clinic.staff_token, "hello").await;

    let (status, body) = request(
        &app,
        "GET",
        "/api/admin/audit?action=message.send",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "message.send");
    assert_eq!(entries[0]["success"], true);
}

#[tokio::test]
async fn rate_limiter_returns_429_past_the_window_budget() {
    let app = test_app_with_limit(3);

    for _ in 0..3 {
        let (status, _) = request(&app, "GET", "/api/conversations", None, None).await;
        // unauthenticated but within budget
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = request(&app, "GET", "/api/conversations", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);
}
