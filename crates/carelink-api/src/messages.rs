use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use carelink_db::models::MessageRow;
use carelink_db::queries::messages::NewMessage;
use carelink_db::{format_ts, now_ts, parse_ts};
use carelink_notify::MessageDocument;
use carelink_types::actor::{Actor, ActorKind};
use carelink_types::api::{
    Attachment, ConversationSummary, MessagePage, MessageResponse, PageDirection, Pagination,
    SendMessageRequest,
};
use carelink_types::events::{GatewayEvent, Room};

use crate::audit::record_audit;
use crate::auth::AppState;
use crate::error::{ApiError, blocking, created, ok};
use crate::middleware::{ALL_STAFF, require_staff};

/// Conversation preview text is capped; the full body lives on the message.
const PREVIEW_MAX: usize = 160;

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let content = req.content.unwrap_or_default().trim().to_string();
    if content.is_empty() && req.attachments.is_empty() {
        return Err(ApiError::validation("message requires content or attachments"));
    }

    let attachments = req.attachments;
    let attachments_json =
        serde_json::to_string(&attachments).map_err(|e| ApiError::Internal(e.into()))?;

    let message_id = Uuid::new_v4();
    let created_at = Utc::now();
    let preview = if content.is_empty() {
        "[attachment]".to_string()
    } else {
        truncate_preview(&content)
    };

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let sender_id = actor.id().to_string();
    let sender_kind = actor.kind().as_str();
    let sender_name = actor.name().to_string();
    let reply_to = req.reply_to_id;
    let body = content.clone();
    let name = sender_name.clone();
    let preview_db = preview.clone();
    let bumped = blocking(move || {
        // 404 on non-membership keeps "no such conversation" and "not a
        // participant" indistinguishable
        db.get_active_participant(&cid, &sender_id, sender_kind)?
            .ok_or(ApiError::NotFound)?;

        let reply_to_str = match reply_to {
            Some(id) => {
                let id = id.to_string();
                db.get_message(&cid, &id)?.ok_or_else(|| {
                    ApiError::validation("reply_to_id must reference a message in this conversation")
                })?;
                Some(id)
            }
            None => None,
        };

        let mid = message_id.to_string();
        let bumped = db.insert_message(&NewMessage {
            id: &mid,
            conversation_id: &cid,
            sender_id: &sender_id,
            sender_kind,
            sender_name: &name,
            body: &body,
            attachments: &attachments_json,
            reply_to_id: reply_to_str.as_deref(),
            preview: &preview_db,
            created_at: &format_ts(created_at),
        })?;

        record_audit(&db, Some((&sender_id, sender_kind)), "message.send", "message", &mid,
            serde_json::json!({ "conversation_id": cid }), true);

        Ok(bumped)
    })
    .await?;

    let message = MessageResponse {
        id: message_id,
        conversation_id,
        sender_id: actor.id(),
        sender_kind: actor.kind(),
        sender_name,
        content: content.clone(),
        attachments,
        reply_to_id: reply_to,
        created_at,
        read_at: None,
    };

    // Real-time fan-out is best-effort and never blocks the response
    state.dispatcher.publish(
        Room::Conversation(conversation_id),
        GatewayEvent::NewMessage {
            conversation_id,
            message: message.clone(),
        },
    );

    for participant in bumped {
        let Ok(user_id) = participant.user_id.parse::<Uuid>() else {
            warn!("Corrupt participant user_id '{}'", participant.user_id);
            continue;
        };
        let Ok(kind) = participant.user_kind.parse::<ActorKind>() else {
            warn!("Corrupt participant user_kind '{}'", participant.user_kind);
            continue;
        };
        let room = Room::for_kind(kind, user_id);
        state.dispatcher.publish(
            room,
            GatewayEvent::ConversationUpdate {
                conversation_id,
                last_message_at: created_at,
                last_message_text: preview.clone(),
            },
        );
        state.dispatcher.publish(
            room,
            GatewayEvent::UnreadCount {
                conversation_id,
                count: participant.unread_count,
            },
        );
    }

    // Search indexing is eventually consistent; run it off the response path
    let search = state.search.clone();
    let doc = MessageDocument {
        id: message_id,
        conversation_id,
        sender_name: message.sender_name.clone(),
        sender_kind: message.sender_kind,
        body: content,
        created_at,
        read: false,
    };
    tokio::spawn(async move { search.upsert_message(&doc).await });

    Ok(created(serde_json::json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Message id anchoring the page.
    pub cursor: Option<Uuid>,
    #[serde(default = "default_direction")]
    pub direction: PageDirection,
}

fn default_limit() -> u32 {
    50
}

fn default_direction() -> PageDirection {
    PageDirection::Before
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    let limit = query.limit.clamp(1, 100);
    let direction = query.direction;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let caller_id = actor.id().to_string();
    let caller_kind = actor.kind().as_str();
    let cursor = query.cursor;
    let mut rows = blocking(move || {
        db.get_active_participant(&cid, &caller_id, caller_kind)?
            .ok_or(ApiError::NotFound)?;

        let anchor = match cursor {
            Some(id) => {
                let row = db
                    .get_message(&cid, &id.to_string())?
                    .ok_or_else(|| ApiError::validation("unknown cursor"))?;
                Some((row.created_at, row.id))
            }
            None => None,
        };

        // fetch one extra row to detect has_more
        let rows = db.page_messages(
            &cid,
            limit + 1,
            anchor.as_ref().map(|(t, i)| (t.as_str(), i.as_str())),
            direction,
        )?;
        Ok(rows)
    })
    .await?;

    let has_more = rows.len() as u32 > limit;
    rows.truncate(limit as usize);
    if direction == PageDirection::Before {
        // response is always in ascending chronological order
        rows.reverse();
    }

    let messages: Vec<MessageResponse> = rows.into_iter().map(row_to_response).collect();
    let pagination = Pagination {
        has_more,
        prev_cursor: messages.first().map(|m| m.id),
        next_cursor: messages.last().map(|m| m.id),
    };

    Ok(ok(MessagePage { messages, pagination }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    let read_at = Utc::now();

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let reader_id = actor.id().to_string();
    let reader_kind = actor.kind().as_str();
    let raw_ids = blocking(move || {
        db.get_active_participant(&cid, &reader_id, reader_kind)?
            .ok_or(ApiError::NotFound)?;

        let ids = db.mark_read(&cid, &reader_id, reader_kind, &format_ts(read_at))?;

        record_audit(&db, Some((&reader_id, reader_kind)), "message.read", "conversation", &cid,
            serde_json::json!({ "count": ids.len() }), true);

        Ok(ids)
    })
    .await?;

    let message_ids: Vec<Uuid> = raw_ids
        .iter()
        .filter_map(|id| {
            id.parse()
                .map_err(|e| warn!("Corrupt message id '{}': {}", id, e))
                .ok()
        })
        .collect();

    if !message_ids.is_empty() {
        state.dispatcher.publish(
            Room::Conversation(conversation_id),
            GatewayEvent::MessageRead {
                conversation_id,
                reader_id: actor.id(),
                reader_kind: actor.kind(),
                message_ids: message_ids.clone(),
                read_at,
            },
        );
    }
    state.dispatcher.publish(
        Room::for_actor(&actor),
        GatewayEvent::UnreadCount {
            conversation_id,
            count: 0,
        },
    );

    // read flags in the search index trail the primary store
    let search = state.search.clone();
    let for_search = message_ids.clone();
    tokio::spawn(async move { search.mark_read(&for_search).await });

    Ok(ok(serde_json::json!({
        "read_count": message_ids.len(),
        "message_ids": message_ids,
    })))
}

pub async fn archive_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let caller_id = actor.id().to_string();
    let caller_kind = actor.kind().as_str();
    blocking(move || {
        db.get_active_participant(&cid, &caller_id, caller_kind)?
            .ok_or(ApiError::NotFound)?;

        let mid = message_id.to_string();
        let row = db.get_message(&cid, &mid)?.ok_or(ApiError::NotFound)?;
        if row.archived_at.is_some() {
            return Err(ApiError::conflict("message already archived"));
        }

        db.archive_message(&cid, &mid, &now_ts())?;

        record_audit(&db, Some((&caller_id, caller_kind)), "message.archive", "message", &mid,
            serde_json::json!({ "conversation_id": cid }), true);

        Ok(())
    })
    .await?;

    Ok(ok(serde_json::json!({ "archived": true })))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    let db = state.db.clone();
    let caller_id = actor.id().to_string();
    let caller_kind = actor.kind().as_str();
    let rows = blocking(move || Ok(db.list_conversations_for(&caller_id, caller_kind)?)).await?;

    let conversations: Vec<ConversationSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row
                .id
                .parse()
                .map_err(|e| warn!("Corrupt conversation id '{}': {}", row.id, e))
                .ok()?;
            let patient_id = row
                .patient_id
                .parse()
                .map_err(|e| warn!("Corrupt patient id '{}': {}", row.patient_id, e))
                .ok()?;
            Some(ConversationSummary {
                id,
                patient_id,
                patient_name: row.patient_name,
                last_message_at: row.last_message_at.as_deref().map(parse_ts),
                last_message_text: row.last_message_text,
                unread_count: row.unread_count,
            })
        })
        .collect();

    Ok(ok(serde_json::json!({ "conversations": conversations })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    pub user_kind: ActorKind,
}

/// Staff-only: add a user to a conversation (or reactivate them).
pub async fn add_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let actor_id = actor.id().to_string();
    blocking(move || {
        db.get_conversation(&cid)?.ok_or(ApiError::NotFound)?;

        let user_id = req.user_id.to_string();
        let exists = match req.user_kind {
            ActorKind::Staff => db.get_staff_by_id(&user_id)?.is_some(),
            ActorKind::Patient => db.get_patient_by_id(&user_id)?.is_some(),
        };
        if !exists {
            return Err(ApiError::NotFound);
        }

        db.add_participant(&cid, &user_id, req.user_kind.as_str(), &now_ts())?;

        record_audit(&db, Some((&actor_id, "staff")), "participant.add", "conversation", &cid,
            serde_json::json!({ "user_id": user_id, "user_kind": req.user_kind.as_str() }), true);

        Ok(())
    })
    .await?;

    Ok(ok(serde_json::json!({ "added": true })))
}

/// Staff-only: deactivate a membership. Never deletes the row.
pub async fn remove_participant(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(actor): Extension<Actor>,
) -> Result<Response, ApiError> {
    require_staff(&actor, ALL_STAFF)?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let target = user_id.to_string();
    let actor_id = actor.id().to_string();
    blocking(move || {
        if !db.deactivate_participant(&cid, &target)? {
            return Err(ApiError::NotFound);
        }

        record_audit(&db, Some((&actor_id, "staff")), "participant.deactivate", "conversation", &cid,
            serde_json::json!({ "user_id": target }), true);

        Ok(())
    })
    .await?;

    Ok(ok(serde_json::json!({ "deactivated": true })))
}

fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_MAX {
        content.to_string()
    } else {
        let cut: String = content.chars().take(PREVIEW_MAX - 1).collect();
        format!("{cut}…")
    }
}

fn row_to_response(row: MessageRow) -> MessageResponse {
    let parse_uuid = |value: &str, field: &str, msg_id: &str| -> Uuid {
        value.parse().unwrap_or_else(|e| {
            warn!("Corrupt {} '{}' on message '{}': {}", field, value, msg_id, e);
            Uuid::default()
        })
    };

    let attachments: Vec<Attachment> = serde_json::from_str(&row.attachments).unwrap_or_else(|e| {
        warn!("Corrupt attachments on message '{}': {}", row.id, e);
        Vec::new()
    });

    let sender_kind = row.sender_kind.parse().unwrap_or_else(|e| {
        warn!("Corrupt sender_kind on message '{}': {}", row.id, e);
        ActorKind::Staff
    });

    MessageResponse {
        id: parse_uuid(&row.id, "id", &row.id),
        conversation_id: parse_uuid(&row.conversation_id, "conversation_id", &row.id),
        sender_id: parse_uuid(&row.sender_id, "sender_id", &row.id),
        sender_kind,
        sender_name: row.sender_name,
        content: row.body,
        attachments,
        reply_to_id: row
            .reply_to_id
            .as_deref()
            .map(|id| parse_uuid(id, "reply_to_id", &row.id)),
        created_at: parse_ts(&row.created_at),
        read_at: row.read_at.as_deref().map(parse_ts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncation() {
        assert_eq!(truncate_preview("short"), "short");
        let long = "x".repeat(400);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_MAX);
        assert!(preview.ends_with('…'));
    }
}
