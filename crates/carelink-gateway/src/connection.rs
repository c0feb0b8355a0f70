use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use carelink_db::Database;
use carelink_types::actor::Actor;
use carelink_types::api::Claims;
use carelink_types::events::{GatewayCommand, GatewayEvent, Room};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// the event/command loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with a session token
    let actor = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(actor) => actor,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", actor.name(), actor.id());

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        actor_id: actor.id(),
        actor_kind: actor.kind(),
        name: actor.name().to_string(),
    };
    let Ok(ready_json) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Every connection listens on its own personal room; conversation rooms
    // are added through Subscribe after a membership check.
    let subscribed: Arc<std::sync::RwLock<HashSet<Room>>> = Arc::new(std::sync::RwLock::new(
        HashSet::from([Room::for_actor(&actor)]),
    ));
    let send_subscriptions = subscribed.clone();

    let mut broadcast_rx = dispatcher.subscribe();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let room_event = match result {
                        Ok(ev) => ev,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    {
                        let subs = send_subscriptions.read()
                            .expect("subscription lock poisoned");
                        if !subs.contains(&room_event.room) {
                            continue;
                        }
                    }

                    let Ok(text) = serde_json::to_string(&room_event.event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let actor_recv = actor.clone();
    let recv_subscriptions = subscribed.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&db, &actor_recv, cmd, &recv_subscriptions).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            actor_recv.name(),
                            actor_recv.id(),
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", actor.name(), actor.id());
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Actor> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return token_data.claims.into_actor();
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    db: &Arc<Database>,
    actor: &Actor,
    cmd: GatewayCommand,
    subscriptions: &Arc<std::sync::RwLock<HashSet<Room>>>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { conversation_ids } => {
            let verified =
                verify_memberships(db, actor, conversation_ids).await;

            info!(
                "{} ({}) subscribed to {} conversation rooms",
                actor.name(),
                actor.id(),
                verified.len()
            );

            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            subs.retain(|room| !matches!(room, Room::Conversation(_)));
            subs.extend(verified.into_iter().map(Room::Conversation));
        }
    }
}

/// Cap a client-supplied string for logging without splitting a UTF-8
/// character.
fn truncate_for_log(text: &str, max_bytes: usize) -> &str {
    let mut end = text.len().min(max_bytes);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Keep only the conversations where the actor is an active participant.
/// Unknown or foreign conversation ids are silently dropped.
async fn verify_memberships(
    db: &Arc<Database>,
    actor: &Actor,
    conversation_ids: Vec<Uuid>,
) -> Vec<Uuid> {
    let db = db.clone();
    let actor_id = actor.id().to_string();
    let actor_kind = actor.kind().as_str();

    let result = tokio::task::spawn_blocking(move || {
        let mut verified = Vec::with_capacity(conversation_ids.len());
        for conversation_id in conversation_ids {
            match db.get_active_participant(&conversation_id.to_string(), &actor_id, actor_kind) {
                Ok(Some(_)) => verified.push(conversation_id),
                Ok(None) => {}
                Err(e) => warn!("Membership check for {} failed: {}", conversation_id, e),
            }
        }
        verified
    })
    .await;

    match result {
        Ok(verified) => verified,
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    }
}
