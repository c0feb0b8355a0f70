use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::{Actor, ActorKind};
use crate::api::MessageResponse;

/// Rooms the broadcaster addresses. Serialized on the wire as
/// `conversation:<id>`, `user:<id>`, `patient:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(Uuid),
    User(Uuid),
    Patient(Uuid),
}

impl Room {
    /// The personal room events targeted at this actor are delivered to.
    pub fn for_actor(actor: &Actor) -> Self {
        Self::for_kind(actor.kind(), actor.id())
    }

    pub fn for_kind(kind: ActorKind, id: Uuid) -> Self {
        match kind {
            ActorKind::Staff => Self::User(id),
            ActorKind::Patient => Self::Patient(id),
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Patient(id) => write!(f, "patient:{id}"),
        }
    }
}

impl std::str::FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed room address: {s}"))?;
        let id: Uuid = id.parse().map_err(|_| format!("bad room id in: {s}"))?;
        match prefix {
            "conversation" => Ok(Self::Conversation(id)),
            "user" => Ok(Self::User(id)),
            "patient" => Ok(Self::Patient(id)),
            other => Err(format!("unknown room prefix: {other}")),
        }
    }
}

/// Events sent to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        actor_id: Uuid,
        actor_kind: ActorKind,
        name: String,
    },

    /// A new message was posted to a conversation
    NewMessage {
        conversation_id: Uuid,
        message: MessageResponse,
    },

    /// A conversation's last-message header changed
    ConversationUpdate {
        conversation_id: Uuid,
        last_message_at: DateTime<Utc>,
        last_message_text: String,
    },

    /// Read receipt: a participant read messages in a conversation
    MessageRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        reader_kind: ActorKind,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    /// A participant's unread counter changed
    UnreadCount { conversation_id: Uuid, count: u32 },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to conversation rooms. The server verifies active
    /// participant membership before honoring each subscription.
    Subscribe { conversation_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_addresses_round_trip() {
        let id = Uuid::new_v4();
        for room in [Room::Conversation(id), Room::User(id), Room::Patient(id)] {
            assert_eq!(room.to_string().parse::<Room>().unwrap(), room);
        }
        assert!("conversation".parse::<Room>().is_err());
        assert!("channel:nope".parse::<Room>().is_err());
    }

    #[test]
    fn events_use_snake_case_names() {
        let event = GatewayEvent::UnreadCount {
            conversation_id: Uuid::new_v4(),
            count: 3,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "unread_count");
        assert_eq!(v["data"]["count"], 3);
    }
}
