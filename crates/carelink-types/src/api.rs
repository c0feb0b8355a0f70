use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::{Actor, ActorKind, StaffRole};
use crate::recurrence::RecurrenceRule;

// -- Session claims --

/// JWT claims shared between the REST middleware and the WebSocket gateway.
/// Canonical definition lives here in carelink-types to eliminate duplication.
/// `kind` tags the token as a staff or patient session; a staff token without
/// a role is invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub kind: ActorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StaffRole>,
    pub exp: usize,
}

impl Claims {
    pub fn into_actor(self) -> Option<Actor> {
        match self.kind {
            ActorKind::Staff => self.role.map(|role| Actor::Staff {
                id: self.sub,
                name: self.name,
                role,
            }),
            ActorKind::Patient => Some(Actor::Patient {
                id: self.sub,
                name: self.name,
            }),
        }
    }
}

// -- Response envelope --

/// Every route responds with `{success, data?, error?, message?}`; the HTTP
/// status mirrors the outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub display_name: String,
    pub kind: ActorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StaffRole>,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStaffRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: StaffRole,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePatientRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatientResponse {
    pub id: Uuid,
    pub display_name: String,
    pub conversation_id: Uuid,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub url: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_kind: ActorKind,
    pub sender_name: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Pagination direction relative to the cursor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    /// Older than the cursor.
    Before,
    /// Newer than the cursor.
    After,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Pagination {
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<Uuid>,
}

/// Messages are always returned in ascending chronological order, whichever
/// direction was paged.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_text: Option<String>,
    pub unread_count: u32,
}

// -- Reminders --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderChannel {
    Sms,
    Email,
    Whatsapp,
}

impl ReminderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
            Self::Whatsapp => "WHATSAPP",
        }
    }
}

impl std::str::FromStr for ReminderChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMS" => Ok(Self::Sms),
            "EMAIL" => Ok(Self::Email),
            "WHATSAPP" => Ok(Self::Whatsapp),
            other => Err(format!("unknown reminder channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleRemindersRequest {
    pub patient_ids: Vec<Uuid>,
    pub template: String,
    pub channel: ReminderChannel,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReminderResponse {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub channel: ReminderChannel,
    pub template: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: ReminderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execution: Option<DateTime<Utc>>,
    pub executions: u32,
}

// -- Revenue gaps --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapStatus {
    Open,
    Reviewed,
    Billed,
    Dismissed,
}

impl GapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Reviewed => "REVIEWED",
            Self::Billed => "BILLED",
            Self::Dismissed => "DISMISSED",
        }
    }

    /// OPEN -> REVIEWED -> BILLED | DISMISSED. Anything else is a conflict:
    /// the decision was already recorded.
    pub fn can_transition_to(&self, next: GapStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Reviewed)
                | (Self::Reviewed, Self::Billed)
                | (Self::Reviewed, Self::Dismissed)
        )
    }
}

impl std::str::FromStr for GapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "REVIEWED" => Ok(Self::Reviewed),
            "BILLED" => Ok(Self::Billed),
            "DISMISSED" => Ok(Self::Dismissed),
            other => Err(format!("unknown gap status: {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGapRequest {
    pub status: GapStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevenueGapResponse {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub note_id: Uuid,
    pub procedure_code: String,
    pub status: GapStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNoteRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBillingRequest {
    pub procedure_code: String,
    #[serde(default)]
    pub billed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_empty_fields() {
        let ok = serde_json::to_value(Envelope::ok(serde_json::json!({"n": 1}))).unwrap();
        assert_eq!(ok["success"], true);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(Envelope::<()>::error("nope")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "nope");
        assert!(err.get("data").is_none());
    }

    #[test]
    fn staff_claims_without_role_are_invalid() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            name: "x".into(),
            kind: ActorKind::Staff,
            role: None,
            exp: 0,
        };
        assert!(claims.into_actor().is_none());
    }

    #[test]
    fn patient_claims_resolve() {
        let id = Uuid::new_v4();
        let claims = Claims {
            sub: id,
            name: "Ana".into(),
            kind: ActorKind::Patient,
            role: None,
            exp: 0,
        };
        let actor = claims.into_actor().unwrap();
        assert_eq!(actor.id(), id);
        assert_eq!(actor.kind(), ActorKind::Patient);
    }

    #[test]
    fn gap_transitions() {
        assert!(GapStatus::Open.can_transition_to(GapStatus::Reviewed));
        assert!(GapStatus::Reviewed.can_transition_to(GapStatus::Billed));
        assert!(GapStatus::Reviewed.can_transition_to(GapStatus::Dismissed));
        assert!(!GapStatus::Open.can_transition_to(GapStatus::Billed));
        assert!(!GapStatus::Billed.can_transition_to(GapStatus::Reviewed));
        assert!(!GapStatus::Dismissed.can_transition_to(GapStatus::Dismissed));
    }
}
