/// Database row types — these map directly to SQLite rows.
/// Distinct from the carelink-types API models to keep the DB layer
/// independent; ids and timestamps stay strings until the API layer
/// converts them.

pub struct StaffRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    pub created_at: String,
}

pub struct PatientRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub patient_id: String,
    pub last_message_at: Option<String>,
    pub last_message_text: Option<String>,
    pub created_at: String,
}

/// One row of the caller's conversation list, joined with the patient name
/// and the caller's own unread counter.
pub struct ConversationListRow {
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub last_message_at: Option<String>,
    pub last_message_text: Option<String>,
    pub unread_count: u32,
}

pub struct ParticipantRow {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub user_kind: String,
    pub is_active: bool,
    pub unread_count: u32,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_kind: String,
    pub sender_name: String,
    pub body: String,
    pub attachments: String,
    pub reply_to_id: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
    pub archived_at: Option<String>,
}

pub struct AuditRow {
    pub id: String,
    pub actor_id: Option<String>,
    pub actor_kind: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub detail: String,
    pub success: bool,
    pub created_at: String,
}

pub struct ReminderRow {
    pub id: String,
    pub patient_id: String,
    pub channel: String,
    pub template: String,
    pub scheduled_for: String,
    pub recur_pattern: Option<String>,
    pub recur_interval: Option<u32>,
    pub recur_end_date: Option<String>,
    pub recur_count: Option<u32>,
    pub executions: u32,
    pub status: String,
    pub next_execution: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NoteRow {
    pub id: String,
    pub patient_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: String,
}

pub struct RevenueGapRow {
    pub id: String,
    pub patient_id: String,
    pub note_id: String,
    pub procedure_code: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}
