use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use super::OptionalExt;
use crate::Database;
use crate::models::{ConversationListRow, ConversationRow, ParticipantRow};

/// Fields for creating a patient together with their conversation.
pub struct NewPatient<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub display_name: &'a str,
    pub phone: Option<&'a str>,
    pub email: Option<&'a str>,
}

impl Database {
    /// One transaction: patient row, their conversation, the patient's
    /// participant row, and (when a staff member created the patient) the
    /// creator's participant row.
    pub fn create_patient_with_conversation(
        &self,
        patient: &NewPatient<'_>,
        conversation_id: &str,
        creator_staff_id: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO patients (id, username, password, display_name, phone, email, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    patient.id,
                    patient.username,
                    patient.password_hash,
                    patient.display_name,
                    patient.phone,
                    patient.email,
                    created_at,
                ),
            )?;

            tx.execute(
                "INSERT INTO conversations (id, patient_id, created_at) VALUES (?1, ?2, ?3)",
                (conversation_id, patient.id, created_at),
            )?;

            tx.execute(
                "INSERT INTO participants (id, conversation_id, user_id, user_kind, created_at)
                 VALUES (?1, ?2, ?3, 'patient', ?4)",
                (
                    Uuid::new_v4().to_string(),
                    conversation_id,
                    patient.id,
                    created_at,
                ),
            )?;

            if let Some(staff_id) = creator_staff_id {
                tx.execute(
                    "INSERT INTO participants (id, conversation_id, user_id, user_kind, created_at)
                     VALUES (?1, ?2, ?3, 'staff', ?4)",
                    (
                        Uuid::new_v4().to_string(),
                        conversation_id,
                        staff_id,
                        created_at,
                    ),
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Add a user to a conversation, or reactivate a deactivated membership.
    pub fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
        user_kind: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (id, conversation_id, user_id, user_kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET is_active = 1",
                (
                    Uuid::new_v4().to_string(),
                    conversation_id,
                    user_id,
                    user_kind,
                    created_at,
                ),
            )?;
            Ok(())
        })
    }

    /// Memberships are deactivated, never deleted.
    pub fn deactivate_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET is_active = 0
                 WHERE conversation_id = ?1 AND user_id = ?2 AND is_active = 1",
                (conversation_id, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_active_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
        user_kind: &str,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, user_id, user_kind, is_active, unread_count, created_at
                 FROM participants
                 WHERE conversation_id = ?1 AND user_id = ?2 AND user_kind = ?3 AND is_active = 1",
            )?;

            let row = stmt
                .query_row((conversation_id, user_id, user_kind), |row| {
                    Ok(ParticipantRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        user_id: row.get(2)?,
                        user_kind: row.get(3)?,
                        is_active: row.get::<_, i64>(4)? != 0,
                        unread_count: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    /// The caller's conversation list, most recently active first.
    pub fn list_conversations_for(
        &self,
        user_id: &str,
        user_kind: &str,
    ) -> Result<Vec<ConversationListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.patient_id, pt.display_name, c.last_message_at, c.last_message_text, p.unread_count
                 FROM participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 JOIN patients pt ON pt.id = c.patient_id
                 WHERE p.user_id = ?1 AND p.user_kind = ?2 AND p.is_active = 1
                 ORDER BY c.last_message_at IS NULL, c.last_message_at DESC",
            )?;

            let rows = stmt
                .query_map((user_id, user_kind), |row| {
                    Ok(ConversationListRow {
                        id: row.get(0)?,
                        patient_id: row.get(1)?,
                        patient_name: row.get(2)?,
                        last_message_at: row.get(3)?,
                        last_message_text: row.get(4)?,
                        unread_count: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, last_message_at, last_message_text, created_at
         FROM conversations WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                last_message_at: row.get(2)?,
                last_message_text: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}
