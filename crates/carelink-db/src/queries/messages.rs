use anyhow::Result;
use rusqlite::{Row, params};

use carelink_types::api::PageDirection;

use super::OptionalExt;
use crate::Database;
use crate::models::MessageRow;

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub sender_kind: &'a str,
    pub sender_name: &'a str,
    pub body: &'a str,
    pub attachments: &'a str,
    pub reply_to_id: Option<&'a str>,
    /// Truncated text stored on the conversation for list sorting.
    pub preview: &'a str,
    pub created_at: &'a str,
}

/// Another participant whose unread counter was bumped by a send.
pub struct CounterBump {
    pub user_id: String,
    pub user_kind: String,
    pub unread_count: u32,
}

impl Database {
    /// Atomically insert a message, update the conversation's last-message
    /// fields, and increment unread counters for every other active
    /// participant. Returns the bumped participants so the caller can fan
    /// out unread-count events.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<Vec<CounterBump>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_kind, sender_name,
                                       body, attachments, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_id,
                    msg.sender_kind,
                    msg.sender_name,
                    msg.body,
                    msg.attachments,
                    msg.reply_to_id,
                    msg.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET last_message_at = ?2, last_message_text = ?3 WHERE id = ?1",
                (msg.conversation_id, msg.created_at, msg.preview),
            )?;

            tx.execute(
                "UPDATE participants SET unread_count = unread_count + 1
                 WHERE conversation_id = ?1 AND is_active = 1
                   AND NOT (user_id = ?2 AND user_kind = ?3)",
                (msg.conversation_id, msg.sender_id, msg.sender_kind),
            )?;

            let bumped = {
                let mut stmt = tx.prepare(
                    "SELECT user_id, user_kind, unread_count FROM participants
                     WHERE conversation_id = ?1 AND is_active = 1
                       AND NOT (user_id = ?2 AND user_kind = ?3)",
                )?;
                stmt.query_map((msg.conversation_id, msg.sender_id, msg.sender_kind), |row| {
                    Ok(CounterBump {
                        user_id: row.get(0)?,
                        user_kind: row.get(1)?,
                        unread_count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };

            tx.commit()?;
            Ok(bumped)
        })
    }

    pub fn get_message(&self, conversation_id: &str, message_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND conversation_id = ?2"
            ))?;

            let row = stmt
                .query_row((message_id, conversation_id), map_message)
                .optional()?;

            Ok(row)
        })
    }

    /// Cursor-based page of non-archived messages. The cursor anchors a
    /// strict compound `(created_at, id)` comparison so pages never skip or
    /// duplicate a message even when timestamps collide. Rows come back in
    /// query order (descending for `before`); the API layer reverses them.
    pub fn page_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        cursor: Option<(&str, &str)>,
        direction: PageDirection,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let (cmp, order) = match direction {
                PageDirection::Before => ("<", "DESC"),
                PageDirection::After => (">", "ASC"),
            };

            let rows = match cursor {
                Some((created_at, id)) => {
                    let sql = format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1 AND archived_at IS NULL
                           AND (created_at {cmp} ?2 OR (created_at = ?2 AND id {cmp} ?3))
                         ORDER BY created_at {order}, id {order}
                         LIMIT ?4"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![conversation_id, created_at, id, limit], map_message)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1 AND archived_at IS NULL
                         ORDER BY created_at {order}, id {order}
                         LIMIT ?2"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![conversation_id, limit], map_message)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            Ok(rows)
        })
    }

    /// Stamp `read_at` on every unread message in the conversation not sent
    /// by the reader, and zero the reader's unread counter, in one
    /// transaction. Returns the affected message ids; a repeat call affects
    /// none.
    pub fn mark_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        reader_kind: &str,
        read_at: &str,
    ) -> Result<Vec<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE conversation_id = ?1 AND read_at IS NULL AND archived_at IS NULL
                       AND NOT (sender_id = ?2 AND sender_kind = ?3)",
                )?;
                stmt.query_map((conversation_id, reader_id, reader_kind), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            if !ids.is_empty() {
                let placeholders: Vec<String> =
                    (2..=ids.len() + 1).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "UPDATE messages SET read_at = ?1 WHERE id IN ({})",
                    placeholders.join(", ")
                );
                let mut stmt = tx.prepare(&sql)?;
                let mut p: Vec<&dyn rusqlite::types::ToSql> = vec![&read_at];
                p.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
                stmt.execute(p.as_slice())?;
            }

            tx.execute(
                "UPDATE participants SET unread_count = 0
                 WHERE conversation_id = ?1 AND user_id = ?2 AND user_kind = ?3",
                (conversation_id, reader_id, reader_kind),
            )?;

            tx.commit()?;
            Ok(ids)
        })
    }

    /// Returns false when the message was already archived.
    pub fn archive_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        archived_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET archived_at = ?3
                 WHERE id = ?1 AND conversation_id = ?2 AND archived_at IS NULL",
                (message_id, conversation_id, archived_at),
            )?;
            Ok(changed > 0)
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sender_kind, sender_name, body, \
                               attachments, reply_to_id, created_at, read_at, archived_at";

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_kind: row.get(3)?,
        sender_name: row.get(4)?,
        body: row.get(5)?,
        attachments: row.get(6)?,
        reply_to_id: row.get(7)?,
        created_at: row.get(8)?,
        read_at: row.get(9)?,
        archived_at: row.get(10)?,
    })
}
