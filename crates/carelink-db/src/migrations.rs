use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS staff (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            role            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS patients (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            phone           TEXT,
            email           TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            patient_id          TEXT NOT NULL UNIQUE REFERENCES patients(id),
            last_message_at     TEXT,
            last_message_text   TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL,
            user_kind       TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            UNIQUE(conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON participants(user_id, user_kind, is_active);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL,
            sender_kind     TEXT NOT NULL,
            sender_name     TEXT NOT NULL,
            body            TEXT NOT NULL,
            attachments     TEXT NOT NULL DEFAULT '[]',
            reply_to_id     TEXT REFERENCES messages(id),
            created_at      TEXT NOT NULL,
            read_at         TEXT,
            archived_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at, id);

        CREATE TABLE IF NOT EXISTS audit_log (
            id              TEXT PRIMARY KEY,
            actor_id        TEXT,
            actor_kind      TEXT,
            action          TEXT NOT NULL,
            resource        TEXT NOT NULL,
            resource_id     TEXT NOT NULL,
            detail          TEXT NOT NULL DEFAULT '{}',
            success         INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_created
            ON audit_log(created_at);

        CREATE TABLE IF NOT EXISTS reminders (
            id              TEXT PRIMARY KEY,
            patient_id      TEXT NOT NULL REFERENCES patients(id),
            channel         TEXT NOT NULL,
            template        TEXT NOT NULL,
            scheduled_for   TEXT NOT NULL,
            recur_pattern   TEXT,
            recur_interval  INTEGER,
            recur_end_date  TEXT,
            recur_count     INTEGER,
            executions      INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL,
            next_execution  TEXT,
            last_error      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders(status, next_execution);

        CREATE TABLE IF NOT EXISTS clinical_notes (
            id              TEXT PRIMARY KEY,
            patient_id      TEXT NOT NULL REFERENCES patients(id),
            author_id       TEXT NOT NULL REFERENCES staff(id),
            body            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS billing_records (
            id              TEXT PRIMARY KEY,
            patient_id      TEXT NOT NULL REFERENCES patients(id),
            procedure_code  TEXT NOT NULL,
            billed_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_billing_patient
            ON billing_records(patient_id);

        CREATE TABLE IF NOT EXISTS revenue_gaps (
            id              TEXT PRIMARY KEY,
            patient_id      TEXT NOT NULL REFERENCES patients(id),
            note_id         TEXT NOT NULL REFERENCES clinical_notes(id),
            procedure_code  TEXT NOT NULL,
            status          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(note_id, procedure_code)
        );

        CREATE INDEX IF NOT EXISTS idx_gaps_status
            ON revenue_gaps(status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
