use anyhow::Result;
use rusqlite::{Row, params};

use super::OptionalExt;
use crate::Database;
use crate::models::ReminderRow;

pub struct NewReminder<'a> {
    pub id: &'a str,
    pub patient_id: &'a str,
    pub channel: &'a str,
    pub template: &'a str,
    pub scheduled_for: &'a str,
    pub recur_pattern: Option<&'a str>,
    pub recur_interval: Option<u32>,
    pub recur_end_date: Option<&'a str>,
    pub recur_count: Option<u32>,
    pub status: &'a str,
    pub created_at: &'a str,
}

impl Database {
    pub fn insert_reminder(&self, r: &NewReminder<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reminders (id, patient_id, channel, template, scheduled_for,
                                        recur_pattern, recur_interval, recur_end_date, recur_count,
                                        status, next_execution, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?5, ?11, ?11)",
                params![
                    r.id,
                    r.patient_id,
                    r.channel,
                    r.template,
                    r.scheduled_for,
                    r.recur_pattern,
                    r.recur_interval,
                    r.recur_end_date,
                    r.recur_count,
                    r.status,
                    r.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"
            ))?;
            let row = stmt.query_row([id], map_reminder).optional()?;
            Ok(row)
        })
    }

    pub fn list_reminders(&self, limit: u32) -> Result<Vec<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders ORDER BY scheduled_for DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([limit], map_reminder)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Reminders whose next execution is due. The worker drains these.
    pub fn due_reminders(&self, now: &str) -> Result<Vec<ReminderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE status IN ('PENDING', 'ACTIVE') AND next_execution <= ?1
                 ORDER BY next_execution ASC"
            ))?;
            let rows = stmt
                .query_map([now], map_reminder)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Only pending or active reminders can be cancelled.
    pub fn cancel_reminder(&self, id: &str, updated_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reminders SET status = 'CANCELLED', updated_at = ?2
                 WHERE id = ?1 AND status IN ('PENDING', 'ACTIVE')",
                (id, updated_at),
            )?;
            Ok(changed > 0)
        })
    }

    /// Recurring execution happened: bump the counter and move the schedule.
    pub fn advance_reminder(
        &self,
        id: &str,
        next_execution: &str,
        executions: u32,
        last_error: Option<&str>,
        updated_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE reminders SET status = 'ACTIVE', next_execution = ?2, executions = ?3,
                                      last_error = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![id, next_execution, executions, last_error, updated_at],
            )?;
            Ok(())
        })
    }

    /// Terminal transition: COMPLETED or FAILED.
    pub fn finish_reminder(
        &self,
        id: &str,
        status: &str,
        executions: u32,
        last_error: Option<&str>,
        updated_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE reminders SET status = ?2, executions = ?3, next_execution = NULL,
                                      last_error = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![id, status, executions, last_error, updated_at],
            )?;
            Ok(())
        })
    }
}

const REMINDER_COLUMNS: &str = "id, patient_id, channel, template, scheduled_for, recur_pattern, \
                                recur_interval, recur_end_date, recur_count, executions, status, \
                                next_execution, last_error, created_at, updated_at";

fn map_reminder(row: &Row<'_>) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        channel: row.get(2)?,
        template: row.get(3)?,
        scheduled_for: row.get(4)?,
        recur_pattern: row.get(5)?,
        recur_interval: row.get(6)?,
        recur_end_date: row.get(7)?,
        recur_count: row.get(8)?,
        executions: row.get(9)?,
        status: row.get(10)?,
        next_execution: row.get(11)?,
        last_error: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format_ts;
    use crate::queries::conversations::tests::seed_conversation;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn seed_reminder(db: &Database, patient_id: &str, scheduled_for: &str, recurring: bool) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_reminder(&NewReminder {
            id: &id,
            patient_id,
            channel: "SMS",
            template: "Hi {{name}}",
            scheduled_for,
            recur_pattern: recurring.then_some("WEEKLY"),
            recur_interval: recurring.then_some(1),
            recur_end_date: None,
            recur_count: None,
            status: if recurring { "ACTIVE" } else { "PENDING" },
            created_at: &crate::now_ts(),
        })
        .unwrap();
        id
    }

    #[test]
    fn due_selection_and_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let (_, patient_id, _) = seed_conversation(&db);

        let past = format_ts(Utc::now() - Duration::hours(1));
        let future = format_ts(Utc::now() + Duration::hours(1));
        let due = seed_reminder(&db, &patient_id, &past, false);
        seed_reminder(&db, &patient_id, &future, false);

        let now = crate::now_ts();
        let due_rows = db.due_reminders(&now).unwrap();
        assert_eq!(due_rows.len(), 1);
        assert_eq!(due_rows[0].id, due);

        db.finish_reminder(&due, "COMPLETED", 1, None, &now).unwrap();
        assert!(db.due_reminders(&now).unwrap().is_empty());

        let row = db.get_reminder(&due).unwrap().unwrap();
        assert_eq!(row.status, "COMPLETED");
        assert_eq!(row.executions, 1);
        assert!(row.next_execution.is_none());
    }

    #[test]
    fn advance_moves_schedule() {
        let db = Database::open_in_memory().unwrap();
        let (_, patient_id, _) = seed_conversation(&db);

        let past = format_ts(Utc::now() - Duration::hours(1));
        let id = seed_reminder(&db, &patient_id, &past, true);

        let next = format_ts(Utc::now() + Duration::days(7));
        db.advance_reminder(&id, &next, 1, None, &crate::now_ts()).unwrap();

        let row = db.get_reminder(&id).unwrap().unwrap();
        assert_eq!(row.status, "ACTIVE");
        assert_eq!(row.next_execution.as_deref(), Some(next.as_str()));
        assert!(db.due_reminders(&crate::now_ts()).unwrap().is_empty());
    }

    #[test]
    fn cancel_only_from_live_states() {
        let db = Database::open_in_memory().unwrap();
        let (_, patient_id, _) = seed_conversation(&db);

        let future = format_ts(Utc::now() + Duration::hours(1));
        let id = seed_reminder(&db, &patient_id, &future, false);

        assert!(db.cancel_reminder(&id, &crate::now_ts()).unwrap());
        // already cancelled
        assert!(!db.cancel_reminder(&id, &crate::now_ts()).unwrap());
    }
}
