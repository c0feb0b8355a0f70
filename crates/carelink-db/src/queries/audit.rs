use anyhow::Result;
use rusqlite::params;

use crate::Database;
use crate::models::AuditRow;

pub struct NewAudit<'a> {
    pub id: &'a str,
    /// None for system actions (e.g. the reminder worker).
    pub actor_id: Option<&'a str>,
    pub actor_kind: Option<&'a str>,
    pub action: &'a str,
    pub resource: &'a str,
    pub resource_id: &'a str,
    pub detail: &'a str,
    pub success: bool,
    pub created_at: &'a str,
}

impl Database {
    /// The audit log is append-only: insert is the only write path, there is
    /// deliberately no update or delete query.
    pub fn insert_audit(&self, entry: &NewAudit<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log (id, actor_id, actor_kind, action, resource, resource_id,
                                        detail, success, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id,
                    entry.actor_id,
                    entry.actor_kind,
                    entry.action,
                    entry.resource,
                    entry.resource_id,
                    entry.detail,
                    entry.success,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_audit(&self, limit: u32, action: Option<&str>) -> Result<Vec<AuditRow>> {
        self.with_conn(|conn| {
            let sql_base = "SELECT id, actor_id, actor_kind, action, resource, resource_id,
                                   detail, success, created_at
                            FROM audit_log";

            let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditRow> {
                Ok(AuditRow {
                    id: row.get(0)?,
                    actor_id: row.get(1)?,
                    actor_kind: row.get(2)?,
                    action: row.get(3)?,
                    resource: row.get(4)?,
                    resource_id: row.get(5)?,
                    detail: row.get(6)?,
                    success: row.get::<_, i64>(7)? != 0,
                    created_at: row.get(8)?,
                })
            };

            let rows = match action {
                Some(action) => {
                    let mut stmt = conn.prepare(&format!(
                        "{sql_base} WHERE action = ?1 ORDER BY created_at DESC LIMIT ?2"
                    ))?;
                    stmt.query_map(params![action, limit], map)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{sql_base} ORDER BY created_at DESC LIMIT ?1"))?;
                    stmt.query_map([limit], map)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };

            Ok(rows)
        })
    }

    /// Number of audit rows recorded with `success = 1`. Used by tests to
    /// assert that rejected requests leave no successful trace.
    pub fn count_successful_audit(&self) -> Result<u32> {
        self.with_conn(|conn| {
            let n = conn.query_row("SELECT COUNT(*) FROM audit_log WHERE success = 1", [], |row| {
                row.get(0)
            })?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ts;
    use uuid::Uuid;

    fn entry<'a>(id: &'a str, action: &'a str, ts: &'a str, success: bool) -> NewAudit<'a> {
        NewAudit {
            id,
            actor_id: None,
            actor_kind: None,
            action,
            resource: "message",
            resource_id: "m1",
            detail: "{}",
            success,
            created_at: ts,
        }
    }

    #[test]
    fn append_and_filter() {
        let db = Database::open_in_memory().unwrap();
        let ts = now_ts();

        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        db.insert_audit(&entry(&a, "message.send", &ts, true)).unwrap();
        db.insert_audit(&entry(&b, "message.read", &ts, false)).unwrap();

        assert_eq!(db.list_audit(50, None).unwrap().len(), 2);

        let sends = db.list_audit(50, Some("message.send")).unwrap();
        assert_eq!(sends.len(), 1);
        assert!(sends[0].success);

        assert_eq!(db.count_successful_audit().unwrap(), 1);
    }

    #[test]
    fn duplicate_audit_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let ts = now_ts();
        let id = Uuid::new_v4().to_string();
        db.insert_audit(&entry(&id, "x", &ts, true)).unwrap();
        assert!(db.insert_audit(&entry(&id, "x", &ts, true)).is_err());
    }
}
