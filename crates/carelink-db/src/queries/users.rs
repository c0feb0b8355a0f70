use anyhow::Result;
use rusqlite::Connection;

use super::OptionalExt;
use crate::Database;
use crate::models::{PatientRow, StaffRow};

impl Database {
    // -- Staff --

    pub fn create_staff(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: &str,
        role: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO staff (id, username, password, display_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, username, password_hash, display_name, role, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_staff_by_username(&self, username: &str) -> Result<Option<StaffRow>> {
        self.with_conn(|conn| {
            query_staff(conn, "SELECT id, username, password, display_name, role, created_at FROM staff WHERE username = ?1", username)
        })
    }

    pub fn get_staff_by_id(&self, id: &str) -> Result<Option<StaffRow>> {
        self.with_conn(|conn| {
            query_staff(conn, "SELECT id, username, password, display_name, role, created_at FROM staff WHERE id = ?1", id)
        })
    }

    // -- Patients --

    pub fn get_patient_by_username(&self, username: &str) -> Result<Option<PatientRow>> {
        self.with_conn(|conn| {
            query_patient(conn, "SELECT id, username, password, display_name, phone, email, created_at FROM patients WHERE username = ?1", username)
        })
    }

    pub fn get_patient_by_id(&self, id: &str) -> Result<Option<PatientRow>> {
        self.with_conn(|conn| {
            query_patient(conn, "SELECT id, username, password, display_name, phone, email, created_at FROM patients WHERE id = ?1", id)
        })
    }
}

fn query_staff(conn: &Connection, sql: &str, key: &str) -> Result<Option<StaffRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(StaffRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                role: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_patient(conn: &Connection, sql: &str, key: &str) -> Result<Option<PatientRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([key], |row| {
            Ok(PatientRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                display_name: row.get(3)?,
                phone: row.get(4)?,
                email: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use crate::{Database, now_ts};
    use uuid::Uuid;

    #[test]
    fn staff_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_staff(&id, "dr.reyes", "hash", "Dr. Reyes", "CLINICIAN", &now_ts())
            .unwrap();

        let by_name = db.get_staff_by_username("dr.reyes").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.role, "CLINICIAN");

        let by_id = db.get_staff_by_id(&id).unwrap().unwrap();
        assert_eq!(by_id.username, "dr.reyes");

        assert!(db.get_staff_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let ts = now_ts();
        db.create_staff(&Uuid::new_v4().to_string(), "front-desk", "h", "Desk", "STAFF", &ts)
            .unwrap();
        let err = db.create_staff(&Uuid::new_v4().to_string(), "front-desk", "h", "Desk 2", "STAFF", &ts);
        assert!(err.is_err());
    }
}
