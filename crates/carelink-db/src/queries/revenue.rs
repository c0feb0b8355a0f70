use anyhow::Result;
use rusqlite::{Row, params};

use super::OptionalExt;
use crate::Database;
use crate::models::{NoteRow, RevenueGapRow};

impl Database {
    // -- Clinical notes --

    pub fn insert_note(
        &self,
        id: &str,
        patient_id: &str,
        author_id: &str,
        body: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clinical_notes (id, patient_id, author_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, patient_id, author_id, body, created_at),
            )?;
            Ok(())
        })
    }

    pub fn notes_for_patient(&self, patient_id: &str) -> Result<Vec<NoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, patient_id, author_id, body, created_at
                 FROM clinical_notes WHERE patient_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([patient_id], |row| {
                    Ok(NoteRow {
                        id: row.get(0)?,
                        patient_id: row.get(1)?,
                        author_id: row.get(2)?,
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Billing --

    pub fn insert_billing(
        &self,
        id: &str,
        patient_id: &str,
        procedure_code: &str,
        billed_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO billing_records (id, patient_id, procedure_code, billed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (id, patient_id, procedure_code, billed_at),
            )?;
            Ok(())
        })
    }

    pub fn billed_codes_for_patient(&self, patient_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT procedure_code FROM billing_records WHERE patient_id = ?1",
            )?;
            let rows = stmt
                .query_map([patient_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Revenue gaps --

    /// One gap per detected unbilled mention: duplicate (note, code) pairs
    /// are ignored. Returns whether a new row was inserted.
    pub fn insert_gap(
        &self,
        id: &str,
        patient_id: &str,
        note_id: &str,
        procedure_code: &str,
        created_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO revenue_gaps
                     (id, patient_id, note_id, procedure_code, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'OPEN', ?5, ?5)",
                (id, patient_id, note_id, procedure_code, created_at),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_gap(&self, id: &str) -> Result<Option<RevenueGapRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GAP_COLUMNS} FROM revenue_gaps WHERE id = ?1"
            ))?;
            let row = stmt.query_row([id], map_gap).optional()?;
            Ok(row)
        })
    }

    pub fn list_gaps(&self, status: Option<&str>, limit: u32) -> Result<Vec<RevenueGapRow>> {
        self.with_conn(|conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {GAP_COLUMNS} FROM revenue_gaps
                         WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
                    ))?;
                    stmt.query_map(params![status, limit], map_gap)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {GAP_COLUMNS} FROM revenue_gaps
                         ORDER BY created_at DESC LIMIT ?1"
                    ))?;
                    stmt.query_map([limit], map_gap)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn set_gap_status(&self, id: &str, status: &str, updated_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE revenue_gaps SET status = ?2, updated_at = ?3 WHERE id = ?1",
                (id, status, updated_at),
            )?;
            Ok(())
        })
    }
}

const GAP_COLUMNS: &str =
    "id, patient_id, note_id, procedure_code, status, created_at, updated_at";

fn map_gap(row: &Row<'_>) -> rusqlite::Result<RevenueGapRow> {
    Ok(RevenueGapRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        note_id: row.get(2)?,
        procedure_code: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
