use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use carelink_api::audit::record_audit;
use carelink_db::models::ReminderRow;
use carelink_db::{Database, format_ts, now_ts, parse_ts};
use carelink_notify::{Notifier, template};
use carelink_types::api::{ReminderChannel, ReminderStatus};
use carelink_types::recurrence::{RecurrencePattern, RecurrenceRule};

/// Background reminder executor. Polls for due reminders, delivers them over
/// the configured channel, and advances or finishes each one.
pub fn spawn(db: Arc<Database>, notifier: Notifier, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match run_once(&db, &notifier).await {
                Ok(0) => {}
                Ok(n) => info!("executed {} due reminder(s)", n),
                Err(e) => warn!("reminder sweep failed: {e:#}"),
            }
        }
    })
}

/// One sweep over the due reminders. Exposed separately so tests can drive
/// the worker without a running clock.
pub async fn run_once(db: &Arc<Database>, notifier: &Notifier) -> Result<u32> {
    let now_str = format_ts(Utc::now());
    let sweep_db = db.clone();
    let due = tokio::task::spawn_blocking(move || sweep_db.due_reminders(&now_str)).await??;

    let mut executed = 0;
    for reminder in due {
        execute(db, notifier, reminder).await?;
        executed += 1;
    }
    Ok(executed)
}

async fn execute(db: &Arc<Database>, notifier: &Notifier, reminder: ReminderRow) -> Result<()> {
    let lookup_db = db.clone();
    let patient_id = reminder.patient_id.clone();
    let patient = tokio::task::spawn_blocking(move || lookup_db.get_patient_by_id(&patient_id))
        .await??;

    // the occurrence being fired, for template rendering and recurrence math
    let occurrence = parse_ts(
        reminder
            .next_execution
            .as_deref()
            .unwrap_or(&reminder.scheduled_for),
    );

    let mut error: Option<String> = None;
    let mut sent = false;

    match (&patient, reminder.channel.parse::<ReminderChannel>()) {
        (None, _) => {
            error = Some("patient no longer exists".into());
        }
        (_, Err(e)) => {
            error = Some(format!("unknown channel: {e}"));
        }
        (Some(patient), Ok(channel)) => {
            let recipient = match channel {
                ReminderChannel::Email => patient.email.clone(),
                ReminderChannel::Sms | ReminderChannel::Whatsapp => patient.phone.clone(),
            };
            match recipient {
                None => {
                    error = Some(format!("no {} recipient on file", channel.as_str()));
                }
                Some(recipient) => {
                    let body = template::render(
                        &reminder.template,
                        &[
                            ("name", patient.display_name.as_str()),
                            ("date", &occurrence.format("%Y-%m-%d").to_string()),
                            ("time", &occurrence.format("%H:%M").to_string()),
                        ],
                    );
                    sent = notifier.send(channel, &recipient, &body).await;
                    if !sent {
                        error = Some("delivery failed".into());
                    }
                }
            }
        }
    }

    let executions = reminder.executions + 1;
    let recurrence = recurrence_of(&reminder);
    let finalize_db = db.clone();
    let id = reminder.id.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let ts = now_ts();
        match recurrence.as_ref().and_then(|r| r.advance(occurrence, executions)) {
            // a failed occurrence records its error but the schedule keeps
            // moving; only one-shot reminders go FAILED
            Some(next) => finalize_db.advance_reminder(
                &id,
                &format_ts(next),
                executions,
                error.as_deref(),
                &ts,
            )?,
            None => {
                let status = if recurrence.is_some() || sent {
                    ReminderStatus::Completed
                } else {
                    ReminderStatus::Failed
                };
                finalize_db.finish_reminder(&id, status.as_str(), executions, error.as_deref(), &ts)?;
            }
        }

        record_audit(&finalize_db, None, "reminder.execute", "reminder", &id,
            serde_json::json!({ "sent": sent, "executions": executions, "error": error }), sent);

        Ok(())
    })
    .await??;

    Ok(())
}

fn recurrence_of(reminder: &ReminderRow) -> Option<RecurrenceRule> {
    let raw = reminder.recur_pattern.as_deref()?;
    let pattern: RecurrencePattern = raw
        .parse()
        .map_err(|e| warn!("Corrupt recur_pattern on reminder '{}': {}", reminder.id, e))
        .ok()?;
    Some(RecurrenceRule {
        pattern,
        interval: reminder.recur_interval.unwrap_or(1),
        end_date: reminder.recur_end_date.as_deref().map(parse_ts),
        count: reminder.recur_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_db::queries::conversations::NewPatient;
    use carelink_db::queries::reminders::NewReminder;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn seed_patient(db: &Database) -> String {
        let patient_id = Uuid::new_v4().to_string();
        db.create_patient_with_conversation(
            &NewPatient {
                id: &patient_id,
                username: "pat",
                password_hash: "hash",
                display_name: "Pat Lee",
                phone: Some("+15550100"),
                email: Some("pat@example.com"),
            },
            &Uuid::new_v4().to_string(),
            None,
            &now_ts(),
        )
        .unwrap();
        patient_id
    }

    fn seed_due_reminder(db: &Database, patient_id: &str, recurring: bool) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_reminder(&NewReminder {
            id: &id,
            patient_id,
            channel: "SMS",
            template: "Hi {{name}}, see you {{date}}",
            scheduled_for: &format_ts(Utc::now() - ChronoDuration::minutes(5)),
            recur_pattern: recurring.then_some("WEEKLY"),
            recur_interval: recurring.then_some(1),
            recur_end_date: None,
            recur_count: None,
            status: if recurring { "ACTIVE" } else { "PENDING" },
            created_at: &now_ts(),
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn one_shot_reminder_fails_when_no_sender_is_configured() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let patient_id = seed_patient(&db);
        let id = seed_due_reminder(&db, &patient_id, false);

        assert_eq!(run_once(&db, &Notifier::disabled()).await.unwrap(), 1);

        let row = db.get_reminder(&id).unwrap().unwrap();
        assert_eq!(row.status, "FAILED");
        assert_eq!(row.executions, 1);
        assert!(row.last_error.is_some());
        assert!(row.next_execution.is_none());

        // nothing left due
        assert_eq!(run_once(&db, &Notifier::disabled()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recurring_reminder_keeps_advancing_past_failures() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let patient_id = seed_patient(&db);
        let id = seed_due_reminder(&db, &patient_id, true);

        assert_eq!(run_once(&db, &Notifier::disabled()).await.unwrap(), 1);

        let row = db.get_reminder(&id).unwrap().unwrap();
        assert_eq!(row.status, "ACTIVE");
        assert_eq!(row.executions, 1);
        assert!(row.last_error.is_some());
        let next = parse_ts(row.next_execution.as_deref().unwrap());
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn execution_is_audited() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let patient_id = seed_patient(&db);
        seed_due_reminder(&db, &patient_id, false);

        run_once(&db, &Notifier::disabled()).await.unwrap();

        let entries = db.list_audit(10, Some("reminder.execute")).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
    }
}
