use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl std::str::FromStr for RecurrencePattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "MONTHLY" => Ok(Self::Monthly),
            "YEARLY" => Ok(Self::Yearly),
            other => Err(format!("unknown recurrence pattern: {other}")),
        }
    }
}

/// Recurrence for scheduled reminders. Plain date arithmetic, no
/// calendar-locale handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RecurrenceRule {
    pub fn validate(&self, scheduled_for: DateTime<Utc>) -> Result<(), String> {
        if self.interval == 0 {
            return Err("recurrence interval must be positive".into());
        }
        if self.count == Some(0) {
            return Err("recurrence count must be positive".into());
        }
        if let Some(end) = self.end_date {
            if end <= scheduled_for {
                return Err("recurrence end_date must be after scheduled_for".into());
            }
        }
        Ok(())
    }

    /// Compute the next execution after `current`, given how many executions
    /// have already happened. Returns `None` once the recurrence is exhausted
    /// (count reached or the advanced date passes `end_date`).
    pub fn advance(&self, current: DateTime<Utc>, executions: u32) -> Option<DateTime<Utc>> {
        if let Some(count) = self.count {
            if executions >= count {
                return None;
            }
        }

        let next = match self.pattern {
            RecurrencePattern::Daily => {
                current.checked_add_signed(Duration::days(self.interval as i64))?
            }
            RecurrencePattern::Weekly => {
                current.checked_add_signed(Duration::days(self.interval as i64 * 7))?
            }
            RecurrencePattern::Monthly => current.checked_add_months(Months::new(self.interval))?,
            RecurrencePattern::Yearly => {
                // an interval too large to express in months is exhausted,
                // not a panic
                let months = self.interval.checked_mul(12)?;
                current.checked_add_months(Months::new(months))?
            }
        };

        if let Some(end) = self.end_date {
            if next > end {
                return None;
            }
        }

        Some(next)
    }
}
