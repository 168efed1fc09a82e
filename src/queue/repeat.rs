//! Repeatable (cron-scheduled) jobs.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};

/// A cron expression evaluated in UTC.
///
/// Five-field expressions (minute precision) get a leading seconds field of
/// `0`; six and seven field expressions are used as-is.
#[derive(Debug, Clone)]
pub struct CronPattern {
    raw: String,
    schedule: cron::Schedule,
}

impl CronPattern {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        let expression = match raw.split_whitespace().count() {
            5 => format!("0 {}", raw),
            6 | 7 => raw.to_string(),
            n => {
                return Err(AppError::InvalidInput(format!(
                    "Cron pattern '{}' has {} fields, expected 5 to 7",
                    raw, n
                )));
            }
        };

        let schedule = cron::Schedule::from_str(&expression).map_err(|e| {
            AppError::InvalidInput(format!("Invalid cron pattern '{}': {}", raw, e))
        })?;

        Ok(Self {
            raw: raw.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

/// A job template that the broker fires on a cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatableJob {
    /// `<name>:<job_id>:<pattern>`
    pub key: String,
    pub name: String,
    pub job_id: String,
    pub pattern: String,
    pub data: JsonValue,
    pub next_run: DateTime<Utc>,
}

impl RepeatableJob {
    pub fn key_for(name: &str, job_id: &str, pattern: &str) -> String {
        format!("{}:{}:{}", name, job_id, pattern)
    }

    /// Job id of the instance fired at `next_run`; identical across processes.
    pub fn instance_id(&self) -> String {
        format!("repeat:{}:{}", self.key, self.next_run.timestamp_millis())
    }

    pub fn is_due(&self, now: &DateTime<Utc>) -> bool {
        self.next_run <= *now
    }
}
