//! Jobs as stored in the broker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::AppResult;

/// A job stored in a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: String,
    pub name: String,
    pub data: JsonValue,
    /// Failed (or stalled) attempts so far
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl QueuedJob {
    pub fn new(id: Option<String>, name: &str, data: JsonValue, max_attempts: u32) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            name: name.to_string(),
            data,
            attempts_made: 0,
            max_attempts,
            enqueued_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            failed_reason: None,
        }
    }

    /// Decode the payload into a typed struct.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Options for `Queue::add`.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Deterministic id; a job with a known id is not enqueued twice
    pub job_id: Option<String>,
    /// Keep the job delayed for this long before it becomes waiting
    pub delay: Option<Duration>,
}

impl AddOptions {
    pub fn with_job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            delay: None,
        }
    }
}

/// Result of `Queue::add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedJob {
    pub id: String,
    /// The id was already known and nothing was enqueued
    pub duplicate: bool,
}

/// Terminal state of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedState {
    Completed,
    Failed,
}

impl FinishedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Attempts exhausted, recorded as failed
    Failed,
}
