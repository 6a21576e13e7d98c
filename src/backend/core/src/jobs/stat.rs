//! Per-execution run records.
//!
//! A [`JobStat`] covers one firing of a job across all of its retries.
//! Records are append-only, with one exception: a remote run's `Started`
//! record may have its status updated mid-flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Terminal or in-flight state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    /// Persisted before a remote dispatch so an interrupted process leaves
    /// a trace of the attempt.
    Started,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Started => write!(f, "started"),
        }
    }
}

/// Record of one execution of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStat {
    /// Unique run id.
    pub id: String,

    pub job_id: String,

    pub ran_at: DateTime<Utc>,

    /// Retries consumed before the terminal outcome.
    #[serde(default)]
    pub number_of_retries: u64,

    #[serde(default, with = "humantime_serde")]
    pub execution_duration: Duration,

    pub status: RunStatus,

    /// Captured stdout+stderr for local jobs, response body for remote jobs.
    #[serde(default)]
    pub output: String,
}

impl JobStat {
    pub fn new(job_id: impl Into<String>, ran_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            ran_at,
            number_of_retries: 0,
            execution_duration: Duration::ZERO,
            status: RunStatus::Success,
            output: String::new(),
        }
    }
}
