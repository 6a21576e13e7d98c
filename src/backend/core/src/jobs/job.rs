//! Job definitions.
//!
//! A [`Job`] is a long-lived unit of scheduled work: either a local shell
//! command or an outbound HTTP call. Definitions are mutated only by the
//! admin surface and serialized to the store on every save; the runner takes
//! the read side of the job's lock for the whole of a firing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, TempusError};
use crate::jobs::template;

// ═══════════════════════════════════════════════════════════════════════════════
// Remote Properties
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a remote job needs to build its outbound request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteProperties {
    pub url: String,

    /// Request body; templatized per run.
    #[serde(default)]
    pub body: String,

    /// HTTP method; normalized to upper case at dispatch, empty means GET.
    #[serde(default)]
    pub method: String,

    /// Ordered header name/value pairs applied to every request. Duplicate
    /// names are sent as repeated headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// Status codes that count as success; empty means `{200}`.
    #[serde(default)]
    pub expected_response_codes: Vec<u16>,

    /// Seconds before the request is abandoned; zero disables the deadline.
    #[serde(default)]
    pub timeout: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// The two kinds of work a job can carry.
///
/// The tag is part of the stored representation; a blob with an unknown tag
/// fails to decode and surfaces as [`TempusError::JobTypeInvalid`], so an
/// invalid kind cannot reach the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobKind {
    /// Shell command spawned on the host, argv-style, without a shell.
    Local { command: String },
    /// Outbound HTTP call.
    Remote { properties: RemoteProperties },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Rolling per-job counters. Updated by the runner, returned to the
/// scheduler, which folds them back into the stored job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub success_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_error: Option<DateTime<Utc>>,
    pub last_attempted_run: Option<DateTime<Utc>>,
    pub number_of_finished_runs: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A scheduled unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique opaque id, assigned on create.
    pub id: String,

    pub name: String,

    /// Delivery address for failure notifications.
    #[serde(default)]
    pub owner: String,

    /// When set, every run short-circuits before any side effect.
    #[serde(default)]
    pub disabled: bool,

    #[serde(flatten)]
    pub kind: JobKind,

    /// Scheduling inputs owned by the scheduler; the runner reads
    /// `next_run_at` only for the epsilon check.
    #[serde(default)]
    pub schedule: String,

    pub next_run_at: DateTime<Utc>,

    /// Max retries per firing.
    #[serde(default)]
    pub retries: u64,

    /// Slack window after `next_run_at` during which retries stay legal,
    /// as a humantime string (`"30s"`, `"5m"`). Empty disables the check.
    #[serde(default)]
    pub epsilon: String,

    /// Parsed form of `epsilon`; recomputed by [`Job::init_delay_duration`]
    /// on create and on load from the store.
    #[serde(skip)]
    epsilon_duration: Duration,

    /// Job ids invoked, in order, after this job succeeds.
    #[serde(default)]
    pub dependent_jobs: Vec<String>,

    /// Delimiter pair override for templating, e.g. `"{[ ]}"`.
    /// Empty uses `{{ }}`.
    #[serde(default)]
    pub template_delimiters: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Readers are runners; admin mutation and deletion take the write side
    /// and therefore wait for in-flight runs.
    #[serde(skip)]
    pub(crate) lock: Arc<RwLock<()>>,

    /// Test-only bypass: dispatch reports success without running anything.
    #[serde(skip)]
    pub(crate) succeed_instantly: bool,
}

impl Job {
    fn base(name: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner: String::new(),
            disabled: false,
            kind,
            schedule: String::new(),
            next_run_at: Utc::now(),
            retries: 0,
            epsilon: String::new(),
            epsilon_duration: Duration::ZERO,
            dependent_jobs: Vec::new(),
            template_delimiters: String::new(),
            metadata: Metadata::default(),
            lock: Arc::default(),
            succeed_instantly: false,
        }
    }

    /// Create a local command job.
    pub fn local(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::base(
            name,
            JobKind::Local {
                command: command.into(),
            },
        )
    }

    /// Create a remote HTTP job.
    pub fn remote(name: impl Into<String>, properties: RemoteProperties) -> Self {
        Self::base(name, JobKind::Remote { properties })
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_retries(mut self, retries: u64) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = at;
        self
    }

    /// Set the retry slack window. Parses eagerly.
    pub fn with_epsilon(mut self, epsilon: impl Into<String>) -> Result<Self> {
        self.epsilon = epsilon.into();
        self.init_delay_duration()?;
        Ok(self)
    }

    pub fn with_dependent(mut self, id: impl Into<String>) -> Self {
        self.dependent_jobs.push(id.into());
        self
    }

    pub fn with_template_delimiters(mut self, delimiters: impl Into<String>) -> Self {
        self.template_delimiters = delimiters.into();
        self
    }

    /// Test-only bypass: the dispatcher reports success without doing work.
    #[doc(hidden)]
    pub fn with_instant_success(mut self) -> Self {
        self.succeed_instantly = true;
        self
    }

    /// Recompute the derived epsilon duration and validate the delimiter
    /// override. Must be called after deserializing a stored job before it
    /// is usable.
    pub fn init_delay_duration(&mut self) -> Result<()> {
        template::parse_delimiters(&self.template_delimiters)?;
        self.epsilon_duration = if self.epsilon.is_empty() {
            Duration::ZERO
        } else {
            humantime::parse_duration(&self.epsilon).map_err(|err| {
                TempusError::Config(format!("invalid epsilon {:?}: {err}", self.epsilon))
            })?
        };
        Ok(())
    }

    /// The parsed retry slack window; zero when no epsilon is set.
    pub fn epsilon_duration(&self) -> Duration {
        self.epsilon_duration
    }

    /// Deadline for a remote dispatch; zero means no deadline.
    pub fn response_timeout(&self) -> Duration {
        match &self.kind {
            JobKind::Remote { properties } => Duration::from_secs(properties.timeout),
            JobKind::Local { .. } => Duration::ZERO,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, JobKind::Local { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, JobKind::Remote { .. })
    }

    /// Expand placeholders in `text` against this job and the current run.
    pub fn templatize(&self, text: &str, run_id: &str) -> Result<String> {
        let mut ctx = tera::Context::new();
        ctx.insert(
            "job",
            &serde_json::json!({
                "id": self.id,
                "name": self.name,
                "owner": self.owner,
                "schedule": self.schedule,
            }),
        );
        ctx.insert("run", &serde_json::json!({ "id": run_id }));
        template::render(text, &self.template_delimiters, &ctx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
