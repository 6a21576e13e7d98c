//! Job definitions and the run engine.
//!
//! This module provides the execution core of Tempus:
//!
//! - **Job**: the long-lived definition, local command or remote HTTP call
//! - **JobRunner**: the per-firing state machine with retries, stats rollup
//!   and dependent fan-out
//! - **AuthProvider**: bearer-token acquisition for outbound requests
//! - **Notifier**: best-effort failure notification
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            One firing                                │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  lock ─▶ disabled? ─▶ setup ─▶ dispatch ─▶ retry loop ─▶ stats ─▶    │
//! │                                (local/remote)            fan-out     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod job;
pub mod notify;
pub mod runner;
pub mod stat;
pub(crate) mod template;

pub use auth::{AuthProvider, OauthPasswordProvider, StaticTokenProvider};
pub use job::{Job, JobKind, Metadata, RemoteProperties};
pub use notify::{notify_job_failure, Mailer, Notifier};
pub use runner::{JobRunner, RunOutcome};
pub use stat::{JobStat, RunStatus};
