//! # Tempus Core
//!
//! Persistent job scheduling and execution engine.
//!
//! ## Architecture
//!
//! - **Engine**: owns the clock, the shared HTTP client, the auth provider
//!   and the notifier; every runner is constructed from it
//! - **JobRunner**: the per-firing state machine (dispatch, retries inside the
//!   epsilon window, stats rollup, dependent fan-out)
//! - **Storage**: pluggable `JobCache` providers (in-memory, embedded sled)
//! - **Observability**: structured tracing and run-outcome metrics

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod observability;
pub mod storage;

pub use error::{Result, TempusError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, MockClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::engine::Engine;
    pub use crate::error::{Result, TempusError};
    pub use crate::jobs::{
        AuthProvider, Job, JobKind, JobRunner, JobStat, Mailer, Metadata, Notifier,
        OauthPasswordProvider, RemoteProperties, RunOutcome, RunStatus, StaticTokenProvider,
    };
    pub use crate::storage::{JobCache, MemoryJobCache, SledJobCache};
}
