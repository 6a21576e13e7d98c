//! Error handling for Tempus Core.
//!
//! This module provides:
//! - The crate-wide `TempusError` enum and `Result` alias
//! - The sentinel errors the run engine exposes to callers
//! - Classification helpers the runner consults on the failure path

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Tempus operations.
pub type Result<T> = std::result::Result<T, TempusError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// All failure modes surfaced by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum TempusError {
    /// The job's `disabled` flag is set; the run was refused before any
    /// side effect.
    #[error("job is disabled and cannot run")]
    JobDisabled,

    /// The local command text contained no tokens after templating and
    /// word splitting.
    #[error("job command is empty")]
    CmdIsEmpty,

    /// A stored job carried a job type this engine does not know.
    #[error("job type is not valid")]
    JobTypeInvalid,

    /// The delimiter override was not exactly two distinct tokens.
    #[error("job has invalid templating delimiters")]
    InvalidDelimiters,

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("{0}")]
    Template(String),

    /// Local command failure: spawn error or non-zero exit, message carries
    /// the trimmed combined output.
    #[error("{0}")]
    Command(String),

    /// Remote dispatch failure: unexpected status code or malformed request
    /// input, message carries the status text and response body.
    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Notify(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TempusError {
    /// Configuration errors are returned to the caller immediately: the
    /// runner neither notifies nor consults the retry predicate for them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::JobDisabled | Self::CmdIsEmpty | Self::JobTypeInvalid | Self::InvalidDelimiters
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
