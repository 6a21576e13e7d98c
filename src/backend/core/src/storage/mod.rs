//! Durable storage of job definitions and run records.
//!
//! The engine consumes storage through the [`JobCache`] capability set; each
//! operation is a single atomic unit of work against the store and iteration
//! observes a consistent snapshot at call time. Jobs and run records are
//! persisted as opaque blobs keyed by id; the wire format is the provider's
//! concern.

use async_trait::async_trait;

use crate::error::{Result, TempusError};
use crate::jobs::job::Job;
use crate::jobs::stat::JobStat;

pub mod memory;
pub mod sled;

pub use memory::MemoryJobCache;
pub use self::sled::SledJobCache;

/// Durable store of job definitions and per-execution run records.
#[async_trait]
pub trait JobCache: Send + Sync {
    async fn get(&self, id: &str) -> Result<Job>;

    /// Every stored job, re-hydrated and usable.
    async fn get_all(&self) -> Result<Vec<Job>>;

    async fn save(&self, job: &Job) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Upsert a run record by id; used mid-flight for remote `Started`
    /// records as well as for terminal saves.
    async fn save_run(&self, stat: &JobStat) -> Result<()>;

    /// Read-modify-write of an existing record's status.
    async fn update_run(&self, stat: &JobStat) -> Result<()>;

    async fn get_run(&self, id: &str) -> Result<JobStat>;

    /// All runs recorded for one job.
    async fn get_all_runs(&self, job_id: &str) -> Result<Vec<JobStat>>;

    async fn delete_run(&self, id: &str) -> Result<()>;

    /// Pruning hook; providers without a retention policy may no-op.
    async fn clear_expired_runs(&self) -> Result<()>;
}

/// Decode a stored job blob and re-initialize its derived fields.
///
/// A blob with an unknown job type maps to [`TempusError::JobTypeInvalid`]:
/// with the tagged representation an invalid kind can only ever exist as
/// stored data, never in memory.
pub fn decode_job(bytes: &[u8]) -> Result<Job> {
    let mut job: Job = serde_json::from_slice(bytes).map_err(map_job_decode_err)?;
    job.init_delay_duration()?;
    Ok(job)
}

pub(crate) fn encode_job(job: &Job) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(job)?)
}

pub(crate) fn decode_run(bytes: &[u8]) -> Result<JobStat> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn encode_run(stat: &JobStat) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(stat)?)
}

fn map_job_decode_err(err: serde_json::Error) -> TempusError {
    if err.to_string().contains("unknown variant") {
        TempusError::JobTypeInvalid
    } else {
        TempusError::Serialization(err)
    }
}
