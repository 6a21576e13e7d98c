//! Embedded durable provider.
//!
//! Two trees, `jobs` and `job_runs`, hold JSON blobs keyed by id. Jobs are
//! re-hydrated on every read: derived fields such as the epsilon duration
//! are not serialized and must be re-initialized before a job is usable.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sled::{Db, Tree};

use crate::clock::{Clock, SystemClock};
use crate::config::StorageConfig;
use crate::error::{Result, TempusError};
use crate::jobs::job::Job;
use crate::jobs::stat::JobStat;
use crate::storage::{decode_job, decode_run, encode_job, encode_run, JobCache};

const JOBS_TREE: &str = "jobs";
const RUNS_TREE: &str = "job_runs";

pub struct SledJobCache {
    db: Db,
    jobs: Tree,
    runs: Tree,
    run_retention: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl SledJobCache {
    /// Open (or create) the store at `path` with no retention policy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_retention(path, None)
    }

    /// Open at the configured path with the configured retention.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        Self::with_retention(&cfg.path, cfg.run_retention)
    }

    /// Open with a retention policy for `clear_expired_runs`.
    pub fn with_retention(path: impl AsRef<Path>, retention: Option<Duration>) -> Result<Self> {
        let db = sled::open(path).map_err(storage_err)?;
        let jobs = db.open_tree(JOBS_TREE).map_err(storage_err)?;
        let runs = db.open_tree(RUNS_TREE).map_err(storage_err)?;
        Ok(Self {
            db,
            jobs,
            runs,
            run_retention: retention,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock consulted by the pruning hook.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl JobCache for SledJobCache {
    async fn get(&self, id: &str) -> Result<Job> {
        let bytes = self
            .jobs
            .get(id)
            .map_err(storage_err)?
            .ok_or_else(|| TempusError::JobNotFound(id.to_string()))?;
        decode_job(&bytes)
    }

    async fn get_all(&self) -> Result<Vec<Job>> {
        let mut all = Vec::new();
        for entry in self.jobs.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            all.push(decode_job(&bytes)?);
        }
        Ok(all)
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let bytes = encode_job(job)?;
        self.jobs
            .insert(job.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        self.flush().await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.jobs.remove(id).map_err(storage_err)?;
        self.flush().await
    }

    async fn save_run(&self, stat: &JobStat) -> Result<()> {
        let bytes = encode_run(stat)?;
        self.runs
            .insert(stat.id.as_bytes(), bytes)
            .map_err(storage_err)?;
        self.flush().await
    }

    async fn update_run(&self, stat: &JobStat) -> Result<()> {
        let bytes = self
            .runs
            .get(&stat.id)
            .map_err(storage_err)?
            .ok_or_else(|| TempusError::RunNotFound(stat.id.clone()))?;
        let mut existing = decode_run(&bytes)?;
        existing.status = stat.status;
        self.runs
            .insert(stat.id.as_bytes(), encode_run(&existing)?)
            .map_err(storage_err)?;
        self.flush().await
    }

    async fn get_run(&self, id: &str) -> Result<JobStat> {
        let bytes = self
            .runs
            .get(id)
            .map_err(storage_err)?
            .ok_or_else(|| TempusError::RunNotFound(id.to_string()))?;
        decode_run(&bytes)
    }

    async fn get_all_runs(&self, job_id: &str) -> Result<Vec<JobStat>> {
        let mut all = Vec::new();
        for entry in self.runs.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let stat = decode_run(&bytes)?;
            if stat.job_id == job_id {
                all.push(stat);
            }
        }
        Ok(all)
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        self.runs.remove(id).map_err(storage_err)?;
        self.flush().await
    }

    async fn clear_expired_runs(&self) -> Result<()> {
        let Some(retention) = self.run_retention else {
            return Ok(());
        };
        let window = chrono::Duration::from_std(retention)
            .map_err(|err| TempusError::Storage(format!("retention out of range: {err}")))?;
        let cutoff = self.clock.now() - window;

        let mut expired = Vec::new();
        for entry in self.runs.iter() {
            let (key, bytes) = entry.map_err(storage_err)?;
            let stat = decode_run(&bytes)?;
            if stat.ran_at < cutoff {
                expired.push(key);
            }
        }
        for key in expired {
            self.runs.remove(key).map_err(storage_err)?;
        }
        self.flush().await
    }
}

fn storage_err(err: sled::Error) -> TempusError {
    TempusError::Storage(err.to_string())
}
