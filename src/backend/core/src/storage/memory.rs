//! In-memory, non-durable provider.
//!
//! Jobs handed out share their run lock with the stored copy, so runners
//! and admin mutators still coordinate. Used by tests and as the default
//! when no store path is configured.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Result, TempusError};
use crate::jobs::job::Job;
use crate::jobs::stat::JobStat;
use crate::storage::JobCache;

#[derive(Default)]
pub struct MemoryJobCache {
    jobs: DashMap<String, Job>,
    runs: DashMap<String, JobStat>,
}

impl MemoryJobCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobCache for MemoryJobCache {
    async fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TempusError::JobNotFound(id.to_string()))
    }

    async fn get_all(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.jobs.remove(id);
        Ok(())
    }

    async fn save_run(&self, stat: &JobStat) -> Result<()> {
        self.runs.insert(stat.id.clone(), stat.clone());
        Ok(())
    }

    async fn update_run(&self, stat: &JobStat) -> Result<()> {
        let mut existing = self
            .runs
            .get_mut(&stat.id)
            .ok_or_else(|| TempusError::RunNotFound(stat.id.clone()))?;
        existing.status = stat.status;
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<JobStat> {
        self.runs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TempusError::RunNotFound(id.to_string()))
    }

    async fn get_all_runs(&self, job_id: &str) -> Result<Vec<JobStat>> {
        Ok(self
            .runs
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        self.runs.remove(id);
        Ok(())
    }

    async fn clear_expired_runs(&self) -> Result<()> {
        // Non-durable store, nothing to prune.
        Ok(())
    }
}
