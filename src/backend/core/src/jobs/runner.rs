//! The per-job run state machine.
//!
//! One `JobRunner` performs a single firing of a job: it takes the job's
//! read lock, dispatches by kind, retries while the epsilon window allows,
//! rolls up run statistics and invokes dependent jobs on success.
//!
//! Dispatch outcomes feed the failure path (best-effort notification, error
//! counters, retry predicate) or the success path (success counters, stats
//! collection, depth-first dependent fan-out). The caller, normally the
//! scheduler, persists the returned stat and folds the returned metadata
//! back into the job.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Result, TempusError};
use crate::jobs::job::{Job, JobKind, Metadata};
use crate::jobs::notify;
use crate::jobs::stat::{JobStat, RunStatus};
use crate::storage::JobCache;

/// Per-run correlation headers attached to every remote dispatch
/// (`NextKala-JobId` / `NextKala-RunId`; header names travel lower-cased).
const HEADER_JOB_ID: HeaderName = HeaderName::from_static("nextkala-jobid");
const HEADER_RUN_ID: HeaderName = HeaderName::from_static("nextkala-runid");

/// Dependent fan-out is depth-first; chains deeper than this are skipped,
/// which also terminates dependency cycles.
const MAX_DEPENDENT_DEPTH: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// Run Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a single firing produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Terminal run record. Absent when the run was refused (disabled job)
    /// or when the store already holds the record (remote runs persist
    /// `Started` before dispatch and the scheduler owns the final save).
    pub stat: Option<JobStat>,

    /// Rolling counters for the scheduler to fold back into the job.
    pub metadata: Metadata,

    /// Terminal error, if the run failed.
    pub error: Option<TempusError>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Executes one firing of a job.
pub struct JobRunner<'e> {
    engine: &'e Engine,
    job: Job,
    meta: Metadata,

    number_of_attempts: u64,
    current_retries: u64,
    current_stat: Option<JobStat>,
}

impl<'e> JobRunner<'e> {
    pub(crate) fn new(engine: &'e Engine, job: Job) -> Self {
        let meta = job.metadata.clone();
        Self {
            engine,
            job,
            meta,
            number_of_attempts: 0,
            current_retries: 0,
            current_stat: None,
        }
    }

    /// Run the job once: dispatch, retry within the epsilon deadline,
    /// collect stats and fan out to dependents on success.
    pub async fn run<'a>(self, cache: &'a dyn JobCache) -> RunOutcome
    where
        'e: 'a,
    {
        self.run_with_depth(cache, 0).await
    }

    fn run_with_depth<'a>(
        mut self,
        cache: &'a dyn JobCache,
        depth: usize,
    ) -> BoxFuture<'a, RunOutcome>
    where
        'e: 'a,
    {
        Box::pin(async move {
            // The read lock spans the whole run; admin mutation and deletion
            // take the write side and therefore wait.
            let run_lock = Arc::clone(&self.job.lock);
            let _guard = run_lock.read().await;

            self.meta.last_attempted_run = Some(self.engine.clock().now());

            if self.job.disabled {
                info!(job = %self.job.name, "job tried to run, but exited early because it is disabled");
                return RunOutcome {
                    stat: None,
                    metadata: self.meta,
                    error: Some(TempusError::JobDisabled),
                };
            }

            info!(job = %self.job.name, job_id = %self.job.id, "job started");
            counter!("tempus_runs_total").increment(1);

            self.run_setup();

            let out = loop {
                let dispatch = if self.job.succeed_instantly {
                    Ok("Job succeeded instantly for test purposes.".to_string())
                } else if self.job.is_local() {
                    self.local_run().await
                } else {
                    // Persist the Started record so an interrupted process
                    // leaves a trace of the attempt. A save failure is logged
                    // but does not abort the run.
                    if let Some(stat) = self.current_stat.as_mut() {
                        stat.status = RunStatus::Started;
                    }
                    if let Some(stat) = self.current_stat.as_ref() {
                        if let Err(err) = cache.save_run(stat).await {
                            error!(error = %err, "error saving initial run status");
                        }
                    }
                    self.remote_run().await
                };

                match dispatch {
                    Ok(out) => {
                        if let Some(stat) = self.current_stat.as_mut() {
                            stat.output = out.clone();
                        }
                        break out;
                    }
                    Err(err) => {
                        if let Some(stat) = self.current_stat.as_mut() {
                            stat.output.clear();
                        }

                        let run_id = self
                            .current_stat
                            .as_ref()
                            .map(|s| s.id.clone())
                            .unwrap_or_default();
                        error!(job_id = %self.job.id, run_id = %run_id, error = %err, "error running job");

                        // Configuration errors are returned as-is: nobody is
                        // notified and the retry predicate is never consulted.
                        if !err.is_configuration() {
                            if let Some(stat) = self.current_stat.as_ref() {
                                if let Err(mail_err) = self.notify_failure(stat).await {
                                    error!(error = %mail_err, "error notifying of job failure");
                                }
                            }
                        }

                        self.meta.error_count += 1;
                        self.meta.last_error = Some(self.engine.clock().now());

                        if !err.is_configuration() && self.should_retry() {
                            self.current_retries -= 1;
                            counter!("tempus_retries_total").increment(1);
                            continue;
                        }

                        self.collect_stats(RunStatus::Failed);
                        self.meta.number_of_finished_runs += 1;
                        counter!("tempus_runs_failed").increment(1);

                        return RunOutcome {
                            stat: self.current_stat.take(),
                            metadata: self.meta,
                            error: Some(err),
                        };
                    }
                }
            };

            info!(job = %self.job.name, job_id = %self.job.id, "job finished");
            debug!(job = %self.job.name, job_id = %self.job.id, output = %out, "job output");

            self.meta.success_count += 1;
            self.meta.number_of_finished_runs += 1;
            self.meta.last_success = Some(self.engine.clock().now());
            counter!("tempus_runs_succeeded").increment(1);

            if self.job.is_remote() {
                // The store already holds this run's record; the final save
                // is the scheduler's responsibility.
                self.current_stat = None;
            } else {
                self.collect_stats(RunStatus::Success);
            }

            if !self.job.dependent_jobs.is_empty() {
                if depth >= MAX_DEPENDENT_DEPTH {
                    warn!(
                        job_id = %self.job.id,
                        depth,
                        "dependent fan-out depth cap reached, skipping dependents"
                    );
                } else {
                    for id in &self.job.dependent_jobs {
                        match cache.get(id).await {
                            Ok(dependent) => {
                                let runner = JobRunner::new(self.engine, dependent);
                                runner.run_with_depth(cache, depth + 1).await;
                            }
                            Err(err) => {
                                error!(dependent_id = %id, error = %err, "error retrieving dependent job");
                            }
                        }
                    }
                }
            }

            RunOutcome {
                stat: self.current_stat.take(),
                metadata: self.meta,
                error: None,
            }
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Setup & rollup
    // ───────────────────────────────────────────────────────────────────────────

    fn run_setup(&mut self) {
        let mut stat = JobStat::new(&self.job.id, self.engine.clock().now());
        stat.status = RunStatus::Success;
        self.current_stat = Some(stat);
        self.current_retries = self.job.retries;
    }

    fn collect_stats(&mut self, status: RunStatus) {
        let now = self.engine.clock().now();
        if let Some(stat) = self.current_stat.as_mut() {
            stat.execution_duration = (now - stat.ran_at).to_std().unwrap_or_default();
            stat.status = status;
            stat.number_of_retries = self.job.retries - self.current_retries;
        }
    }

    /// Retries are legal while budget remains and, for scheduled jobs with
    /// an epsilon, while the firing is still inside its slack window. A job
    /// that overruns the window must not keep retrying into the next firing.
    fn should_retry(&self) -> bool {
        if self.current_retries == 0 {
            return false;
        }

        if !self.job.epsilon.is_empty()
            && !self.job.schedule.is_empty()
            && !self.job.epsilon_duration().is_zero()
        {
            let now = self.engine.clock().now();
            let time_since_start = now - self.job.next_run_at;
            let window = chrono::Duration::from_std(self.job.epsilon_duration())
                .unwrap_or(chrono::Duration::MAX);
            if window - time_since_start < chrono::Duration::zero() {
                return false;
            }
        }

        true
    }

    async fn notify_failure(&self, stat: &JobStat) -> Result<()> {
        match self.engine.notifier() {
            Some(notifier) => notify::notify_job_failure(notifier.as_ref(), &self.job, stat).await,
            None => Ok(()),
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Local execution
    // ───────────────────────────────────────────────────────────────────────────

    async fn local_run(&mut self) -> Result<String> {
        self.run_cmd().await
    }

    async fn run_cmd(&mut self) -> Result<String> {
        self.number_of_attempts += 1;

        let JobKind::Local { command } = &self.job.kind else {
            return Err(TempusError::JobTypeInvalid);
        };
        let command = command.clone();

        let run_id = self
            .current_stat
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        let cmd_text = self
            .job
            .templatize(&command, &run_id)
            .map_err(wrap_template("error templatizing command"))?;

        // Word splitting with environment expansion; unset variables pass
        // through untouched.
        let expanded =
            shellexpand::env_with_context_no_errors(&cmd_text, |var| std::env::var(var).ok());
        let args = shell_words::split(&expanded)
            .map_err(|err| TempusError::Command(err.to_string()))?;
        if args.is_empty() {
            return Err(TempusError::CmdIsEmpty);
        }

        debug!(
            job_id = %self.job.id,
            attempt = self.number_of_attempts,
            argv0 = %args[0],
            "spawning local command"
        );

        let output = match Command::new(&args[0]).args(&args[1..]).output().await {
            Ok(output) => output,
            Err(err) => return Err(TempusError::Command(format!("{err}: "))),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let trimmed = combined.trim().to_string();

        if !output.status.success() {
            return Err(TempusError::Command(format!("{}: {trimmed}", output.status)));
        }
        Ok(trimmed)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Remote execution
    // ───────────────────────────────────────────────────────────────────────────

    async fn remote_run(&mut self) -> Result<String> {
        let JobKind::Remote { properties } = &self.job.kind else {
            return Err(TempusError::JobTypeInvalid);
        };
        let properties = properties.clone();

        let timeout = self.job.response_timeout();
        let run_id = self.current_stat.as_ref().map(|s| s.id.clone());
        let run_id_str = run_id.as_deref().unwrap_or_default();

        let url = self
            .job
            .templatize(&properties.url, run_id_str)
            .map_err(wrap_template("error templatizing url"))?;
        let body = self
            .job
            .templatize(&properties.body, run_id_str)
            .map_err(wrap_template("error templatizing body"))?;

        // Normalize the method passed by the user; empty means GET.
        let method = if properties.method.is_empty() {
            reqwest::Method::GET
        } else {
            reqwest::Method::from_bytes(properties.method.to_uppercase().as_bytes()).map_err(
                |err| TempusError::Remote(format!("invalid method {:?}: {err}", properties.method)),
            )?
        };

        let token = match self.engine.auth() {
            Some(provider) => provider.job_token().await?,
            None => None,
        };

        let headers = self.build_headers(&properties.headers, run_id.as_deref(), token)?;

        let mut request = self
            .engine
            .http()
            .request(method, &url)
            .headers(headers)
            .body(body);
        if !timeout.is_zero() {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if check_expected(&properties.expected_response_codes, status.as_u16()) {
            Ok(body)
        } else {
            Err(TempusError::Remote(format!("{status}{body}")))
        }
    }

    /// The request's header map is built per run; job state is never
    /// mutated here.
    fn build_headers(
        &self,
        user_headers: &[(String, String)],
        run_id: Option<&str>,
        token: Option<String>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in user_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TempusError::Remote(format!("invalid header {name:?}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| TempusError::Remote(format!("invalid header value: {err}")))?;
            headers.append(name, value);
        }

        if let Some(run_id) = run_id {
            headers.insert(
                HEADER_JOB_ID,
                HeaderValue::from_str(&self.job.id)
                    .map_err(|err| TempusError::Remote(format!("invalid job id header: {err}")))?,
            );
            headers.insert(
                HEADER_RUN_ID,
                HeaderValue::from_str(run_id)
                    .map_err(|err| TempusError::Remote(format!("invalid run id header: {err}")))?,
            );
        }

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| TempusError::Remote(format!("invalid bearer token: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

/// Empty expected set means `{200}`; the check never mutates the job.
fn check_expected(expected: &[u16], status: u16) -> bool {
    if expected.is_empty() {
        return status == 200;
    }
    expected.contains(&status)
}

fn wrap_template(context: &'static str) -> impl Fn(TempusError) -> TempusError {
    move |err| match err {
        TempusError::Template(msg) => TempusError::Template(format!("{context}: {msg}")),
        other => other,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
