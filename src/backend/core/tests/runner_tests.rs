//! End-to-end tests for the run state machine.
//!
//! Tests cover:
//! - Local execution: output capture, templating, env expansion, empty command
//! - Retry behavior inside and outside the epsilon window
//! - Remote execution: method normalization, headers, auth, expected codes,
//!   timeouts and the mid-flight Started record
//! - The disabled-job gate
//! - Dependent fan-out ordering

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use tempus_core::clock::{Clock, MockClock};
use tempus_core::engine::Engine;
use tempus_core::jobs::{Job, Notifier, RemoteProperties, RunStatus, StaticTokenProvider};
use tempus_core::storage::{JobCache, MemoryJobCache};
use tempus_core::{Result, TempusError};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.calls.lock().len()
    }

    fn last_subject(&self) -> Option<String> {
        self.calls.lock().last().map(|(_, subject)| subject.clone())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        self.calls.lock().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct TestBed {
    engine: Engine,
    notifier: Arc<RecordingNotifier>,
    clock: MockClock,
}

fn testbed() -> TestBed {
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = MockClock::new(Utc::now());
    let engine = Engine::builder()
        .clock(Arc::new(clock.clone()))
        .notifier(notifier.clone())
        .build();
    TestBed {
        engine,
        notifier,
        clock,
    }
}

fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Matches requests that do NOT carry the given header.
struct NoHeader(&'static str);

impl Match for NoHeader {
    fn matches(&self, request: &Request) -> bool {
        !request
            .headers
            .iter()
            .any(|(name, _)| name.as_str().eq_ignore_ascii_case(self.0))
    }
}

// ============================================================================
// Local execution
// ============================================================================

#[tokio::test]
async fn local_success_captures_trimmed_output() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("greeter", "echo hi");

    let outcome = bed.engine.runner(job.clone()).run(&cache).await;

    assert!(outcome.succeeded());
    let stat = outcome.stat.expect("local runs return a stat");
    assert_eq!(stat.output, "hi");
    assert_eq!(stat.status, RunStatus::Success);
    assert_eq!(stat.number_of_retries, 0);
    assert_eq!(stat.job_id, job.id);

    assert_eq!(outcome.metadata.success_count, 1);
    assert_eq!(outcome.metadata.number_of_finished_runs, 1);
    assert_eq!(outcome.metadata.error_count, 0);
    assert!(outcome.metadata.last_success.is_some());
    assert_eq!(bed.notifier.count(), 0);

    // Persisting the terminal record is the scheduler's job, not the runner's.
    assert!(cache.get_all_runs(&job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn local_command_is_templatized() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("greeter", "echo {{ job.name }}");

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(outcome.succeeded());
    assert_eq!(outcome.stat.unwrap().output, "greeter");
}

#[tokio::test]
async fn local_command_expands_environment() {
    std::env::set_var("TEMPUS_RUNNER_TEST_WORD", "expanded");
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("env", "echo $TEMPUS_RUNNER_TEST_WORD");

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(outcome.succeeded());
    assert_eq!(outcome.stat.unwrap().output, "expanded");
}

#[tokio::test]
async fn empty_command_fails_without_notification() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("blank", "   ").with_retries(3);

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(matches!(outcome.error, Some(TempusError::CmdIsEmpty)));
    // Configuration error: no notification, no retries.
    assert_eq!(bed.notifier.count(), 0);
    assert_eq!(outcome.metadata.error_count, 1);
    assert_eq!(outcome.metadata.number_of_finished_runs, 1);
    assert_eq!(outcome.stat.unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn templating_error_is_wrapped_and_notified() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("broken", "echo {{ job.name");

    let outcome = bed.engine.runner(job).run(&cache).await;

    match outcome.error {
        Some(TempusError::Template(msg)) => {
            assert!(msg.starts_with("error templatizing command"), "{msg}")
        }
        other => panic!("expected template error, got {other:?}"),
    }
    assert_eq!(bed.notifier.count(), 1);
}

// ============================================================================
// Retry behavior
// ============================================================================

#[tokio::test]
async fn zero_retries_means_single_dispatch() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("flaky", "false");

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(!outcome.succeeded());
    let stat = outcome.stat.unwrap();
    assert_eq!(stat.status, RunStatus::Failed);
    assert_eq!(stat.number_of_retries, 0);
    assert_eq!(outcome.metadata.error_count, 1);
    assert_eq!(outcome.metadata.number_of_finished_runs, 1);
    assert_eq!(bed.notifier.count(), 1);
    assert_eq!(bed.notifier.last_subject().unwrap(), "Job flaky Failed");
}

#[tokio::test]
async fn retries_then_success_inside_window() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "third_time.sh",
        r#"f="$1"
n=$(cat "$f" 2>/dev/null || echo 0)
n=$((n+1))
echo "$n" > "$f"
if [ "$n" -lt 3 ]; then
  echo "attempt $n failed" >&2
  exit 1
fi
echo ok
"#,
    );
    let state = dir.path().join("count");
    let job = Job::local(
        "third-time",
        format!("sh {} {}", script.display(), state.display()),
    )
    .with_retries(3)
    .with_schedule("R/2026-01-01T00:00:00Z/PT1M")
    .with_epsilon("1h")
    .unwrap();

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(outcome.succeeded());
    let stat = outcome.stat.unwrap();
    assert_eq!(stat.status, RunStatus::Success);
    assert_eq!(stat.number_of_retries, 2);
    assert_eq!(stat.output, "ok");

    // Every failing dispatch bumps error_count; the run itself counts once.
    assert_eq!(outcome.metadata.success_count, 1);
    assert_eq!(outcome.metadata.error_count, 2);
    assert_eq!(outcome.metadata.number_of_finished_runs, 1);
    assert_eq!(bed.notifier.count(), 2);
}

#[tokio::test]
async fn retries_exhausted_is_terminal_failure() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("always-fails", "false").with_retries(2);

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(!outcome.succeeded());
    let stat = outcome.stat.unwrap();
    assert_eq!(stat.status, RunStatus::Failed);
    assert_eq!(stat.number_of_retries, 2);
    // Three dispatches: the first plus two retries.
    assert_eq!(outcome.metadata.error_count, 3);
    assert_eq!(outcome.metadata.number_of_finished_runs, 1);
    assert_eq!(bed.notifier.count(), 3);
}

#[tokio::test]
async fn elapsed_epsilon_window_stops_retries() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("late", "false")
        .with_retries(3)
        .with_schedule("R/2026-01-01T00:00:00Z/PT1M")
        .with_next_run_at(bed.clock.now() - chrono::Duration::hours(2))
        .with_epsilon("1m")
        .unwrap();

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(!outcome.succeeded());
    let stat = outcome.stat.unwrap();
    // No retry was ever attempted.
    assert_eq!(stat.number_of_retries, 0);
    assert_eq!(outcome.metadata.error_count, 1);
    assert_eq!(bed.notifier.count(), 1);
}

// ============================================================================
// Disabled gate
// ============================================================================

#[tokio::test]
async fn disabled_job_short_circuits() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let mut job = Job::local("paused", "echo hi");
    job.disabled = true;

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(matches!(outcome.error, Some(TempusError::JobDisabled)));
    assert!(outcome.stat.is_none());
    assert!(outcome.metadata.last_attempted_run.is_some());
    assert_eq!(outcome.metadata.success_count, 0);
    assert_eq!(outcome.metadata.error_count, 0);
    assert_eq!(outcome.metadata.number_of_finished_runs, 0);
    assert_eq!(bed.notifier.count(), 0);
}

#[tokio::test]
async fn instant_success_bypass() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::local("instant", "false").with_instant_success();

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(outcome.succeeded());
    assert_eq!(outcome.metadata.success_count, 1);
}

#[tokio::test]
async fn preexisting_metadata_is_carried_forward() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let mut job = Job::local("veteran", "echo hi");
    job.metadata.success_count = 5;
    job.metadata.number_of_finished_runs = 7;

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert_eq!(outcome.metadata.success_count, 6);
    assert_eq!(outcome.metadata.number_of_finished_runs, 8);
}

// ============================================================================
// Remote execution
// ============================================================================

fn remote_job(url: String) -> Job {
    Job::remote(
        "hook",
        RemoteProperties {
            url,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn remote_success_with_default_expected_codes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_string("ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::remote(
        "hook",
        RemoteProperties {
            url: format!("{}/hook", server.uri()),
            body: "ping".into(),
            method: "post".into(),
            ..Default::default()
        },
    );
    let job_id = job.id.clone();

    let outcome = bed.engine.runner(job).run(&cache).await;

    assert!(outcome.succeeded());
    // Remote runs drop the terminal stat; the store holds the record.
    assert!(outcome.stat.is_none());
    let runs = cache.get_all_runs(&job_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Started);
}

#[tokio::test]
async fn remote_unexpected_status_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;

    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = remote_job(format!("{}/hook", server.uri()));

    let outcome = bed.engine.runner(job).run(&cache).await;

    match outcome.error {
        Some(TempusError::Remote(msg)) => {
            assert!(msg.contains("201"), "{msg}");
            assert!(msg.contains("created"), "{msg}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(outcome.stat.unwrap().status, RunStatus::Failed);
    assert_eq!(bed.notifier.count(), 1);
}

#[tokio::test]
async fn remote_expected_code_set_is_honored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nope"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let bed = testbed();
    let cache = MemoryJobCache::new();

    let accepted = Job::remote(
        "accepted",
        RemoteProperties {
            url: format!("{}/ok", server.uri()),
            expected_response_codes: vec![201, 202],
            ..Default::default()
        },
    );
    assert!(bed.engine.runner(accepted).run(&cache).await.succeeded());

    let rejected = Job::remote(
        "rejected",
        RemoteProperties {
            url: format!("{}/nope", server.uri()),
            expected_response_codes: vec![201, 202],
            ..Default::default()
        },
    );
    let outcome = bed.engine.runner(rejected).run(&cache).await;
    assert!(matches!(outcome.error, Some(TempusError::Remote(_))));
}

#[tokio::test]
async fn remote_sends_run_headers_and_bearer_token() {
    let server = MockServer::start().await;
    let bed = testbed();
    let engine = Engine::builder()
        .clock(Arc::new(bed.clock.clone()))
        .auth(Arc::new(StaticTokenProvider::new("tok")))
        .build();

    let cache = MemoryJobCache::new();
    let job = Job::remote(
        "authed",
        RemoteProperties {
            url: format!("{}/hook", server.uri()),
            method: "get".into(),
            headers: vec![("X-Env".into(), "prod".into())],
            ..Default::default()
        },
    );

    Mock::given(method("GET"))
        .and(path("/hook"))
        .and(header("Authorization", "Bearer tok"))
        .and(header("NextKala-JobId", job.id.as_str()))
        .and(header_exists("NextKala-RunId"))
        .and(header("X-Env", "prod"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = engine.runner(job).run(&cache).await;
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn remote_omits_authorization_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hook"))
        .and(NoHeader("authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = remote_job(format!("{}/hook", server.uri()));

    let outcome = bed.engine.runner(job).run(&cache).await;
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn remote_timeout_is_a_terminal_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("too late")
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let bed = testbed();
    let cache = MemoryJobCache::new();
    let job = Job::remote(
        "slow",
        RemoteProperties {
            url: format!("{}/slow", server.uri()),
            timeout: 1,
            ..Default::default()
        },
    );

    let outcome = bed.engine.runner(job).run(&cache).await;

    match outcome.error {
        Some(TempusError::Http(err)) => assert!(err.is_timeout(), "{err}"),
        other => panic!("expected timeout error, got {other:?}"),
    }
    // No response body was captured.
    assert_eq!(outcome.stat.unwrap().output, "");
}

// ============================================================================
// Dependent fan-out
// ============================================================================

#[tokio::test]
async fn dependents_run_in_declared_order_and_survive_sibling_failure() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let dir = tempfile::tempdir().unwrap();
    let append_fail = write_script(dir.path(), "append_fail.sh", "echo \"$1\" >> \"$2\"\nexit 1\n");
    let append_ok = write_script(dir.path(), "append_ok.sh", "echo \"$1\" >> \"$2\"\n");
    let order = dir.path().join("order.txt");

    let b = Job::local(
        "b",
        format!("sh {} B {}", append_fail.display(), order.display()),
    );
    let c = Job::local(
        "c",
        format!("sh {} C {}", append_ok.display(), order.display()),
    );
    cache.save(&b).await.unwrap();
    cache.save(&c).await.unwrap();

    let a = Job::local("a", "echo parent")
        .with_dependent(&b.id)
        .with_dependent(&c.id);

    let outcome = bed.engine.runner(a).run(&cache).await;

    // The parent's own outcome is unaffected by dependent failures.
    assert!(outcome.succeeded());
    assert_eq!(outcome.metadata.success_count, 1);

    let recorded = std::fs::read_to_string(&order).unwrap();
    assert_eq!(recorded, "B\nC\n");
    // B's failure was notified, C succeeded quietly.
    assert_eq!(bed.notifier.count(), 1);
    assert_eq!(bed.notifier.last_subject().unwrap(), "Job b Failed");
}

#[tokio::test]
async fn dependents_are_skipped_when_parent_fails() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let dir = tempfile::tempdir().unwrap();
    let append_ok = write_script(dir.path(), "append_ok.sh", "echo \"$1\" >> \"$2\"\n");
    let order = dir.path().join("order.txt");

    let child = Job::local(
        "child",
        format!("sh {} X {}", append_ok.display(), order.display()),
    );
    cache.save(&child).await.unwrap();

    let parent = Job::local("parent", "false").with_dependent(&child.id);
    let outcome = bed.engine.runner(parent).run(&cache).await;

    assert!(!outcome.succeeded());
    assert!(!order.exists());
}

#[tokio::test]
async fn missing_dependent_is_skipped_and_later_siblings_still_run() {
    let bed = testbed();
    let cache = MemoryJobCache::new();
    let dir = tempfile::tempdir().unwrap();
    let append_ok = write_script(dir.path(), "append_ok.sh", "echo \"$1\" >> \"$2\"\n");
    let order = dir.path().join("order.txt");

    let c = Job::local(
        "c",
        format!("sh {} C {}", append_ok.display(), order.display()),
    );
    cache.save(&c).await.unwrap();

    let a = Job::local("a", "echo parent")
        .with_dependent("no-such-job")
        .with_dependent(&c.id);

    let outcome = bed.engine.runner(a).run(&cache).await;

    assert!(outcome.succeeded());
    assert_eq!(std::fs::read_to_string(&order).unwrap(), "C\n");
}
