//! End-to-end job lifecycle scenarios.
//!
//! The external registry/cluster tools are replaced by generated shell
//! stubs, so these tests exercise the real pipeline: stage sequencing,
//! retry with backoff, stop handling, log streaming, progress counting,
//! reports, and restart recovery.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use uuid::Uuid;

use pakmirror_core::config::Config;
use pakmirror_core::jobs::{JobMode, JobRegistry, JobSpec, JobStatus, JobView, Stage, StageOutcome};
use pakmirror_core::logs::{LogStream, TailEvent};
use pakmirror_core::notify::NoopDispatcher;

const COMPONENT: &str = "platform-navigator";
const VERSION: &str = "1.0";

/// Stub-tool behavior knobs baked into the generated scripts.
#[derive(Default)]
struct StubBehavior {
    /// `podman login` fails this many times before succeeding.
    auth_failures: u32,
    /// `ibm-pak get` always fails.
    fetch_fails: bool,
    /// The mirror stage blocks (until killed) after emitting its markers.
    slow_mirror: bool,
}

struct TestEnv {
    home: TempDir,
    _bin: TempDir,
    registry: JobRegistry,
}

impl TestEnv {
    fn new(behavior: StubBehavior) -> Self {
        let home = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();

        let cache_dir = home
            .path()
            .join(".ibm-pak/data/mirror")
            .join(COMPONENT)
            .join(VERSION);
        let mapping_file = cache_dir.join("images-mapping-to-filesystem.txt");
        let slow_flag = home.path().join("slow-mirror");
        if behavior.slow_mirror {
            std::fs::write(&slow_flag, "").unwrap();
        }

        let fetch_snippet = if behavior.fetch_fails {
            "echo 'fetch failed (simulated)' >&2; exit 1"
        } else {
            "exit 0"
        };
        let oc = format!(
            r#"#!/bin/sh
if [ "$1" = "ibm-pak" ] && [ "$2" = "--version" ]; then exit 0; fi
if [ "$1" = "ibm-pak" ]; then
  case "$2" in
    get) {fetch_snippet} ;;
    generate)
      mkdir -p "{cache_dir}"
      printf 'cp.icr.io/cp/a@sha256:aaa=dst/a\ncp.icr.io/cp/b@sha256:bbb=dst/b\ncp.icr.io/cp/c@sha256:ccc=dst/c\n' > "{mapping_file}"
      exit 0 ;;
    config) exit 0 ;;
  esac
  exit 1
fi
if [ "$1" = "image" ]; then
  echo "Copying blob sha256:aaa"
  echo "Copying blob sha256:bbb"
  echo "Copying blob sha256:ccc"
  if [ -f "{slow_flag}" ]; then exec sleep 30; fi
  echo "info: Mirroring completed"
  exit 0
fi
exit 1
"#,
            fetch_snippet = fetch_snippet,
            cache_dir = cache_dir.display(),
            mapping_file = mapping_file.display(),
            slow_flag = slow_flag.display(),
        );

        let login_count = home.path().join("login-count");
        let podman = format!(
            r#"#!/bin/sh
count_file="{login_count}"
n=$(cat "$count_file" 2>/dev/null || echo 0)
n=$((n+1))
echo "$n" > "$count_file"
if [ "$n" -le {auth_failures} ]; then
  echo "login failed (simulated)" >&2
  exit 1
fi
exit 0
"#,
            login_count = login_count.display(),
            auth_failures = behavior.auth_failures,
        );

        let oc_path = write_stub(bin.path(), "oc", &oc);
        let podman_path = write_stub(bin.path(), "podman", &podman);

        let mut config = Config::default();
        config.mirror.home_dir = home.path().to_path_buf();
        config.mirror.min_disk_space_gb = 0;
        config.mirror.retry_base_delay = Duration::from_millis(5);
        config.mirror.stage_timeout = Duration::from_secs(10);
        config.mirror.mirror_timeout = Duration::from_secs(60);
        config.mirror.entitlement_key = Some("test-entitlement-key".to_string());
        config.mirror.registry_auth_file = home.path().join("no-such-auth.json");
        config.mirror.check_catalog_reachability = false;
        config.tools.cluster_cli = oc_path.display().to_string();
        config.tools.registry_cli = podman_path.display().to_string();

        let registry = JobRegistry::new(Arc::new(config), Arc::new(NoopDispatcher));
        Self {
            home,
            _bin: bin,
            registry,
        }
    }

    fn spec(&self, name: &str, mode: JobMode) -> JobSpec {
        JobSpec {
            component: COMPONENT.into(),
            version: VERSION.into(),
            name: name.into(),
            mode,
            ..Default::default()
        }
    }

    async fn wait_terminal(&self, id: Uuid) -> JobView {
        for _ in 0..600 {
            let view = self.registry.get(id).unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    async fn wait_status(&self, id: Uuid, status: JobStatus) -> JobView {
        for _ in 0..600 {
            let view = self.registry.get(id).unwrap();
            if view.status == status {
                return view;
            }
            assert!(
                !view.status.is_terminal(),
                "job reached terminal status {} while waiting for {}",
                view.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached status {}", id, status);
    }
}

fn write_stub(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn stage_records(view: &JobView, stage: Stage) -> Vec<StageOutcome> {
    view.stage_history
        .iter()
        .filter(|r| r.stage == stage)
        .map(|r| r.outcome)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════════════

/// Scenario A: a dry-run job runs the whole pipeline to completion and
/// produces a report, without any real transfer.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn scenario_a_dry_run_completes_with_report() {
    let env = TestEnv::new(StubBehavior::default());
    let created = env
        .registry
        .create(env.spec("dry-run-job", JobMode::DryRun))
        .unwrap();
    assert_eq!(created.status, JobStatus::Pending);

    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.total_images, 3);
    assert_eq!(done.completed_images, 3);

    // Every stage ran exactly once.
    for stage in [
        Stage::Preflight,
        Stage::Authenticate,
        Stage::Fetch,
        Stage::GenerateManifests,
        Stage::Mirror,
    ] {
        assert_eq!(
            stage_records(&done, stage),
            vec![StageOutcome::Succeeded],
            "unexpected history for {:?}",
            stage
        );
    }

    let report_path = env.registry.report_path(created.id.0).unwrap();
    let report = std::fs::read_to_string(report_path).unwrap();
    assert!(report.contains("Status: completed"));
    assert!(report.contains("Total Images: 3"));

    // The dry-run flag reached the mirror tool.
    let app_log = env
        .registry
        .read_log(created.id.0, LogStream::App, None)
        .unwrap()
        .join("\n");
    assert!(app_log.contains("--dry-run"));
}

/// Scenario B: stopping a job mid-mirror yields `stopped`, a report,
/// and no surviving external process.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn scenario_b_stop_mid_mirror() {
    let env = TestEnv::new(StubBehavior {
        slow_mirror: true,
        ..Default::default()
    });
    let created = env
        .registry
        .create(env.spec("stop-job", JobMode::Standard))
        .unwrap();

    let mirroring = env.wait_status(created.id.0, JobStatus::Mirroring).await;
    // Wait for the active process handle to appear.
    let pid = {
        let mut pid = mirroring.active_pid;
        for _ in 0..100 {
            if pid.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            pid = env.registry.get(created.id.0).unwrap().active_pid;
        }
        pid.expect("mirroring job should expose its active pid")
    };

    env.registry.request_stop(created.id.0).unwrap();
    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Stopped);
    assert!(done.active_pid.is_none());
    assert!(!Path::new(&format!("/proc/{}", pid)).exists());

    let report_path = env.registry.report_path(created.id.0).unwrap();
    let report = std::fs::read_to_string(report_path).unwrap();
    assert!(report.contains("Status: stopped"));
}

/// Scenario C: the authenticate stage fails twice, succeeds on the
/// third attempt, and the job still completes. Exactly three history
/// entries exist for the stage.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn scenario_c_auth_retries_then_succeeds() {
    let env = TestEnv::new(StubBehavior {
        auth_failures: 2,
        ..Default::default()
    });
    let created = env
        .registry
        .create(env.spec("retry-auth-job", JobMode::Standard))
        .unwrap();

    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);

    let auth = stage_records(&done, Stage::Authenticate);
    assert_eq!(
        auth,
        vec![
            StageOutcome::Failed,
            StageOutcome::Failed,
            StageOutcome::Succeeded
        ]
    );
}

/// Scenario D: a second create with the same name while the first is
/// still active fails with DuplicateName.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn scenario_d_duplicate_name_while_active() {
    let env = TestEnv::new(StubBehavior {
        slow_mirror: true,
        ..Default::default()
    });
    let first = env
        .registry
        .create(env.spec("dup-job", JobMode::Standard))
        .unwrap();

    let err = env
        .registry
        .create(env.spec("dup-job", JobMode::Standard))
        .unwrap_err();
    assert_eq!(err.code(), pakmirror_core::ErrorCode::DuplicateName);

    // Cleanup: stop the first job so its stub process dies promptly.
    env.wait_status(first.id.0, JobStatus::Mirroring).await;
    env.registry.request_stop(first.id.0).unwrap();
    env.wait_terminal(first.id.0).await;
}

/// A failed fetch falls back to the local package cache when one exists
/// and the job still completes; the fallback is visible in history.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn fetch_falls_back_to_cache() {
    let env = TestEnv::new(StubBehavior {
        fetch_fails: true,
        ..Default::default()
    });
    // Pre-populate the package cache so the fallback applies.
    let cache_dir = env
        .home
        .path()
        .join(".ibm-pak/data/mirror")
        .join(COMPONENT)
        .join(VERSION);
    std::fs::create_dir_all(&cache_dir).unwrap();

    let created = env
        .registry
        .create(env.spec("cache-fallback-job", JobMode::Standard))
        .unwrap();
    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);

    let fetch = stage_records(&done, Stage::Fetch);
    // Three failed attempts, the last downgraded to a warning.
    assert_eq!(fetch.len(), 3);
    assert_eq!(fetch[0], StageOutcome::Failed);
    assert_eq!(fetch[1], StageOutcome::Failed);
    assert_eq!(fetch[2], StageOutcome::Warning);
}

/// A failed fetch with no local cache is fatal.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn fetch_failure_without_cache_is_fatal() {
    let env = TestEnv::new(StubBehavior {
        fetch_fails: true,
        ..Default::default()
    });
    let created = env
        .registry
        .create(env.spec("fetch-fail-job", JobMode::Standard))
        .unwrap();
    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.failure_detail.is_some());
}

/// A retried job keeps its identity, resumes from the surviving mapping
/// file, and appends to the same log files.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn retry_resumes_from_mapping_file() {
    let env = TestEnv::new(StubBehavior {
        fetch_fails: true,
        ..Default::default()
    });
    let created = env
        .registry
        .create(env.spec("resume-job", JobMode::Standard))
        .unwrap();
    let failed = env.wait_terminal(created.id.0).await;
    assert_eq!(failed.status, JobStatus::Failed);

    // A previous run left a mapping file behind.
    let cache_dir = env
        .home
        .path()
        .join(".ibm-pak/data/mirror")
        .join(COMPONENT)
        .join(VERSION);
    std::fs::create_dir_all(&cache_dir).unwrap();
    std::fs::write(
        cache_dir.join("images-mapping-to-filesystem.txt"),
        "cp.icr.io/cp/a@sha256:aaa=dst/a\ncp.icr.io/cp/b@sha256:bbb=dst/b\n",
    )
    .unwrap();

    let log_lines_before = env
        .registry
        .read_log(created.id.0, LogStream::App, None)
        .unwrap()
        .len();

    let retried = env
        .registry
        .retry(created.id.0, Default::default())
        .unwrap();
    assert_eq!(retried.id, created.id);
    assert_eq!(retried.retry_count, 1);

    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.total_images, 2);
    // Resumed from the mapping file: no fetch or manifest stages this time.
    assert!(stage_records(&done, Stage::Fetch).is_empty());
    assert!(stage_records(&done, Stage::GenerateManifests).is_empty());

    // Log files were appended, never truncated.
    let log_lines_after = env
        .registry
        .read_log(created.id.0, LogStream::App, None)
        .unwrap()
        .len();
    assert!(log_lines_after > log_lines_before);
}

/// A live tailer attached before the mirror stage sees the replayed
/// history first, then new lines, each exactly once and in order.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn live_tail_replays_then_follows() {
    let env = TestEnv::new(StubBehavior::default());
    let created = env
        .registry
        .create(env.spec("tail-job", JobMode::Standard))
        .unwrap();

    let mut subscription = env
        .registry
        .subscribe_log(created.id.0, LogStream::Mirror, true)
        .unwrap();

    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);

    let mut seen = Vec::new();
    for _ in 0..4 {
        match subscription.next_event().await {
            Some(TailEvent::Line(line)) => seen.push(line),
            other => panic!("unexpected tail event: {:?}", other),
        }
    }
    assert_eq!(
        seen,
        vec![
            "Copying blob sha256:aaa",
            "Copying blob sha256:bbb",
            "Copying blob sha256:ccc",
            "info: Mirroring completed",
        ]
    );

    let file_lines = env
        .registry
        .read_log(created.id.0, LogStream::Mirror, None)
        .unwrap();
    assert_eq!(file_lines.len(), 4);
}

/// The entitlement key never reaches any log stream.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn secrets_never_reach_logs() {
    let env = TestEnv::new(StubBehavior::default());
    let created = env
        .registry
        .create(env.spec("secret-job", JobMode::Standard))
        .unwrap();
    let done = env.wait_terminal(created.id.0).await;
    assert_eq!(done.status, JobStatus::Completed);

    for stream in [LogStream::App, LogStream::Mirror] {
        let content = env
            .registry
            .read_log(created.id.0, stream, None)
            .unwrap()
            .join("\n");
        assert!(!content.contains("test-entitlement-key"));
    }
    let sidecar = std::fs::read_to_string(
        env.home.path().join("secret-job").join("job.json"),
    )
    .unwrap();
    assert!(!sidecar.contains("test-entitlement-key"));
}

/// After a restart, a job that was mid-pipeline is recovered as failed
/// and can be retried through the same registry.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn restart_recovery_then_retry() {
    let env = TestEnv::new(StubBehavior {
        slow_mirror: true,
        ..Default::default()
    });
    let created = env
        .registry
        .create(env.spec("recovery-job", JobMode::Standard))
        .unwrap();
    env.wait_status(created.id.0, JobStatus::Mirroring).await;
    env.registry.request_stop(created.id.0).unwrap();
    env.wait_terminal(created.id.0).await;

    // Simulate a restart: rewrite the sidecar as if the server had died
    // mid-mirror, then build a fresh registry over the same home dir.
    let sidecar_path = env.home.path().join("recovery-job").join("job.json");
    let mut sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&sidecar_path).unwrap()).unwrap();
    sidecar["status"] = serde_json::json!("mirroring");
    std::fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar).unwrap()).unwrap();

    let mut config = Config::default();
    config.mirror.home_dir = env.home.path().to_path_buf();
    let recovered_registry =
        JobRegistry::new(Arc::new(config), Arc::new(NoopDispatcher));
    recovered_registry.recover().unwrap();

    let view = recovered_registry.get(created.id.0).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(
        view.failure_detail.as_deref(),
        Some("interrupted by server restart")
    );
}
