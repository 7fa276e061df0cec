//! Unit tests for the run orchestrator.

use super::*;
use crate::config::{ProbeConfig, SshConfig, StageConfig};
use crate::pool::SessionToken;
use crate::remote::SSH_CONNECTION_DROPPED;
use crate::test_support::{ScriptedPool, ScriptedPoolError, ScriptedRunner};
use rstest::{fixture, rstest};

/// Runner calls per reboot cycle: the reboot command and one ping.
const REBOOT_CALLS: usize = 2;

struct Harness {
    orchestrator: Orchestrator<ScriptedPool, ScriptedRunner>,
    runner: ScriptedRunner,
}

impl Harness {
    fn new(pool: ScriptedPool) -> Self {
        let runner = ScriptedRunner::new();
        let ssh = SshConfig {
            bin: String::from("ssh"),
            user: String::from("root"),
            connect_timeout_secs: 180,
            known_hosts_file: String::from("/dev/null"),
            disable_tty: false,
        };
        let probe = ProbeConfig {
            ping_bin: String::from("ping"),
            max_attempts: 20,
            attempt_timeout_secs: 10,
            settle_before_secs: 0,
            settle_after_secs: 0,
        };
        let stages = StageConfig {
            repo_base_url: String::from("https://github.com/systemd/"),
            repo_name: String::from("systemd-centos-ci"),
        };
        let orchestrator = Orchestrator::new(
            pool,
            RemoteExecutor::new(ssh, runner.clone()).expect("ssh config"),
            LivenessProber::new(probe, runner.clone()).expect("probe config"),
            StagePlan::new(&stages, Some("42")).expect("plan"),
        );
        Self {
            orchestrator,
            runner,
        }
    }

    fn script_stage(&self, code: i32) {
        self.runner.push_exit_code(code);
    }

    fn script_reboot(&self) {
        self.runner.push_exit_code(SSH_CONNECTION_DROPPED);
        self.runner.push_success();
    }

    /// Scripts bootstrap and both test suites, leaving the host after three
    /// reboots.
    fn script_through_testing(&self) {
        self.script_stage(0);
        self.script_reboot();
        for _ in 0..2 {
            self.script_stage(0);
            self.script_reboot();
        }
    }

    fn script_verify_iteration(&self, boots: i32) {
        self.script_stage(boots);
        self.script_reboot();
        self.script_stage(0);
    }

    fn script_happy_run(&self) {
        self.script_through_testing();
        for boots in 3..7 {
            self.script_verify_iteration(boots);
        }
    }

    fn remote_commands(&self) -> Vec<String> {
        self.runner
            .invocations()
            .into_iter()
            .filter(|call| call.program == "ssh")
            .filter_map(|call| call.last_arg())
            .collect()
    }

    async fn run(&self, target: HostTarget, keep: bool) -> RunReport<ScriptedPoolError> {
        let request = RunRequest { target, keep };
        self.orchestrator.run(&request, &LogSink::terminal()).await
    }
}

fn acquire() -> HostTarget {
    HostTarget::Acquire(PoolRequest {
        version: String::from("7"),
        arch: String::from("x86_64"),
    })
}

#[fixture]
fn harness() -> Harness {
    Harness::new(ScriptedPool::with_lease("h1", "s1"))
}

#[rstest]
#[tokio::test]
async fn successful_run_releases_host_once(harness: Harness) {
    harness.script_happy_run();

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.release, ReleaseStatus::Released);
    assert_eq!(harness.orchestrator.pool().release_calls(), vec![SessionToken::new("s1")]);
    assert_eq!(harness.orchestrator.pool().acquire_calls(), 1);
    assert_eq!(report.reboot_count, 7);
    assert_eq!(harness.runner.pending(), 0);
}

#[rstest]
#[tokio::test]
async fn successful_run_issues_stages_in_order(harness: Harness) {
    harness.script_happy_run();

    harness.run(acquire(), false).await;

    let commands = harness.remote_commands();
    let reboot = "journalctl --no-pager -b && reboot";
    let boot_check = "exit `journalctl --list-boots | wc -l`";
    let failed_units = "systemctl --failed --all | grep -q '^0 loaded'";
    let mut expected = vec![
        String::from(concat!(
            "yum install -y git && ",
            "git clone https://github.com/systemd/systemd-centos-ci.git && ",
            "systemd-centos-ci/slave/bootstrap.sh 42"
        )),
        String::from(reboot),
        String::from("systemd-centos-ci/slave/testsuite.sh"),
        String::from(reboot),
        String::from("cd systemd-centos-ci/slave; ./system-tests.sh"),
        String::from(reboot),
    ];
    for _ in 0..VERIFY_ITERATIONS {
        expected.push(String::from(boot_check));
        expected.push(String::from(reboot));
        expected.push(String::from(failed_units));
    }
    assert_eq!(commands, expected);
}

#[rstest]
#[tokio::test]
async fn every_reboot_is_followed_by_a_probe(harness: Harness) {
    harness.script_happy_run();

    harness.run(acquire(), false).await;

    let invocations = harness.runner.invocations();
    for (index, call) in invocations.iter().enumerate() {
        if call.last_arg().is_some_and(|cmd| cmd.ends_with("reboot")) {
            let next = invocations.get(index + 1).expect("probe after reboot");
            assert_eq!(next.program, "ping", "call {index} not followed by ping");
        }
    }
}

#[rstest]
#[tokio::test]
async fn failing_test_suite_stops_before_verify_loop(harness: Harness) {
    harness.script_stage(0);
    harness.script_reboot();
    harness.script_stage(1);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.exit_code(), FAILURE_EXIT_CODE);
    assert_eq!(report.failed_in, Some(EngineState::Testing));
    assert_eq!(report.reboot_count, 1);
    assert!(matches!(
        report.failure,
        Some(EngineError::Stage { ref stage, source: RemoteError::CommandFailed { actual: Some(1), expected: 0, .. } })
            if stage == "testsuite"
    ));
    assert_eq!(harness.orchestrator.pool().release_calls(), vec![SessionToken::new("s1")]);
    assert!(
        !harness
            .remote_commands()
            .iter()
            .any(|cmd| cmd.contains("list-boots")),
        "verify loop must not run"
    );
    assert_eq!(harness.runner.invocations().len(), 4);
}

#[rstest]
#[tokio::test]
async fn failing_bootstrap_releases_host(harness: Harness) {
    harness.script_stage(2);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.failed_in, Some(EngineState::Bootstrapping));
    assert_eq!(report.reboot_count, 0);
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
    assert_eq!(harness.runner.invocations().len(), 1);
}

#[rstest]
#[tokio::test]
async fn reboot_that_exits_cleanly_is_a_failure(harness: Harness) {
    harness.script_stage(0);
    harness.script_stage(0);

    let report = harness.run(acquire(), false).await;

    assert!(matches!(
        report.failure,
        Some(EngineError::Stage { ref stage, .. }) if stage == "reboot"
    ));
    assert_eq!(report.reboot_count, 0);
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
#[case(2)]
#[case(4)]
#[tokio::test]
async fn boot_counter_mismatch_is_a_consistency_error(harness: Harness, #[case] boots: i32) {
    harness.script_through_testing();
    harness.script_stage(boots);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.failed_in, Some(EngineState::VerifyLoop(0)));
    assert!(
        matches!(
            report.failure,
            Some(EngineError::Consistency { expected: 3, actual: Some(actual) }) if actual == boots
        ),
        "{:?}",
        report.failure
    );
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
#[tokio::test]
async fn boot_counter_without_exit_status_is_a_consistency_error(harness: Harness) {
    harness.script_through_testing();
    harness.runner.push_missing_exit_code();

    let report = harness.run(acquire(), false).await;

    assert!(
        matches!(
            report.failure,
            Some(EngineError::Consistency {
                expected: 3,
                actual: None
            })
        ),
        "{:?}",
        report.failure
    );
    assert_eq!(
        report.failure.map(|err| err.to_string()).as_deref(),
        Some("boot counter mismatch: host reports no boot count, engine counted 3 reboots")
    );
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
#[tokio::test]
async fn boot_counter_check_tracks_each_iteration(harness: Harness) {
    harness.script_through_testing();
    harness.script_verify_iteration(3);
    harness.script_verify_iteration(4);
    harness.script_stage(4);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.failed_in, Some(EngineState::VerifyLoop(2)));
    assert!(matches!(
        report.failure,
        Some(EngineError::Consistency {
            expected: 5,
            actual: Some(4)
        })
    ));
    assert_eq!(report.reboot_count, 5);
}

#[rstest]
#[tokio::test]
async fn failed_units_abort_the_verify_loop(harness: Harness) {
    harness.script_through_testing();
    harness.script_stage(3);
    harness.script_reboot();
    harness.script_stage(1);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.failed_in, Some(EngineState::VerifyLoop(0)));
    assert!(matches!(
        report.failure,
        Some(EngineError::Stage { ref stage, .. }) if stage == "failed-units"
    ));
    assert_eq!(report.reboot_count, 4);
}

#[rstest]
#[tokio::test]
async fn unreachable_host_fails_the_run(harness: Harness) {
    harness.script_stage(0);
    harness.runner.push_exit_code(SSH_CONNECTION_DROPPED);
    for _ in 0..20 {
        harness.runner.push_exit_code(1);
    }

    let report = harness.run(acquire(), false).await;

    assert!(matches!(
        report.failure,
        Some(EngineError::Probe {
            reboot: 1,
            source: ProbeError::HostUnreachable { attempts: 20, .. }
        })
    ));
    assert_eq!(report.reboot_count, 0);
    assert_eq!(harness.runner.pending(), 0);
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
#[tokio::test]
async fn keep_retains_host(harness: Harness) {
    harness.script_happy_run();

    let report = harness.run(acquire(), true).await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.release, ReleaseStatus::Retained);
    assert!(harness.orchestrator.pool().release_calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn keep_retains_host_after_failure(harness: Harness) {
    harness.script_stage(1);

    let report = harness.run(acquire(), true).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.release, ReleaseStatus::Retained);
    assert!(harness.orchestrator.pool().release_calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn supplied_host_is_neither_acquired_nor_released(harness: Harness) {
    harness.script_happy_run();

    let report = harness
        .run(HostTarget::Supplied(String::from("preprovisioned")), false)
        .await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.release, ReleaseStatus::NotLeased);
    assert_eq!(harness.orchestrator.pool().acquire_calls(), 0);
    assert!(harness.orchestrator.pool().release_calls().is_empty());
    let invocations = harness.runner.invocations();
    assert!(
        invocations
            .iter()
            .filter(|call| call.program == "ssh")
            .all(|call| call.args.iter().any(|arg| arg == "preprovisioned"))
    );
}

#[rstest]
#[tokio::test]
async fn acquire_failure_runs_no_stage() {
    let pool = ScriptedPool::with_lease("h1", "s1");
    pool.fail_on_acquire();
    let harness = Harness::new(pool);

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.failed_in, Some(EngineState::Provisioning));
    assert_eq!(report.release, ReleaseStatus::NotLeased);
    assert!(matches!(
        report.failure,
        Some(EngineError::Acquire(ScriptedPoolError::Acquire))
    ));
    assert!(harness.runner.invocations().is_empty());
    assert!(harness.orchestrator.pool().release_calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn release_failure_after_success_fails_the_run() {
    let pool = ScriptedPool::with_lease("h1", "s1");
    pool.fail_on_release();
    let harness = Harness::new(pool);
    harness.script_happy_run();

    let report = harness.run(acquire(), false).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.exit_code(), FAILURE_EXIT_CODE);
    assert!(matches!(
        report.failure,
        Some(EngineError::Release(ScriptedPoolError::Release))
    ));
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
#[tokio::test]
async fn release_failure_after_stage_failure_keeps_stage_error() {
    let pool = ScriptedPool::with_lease("h1", "s1");
    pool.fail_on_release();
    let harness = Harness::new(pool);
    harness.script_stage(1);

    let report = harness.run(acquire(), false).await;

    assert!(matches!(report.failure, Some(EngineError::Stage { .. })));
    assert_eq!(
        report.release,
        ReleaseStatus::Failed {
            message: String::from("release failure")
        }
    );
    assert_eq!(harness.orchestrator.pool().release_calls().len(), 1);
}

#[rstest]
fn consistency_error_message_names_both_counts() {
    let err: EngineError<ScriptedPoolError> = EngineError::Consistency {
        expected: 3,
        actual: Some(4),
    };

    assert_eq!(
        err.to_string(),
        "boot counter mismatch: host reports 4 boots, engine counted 3 reboots"
    );
}

#[rstest]
fn session_tracks_host_lifecycle() {
    let sink = LogSink::terminal();
    let mut session = Session::new(
        Host::leased(crate::pool::HostLease {
            hostname: String::from("h1"),
            token: SessionToken::new("s1"),
        }),
        &sink,
        false,
    );
    assert_eq!(session.host().state(), HostState::Acquired);
    assert_eq!(session.state(), EngineState::Provisioning);
    assert_eq!(session.outcome(), Outcome::Pending);

    session.enter(EngineState::Bootstrapping);
    assert_eq!(session.host().state(), HostState::InUse);

    assert_eq!(session.record_reboot(), 1);
    assert_eq!(session.record_reboot(), 2);

    session.finish(Outcome::Success);
    session.mark_released();
    assert_eq!(session.state(), EngineState::Done(Outcome::Success));
    assert_eq!(session.host().state(), HostState::Released);
}

#[rstest]
fn supplied_host_is_in_use_but_never_released() {
    let sink = LogSink::terminal();
    let mut session = Session::new(Host::supplied("box.example"), &sink, false);
    assert_eq!(session.host().state(), HostState::Unallocated);
    assert!(session.host().token().is_none());

    session.enter(EngineState::Bootstrapping);
    assert_eq!(session.host().state(), HostState::InUse);

    session.finish(Outcome::Success);
    assert_eq!(session.host().state(), HostState::InUse);
}

#[rstest]
fn report_exit_code_maps_outcome() {
    let report: RunReport<ScriptedPoolError> = RunReport {
        outcome: Outcome::Failed,
        failed_in: None,
        reboot_count: 0,
        elapsed: Duration::ZERO,
        release: ReleaseStatus::NotLeased,
        failure: None,
    };

    assert_eq!(report.exit_code(), 255);
}
