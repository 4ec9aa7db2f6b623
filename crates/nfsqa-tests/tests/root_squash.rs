//! Root squash across a glusterd restart, end to end against the simulator.

use nfsqa_cluster::{ClusterControl, SquashPolicy};
use nfsqa_remote::{FileProbe, RemoteTarget};
use nfsqa_tests::{
    registry, run_suite, FailureKind, GaneshaVolumeLifecycle, HarnessConfig, LifecycleState,
    MountConfig, RootSquashRestart, SimCluster, SimFault, TestRunner, TestStatus, Verdict,
};

fn config() -> HarnessConfig {
    HarnessConfig::example()
}

async fn run(config: &HarnessConfig, sim: &SimCluster) -> nfsqa_tests::TestOutcome {
    TestRunner::new(config, sim, sim)
        .run(&GaneshaVolumeLifecycle, &RootSquashRestart::new(config.scenario.clone()))
        .await
}

fn assert_fully_released(sim: &SimCluster) {
    assert!(sim.volumes().is_empty(), "volumes left: {:?}", sim.volumes());
    assert!(sim.mounted().is_empty(), "mounts left: {:?}", sim.mounted());
    assert!(!sim.is_exported("v1"));
}

#[tokio::test(start_paused = true)]
async fn test_root_squash_survives_restart() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    let outcome = run(&config, &sim).await;

    assert_eq!(outcome.verdict, Verdict::Pass, "{:?}", outcome.failures);
    assert_eq!(outcome.state, LifecycleState::Done);
    assert_eq!(outcome.teardown_runs, 1);
    assert_fully_released(&sim);

    let appends: Vec<String> = sim
        .commands()
        .into_iter()
        .filter(|(host, cmd)| host == "c1" && cmd.starts_with("echo hello >>"))
        .map(|(_, cmd)| cmd)
        .collect();
    assert_eq!(
        appends,
        vec![
            "echo hello >> /mnt/v1/file10".to_string(),
            "echo hello >> /mnt/v1/Squashfile5".to_string()
        ]
    );
    assert_eq!(sim.calls_of("restart_cluster_daemon"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_squash_lost_on_restart_fails_and_tears_down_once() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    sim.inject(SimFault::ResetSquashOnRestart);
    let outcome = run(&config, &sim).await;

    assert_eq!(outcome.verdict, Verdict::Fail);
    assert_eq!(outcome.state, LifecycleState::Done);
    let primary = outcome.primary_failure().unwrap();
    assert_eq!(primary.kind, FailureKind::Assertion);
    assert_eq!(primary.step, "edit root-owned file");

    assert_eq!(outcome.teardown_runs, 1);
    let calls = sim.calls();
    let teardown: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .skip_while(|c| *c != "are_peers_connected")
        .filter(|c| {
            matches!(
                *c,
                "set_root_squash" | "unmount_volume" | "unexport_volume" | "cleanup_volume"
            )
        })
        .collect();
    assert_eq!(
        teardown,
        vec!["set_root_squash", "unmount_volume", "unexport_volume", "cleanup_volume"]
    );
    assert_eq!(sim.calls_of("cleanup_volume"), 1);
    assert_fully_released(&sim);
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_aborts_before_body() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    sim.inject(SimFault::FailOperation("start_volume".to_string()));
    let outcome = run(&config, &sim).await;

    assert_eq!(outcome.verdict, Verdict::Error);
    assert_eq!(outcome.state, LifecycleState::Failed);
    assert_eq!(outcome.primary_failure().unwrap().kind, FailureKind::Setup);
    assert!(sim.commands().is_empty(), "body must not run");
    assert_eq!(sim.calls_of("cleanup_volume"), 1);
    assert_eq!(sim.calls_of("unexport_volume"), 0);
    assert_fully_released(&sim);
}

#[tokio::test(start_paused = true)]
async fn test_unexport_timeout_recorded_without_masking_verdict() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    sim.inject(SimFault::ResetSquashOnRestart);
    sim.inject(SimFault::FailOperation("unexport_volume".to_string()));
    let outcome = run(&config, &sim).await;

    assert_eq!(outcome.verdict, Verdict::Fail);
    assert_eq!(outcome.state, LifecycleState::Failed);
    assert_eq!(outcome.primary_failure().unwrap().kind, FailureKind::Assertion);
    let teardown: Vec<_> = outcome
        .failures
        .iter()
        .filter(|f| f.kind == FailureKind::Teardown)
        .collect();
    assert_eq!(teardown.len(), 1);
    assert_eq!(teardown[0].step, "wait for unexport");
    // cleanup still attempted after the failed step
    assert_eq!(sim.calls_of("cleanup_volume"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_client_fails_setup() {
    let mut config = config();
    config.mounts.push(MountConfig {
        client: "c2".to_string(),
        mountpoint: "/mnt/v1".to_string(),
        user: None,
        server: None,
    });
    let sim = SimCluster::from_config(&config);
    let outcome = run(&config, &sim).await;
    assert!(outcome.passed(), "{:?}", outcome.failures);

    let sim = SimCluster::from_config(&config);
    sim.inject(SimFault::Unreachable("c2".to_string()));
    let outcome = run(&config, &sim).await;
    // c2 cannot even be mounted
    assert_eq!(outcome.verdict, Verdict::Error);
    assert_eq!(outcome.primary_failure().unwrap().kind, FailureKind::Setup);
    assert_eq!(sim.calls_of("cleanup_volume"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_body_timeout_is_execution_error_and_tears_down() {
    let mut config = config();
    config.test_timeout_secs = 1;
    let sim = SimCluster::from_config(&config);
    // glusterd never comes back, so step 8 polls past the deadline
    sim.set_daemon_settle_checks(u32::MAX);
    let outcome = run(&config, &sim).await;

    assert_eq!(outcome.verdict, Verdict::Error);
    assert_eq!(outcome.state, LifecycleState::Done);
    let primary = outcome.primary_failure().unwrap();
    assert_eq!(primary.kind, FailureKind::Execution);
    assert_eq!(primary.step, "body");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.teardown_runs, 1);

    let calls = sim.calls();
    let teardown: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .skip_while(|c| *c != "restart_cluster_daemon")
        .filter(|c| {
            matches!(
                *c,
                "set_root_squash" | "unmount_volume" | "unexport_volume" | "cleanup_volume"
            )
        })
        .collect();
    assert_eq!(
        teardown,
        vec!["set_root_squash", "unmount_volume", "unexport_volume", "cleanup_volume"]
    );
    assert_fully_released(&sim);
}

#[tokio::test(start_paused = true)]
async fn test_set_root_squash_is_idempotent() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    sim.attach_mount("c1", "/mnt/v1", "v1");
    assert!(sim.set_root_squash("s1", "v1", true, true).await.unwrap());
    assert!(sim.set_root_squash("s1", "v1", true, true).await.unwrap());
    assert_eq!(
        sim.root_squash_policy("s1", "v1").await.unwrap(),
        Some(SquashPolicy::RootSquash)
    );

    let probe = FileProbe::new(&sim);
    let root = RemoteTarget::with_user("c1", "root");
    assert!(!probe.append_to_file(&root, "/mnt/v1/new", "hello").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_daemon_eventually_running_after_restart() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    sim.set_daemon_settle_checks(5);
    assert!(sim.restart_cluster_daemon(&config.servers).await.unwrap());
    assert!(!sim.is_cluster_daemon_running(&config.servers).await.unwrap());
    assert!(sim.wait_for_daemon_running(&config.servers).await.unwrap());
    assert!(sim.wait_for_peers_connected("s1", &config.servers).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_suite_report() {
    let config = config();
    let sim = SimCluster::from_config(&config);
    let report = run_suite(&config, &sim, &sim, &registry()).await;
    assert!(report.is_passing(), "{}", report.summary_line());
    assert_eq!(report.cases[0].status, TestStatus::Pass);
    assert!(report.to_junit_xml().contains("root_squash_enable_glusterd_restart"));
}
