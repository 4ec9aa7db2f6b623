//! Registered test cases and the suite runner.
//!
//! A case declares the volume types and mount protocols it is meaningful
//! for; cases that do not match the configured environment are reported
//! as skipped rather than run.

use std::time::Instant;

use nfsqa_cluster::{ClusterControl, VolumeType};
use nfsqa_remote::{MountProtocol, RemoteExecutor};

use crate::config::HarnessConfig;
use crate::lifecycle::{GaneshaVolumeLifecycle, TestLifecycle, TestRunner};
use crate::report::{TestCaseResult, TestSuiteReport};
use crate::scenario::{RootSquashRestart, Scenario};

pub const SUITE_NAME: &str = "nfs-ganesha";

pub struct TestCase {
    pub name: &'static str,
    pub volume_types: &'static [VolumeType],
    pub protocols: &'static [MountProtocol],
    pub scenario: fn(&HarnessConfig) -> Box<dyn Scenario>,
    pub lifecycle: fn(&HarnessConfig) -> Box<dyn TestLifecycle>,
}

impl TestCase {
    /// Why the case cannot run against `config`, if it cannot.
    pub fn skip_reason(&self, config: &HarnessConfig) -> Option<String> {
        if !self.volume_types.contains(&config.volume.vtype) {
            return Some(format!("does not run on {} volumes", config.volume.vtype));
        }
        if !self.protocols.contains(&config.protocol) {
            return Some(format!("does not run over {}", config.protocol));
        }
        None
    }
}

fn root_squash_restart(config: &HarnessConfig) -> Box<dyn Scenario> {
    Box::new(RootSquashRestart::new(config.scenario.clone()))
}

fn ganesha_volume(_: &HarnessConfig) -> Box<dyn TestLifecycle> {
    Box::new(GaneshaVolumeLifecycle)
}

/// Every known case.
pub fn registry() -> Vec<TestCase> {
    vec![TestCase {
        name: RootSquashRestart::NAME,
        volume_types: &VolumeType::ALL,
        protocols: &[MountProtocol::Nfs],
        scenario: root_squash_restart,
        lifecycle: ganesha_volume,
    }]
}

/// Cases whose name contains `filter`, or all of them.
pub fn select(filter: Option<&str>) -> Vec<TestCase> {
    registry()
        .into_iter()
        .filter(|c| filter.map_or(true, |f| c.name.contains(f)))
        .collect()
}

/// Runs `cases` one after another against the configured environment.
pub async fn run_suite(
    config: &HarnessConfig,
    exec: &dyn RemoteExecutor,
    cluster: &dyn ClusterControl,
    cases: &[TestCase],
) -> TestSuiteReport {
    let started = Instant::now();
    let mut report = TestSuiteReport::new(SUITE_NAME);
    let runner = TestRunner::new(config, exec, cluster);

    for case in cases {
        if let Some(reason) = case.skip_reason(config) {
            tracing::info!(test = case.name, reason = reason.as_str(), "skipping");
            report.add_result(TestCaseResult::skipped(case.name, SUITE_NAME, &reason));
            continue;
        }
        tracing::info!(
            test = case.name,
            volume_type = %config.volume.vtype,
            protocol = %config.protocol,
            "running"
        );
        let scenario = (case.scenario)(config);
        let lifecycle = (case.lifecycle)(config);
        let outcome = runner.run(lifecycle.as_ref(), scenario.as_ref()).await;
        report.add_result(TestCaseResult::from_outcome(SUITE_NAME, &outcome));
    }

    report.duration = started.elapsed();
    tracing::info!(summary = %report.summary_line(), "suite finished");
    report
}
