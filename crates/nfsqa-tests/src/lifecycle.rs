//! Test lifecycle: setup → body → teardown with guaranteed cleanup.
//!
//! The runner walks `Idle → SettingUp → Running → TearingDown → Done`.
//! `Failed` is entered from setup (after partially acquired resources are
//! released) or when any teardown step fails. Teardown runs exactly once
//! per run whatever the body did, releasing resources in reverse order of
//! acquisition.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use nfsqa_cluster::{poll_until, ClusterControl, ClusterError};
use nfsqa_remote::{MountProtocol, RemoteExecutor};
use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::context::{Resource, TestContext};
use crate::error::{AtStep, FailureKind, FailureRecord, StepError};
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    SettingUp,
    Running,
    TearingDown,
    Done,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Done | LifecycleState::Failed)
    }

    /// Whether the runner may move from `self` to `next`.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Idle, SettingUp) | (SettingUp, Running) | (Running, TearingDown) | (TearingDown, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Acquires the environment a test body needs and gives it back.
///
/// Implementations register every acquisition on the context with
/// [`TestContext::acquire`]; the default [`TestLifecycle::teardown`] then
/// releases exactly those, newest first.
#[async_trait]
pub trait TestLifecycle: Send + Sync {
    /// Checks shared by every test of a class (cluster readiness).
    async fn setup_class(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError>;

    /// Per-test acquisitions.
    async fn setup(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError>;

    /// Gives back one resource.
    async fn release(&self, ctx: &mut TestContext<'_>, resource: &Resource) -> Result<(), StepError>;

    /// Releases everything still held. A failing step is recorded and the
    /// remaining steps are still attempted.
    async fn teardown(&self, ctx: &mut TestContext<'_>) -> Vec<StepError> {
        let mut errors = Vec::new();
        while let Some(resource) = ctx.release_next() {
            if let Err(e) = self.release(ctx, &resource).await {
                tracing::error!(resource = %resource, error = %e, "release failed");
                errors.push(e);
            }
        }
        errors
    }
}

/// Volume created on the cluster, exported through NFS-Ganesha when the
/// protocol is NFS, and mounted on every configured client.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaneshaVolumeLifecycle;

fn refused(step: &str, what: String) -> StepError {
    StepError::setup(step, what)
}

fn teardown_result(step: &str, res: Result<bool, ClusterError>, what: String) -> Result<(), StepError> {
    match res {
        Ok(true) => Ok(()),
        Ok(false) => Err(StepError::teardown(step, what)),
        Err(e) => Err(StepError::teardown(step, e.to_string())),
    }
}

#[async_trait]
impl TestLifecycle for GaneshaVolumeLifecycle {
    async fn setup_class(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError> {
        if ctx.config.protocol != MountProtocol::Nfs {
            return Ok(());
        }
        const STEP: &str = "nfs-ganesha cluster health";
        let mnode = ctx.config.mnode();
        if !ctx.cluster.is_ganesha_cluster_healthy(mnode).await.at_step(STEP)? {
            return Err(refused(STEP, "nfs-ganesha cluster is not healthy".to_string()));
        }
        tracing::info!(mnode = mnode, "nfs-ganesha cluster is healthy");
        Ok(())
    }

    async fn setup(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError> {
        let config = ctx.config;
        let cluster = ctx.cluster;
        let volume = config.volume.name.as_str();
        let mnode = config.mnode();

        const CREATE: &str = "create volume";
        let layout = config.volume.layout();
        if !cluster
            .create_volume(mnode, volume, &layout, &config.servers)
            .await
            .at_step(CREATE)?
        {
            return Err(refused(CREATE, format!("failed to create volume {}", volume)));
        }
        ctx.acquire(Resource::Volume {
            volume: volume.to_string(),
        });

        const START: &str = "start volume";
        if !cluster.start_volume(mnode, volume).await.at_step(START)? {
            return Err(refused(START, format!("failed to start volume {}", volume)));
        }

        if config.protocol == MountProtocol::Nfs {
            const EXPORT: &str = "export volume";
            if !cluster.export_volume(mnode, volume).await.at_step(EXPORT)? {
                return Err(refused(EXPORT, format!("failed to export volume {}", volume)));
            }
            ctx.acquire(Resource::Export {
                node: mnode.to_string(),
                volume: volume.to_string(),
            });
            let what = format!("volume {} exported", volume);
            let exported = poll_until(cluster.poll_policy(), &what, || {
                cluster.is_volume_exported(mnode, volume)
            })
            .await
            .at_step(EXPORT)?;
            if !exported {
                return Err(refused(EXPORT, format!("volume {} never showed up as exported", volume)));
            }
        }

        const MOUNT: &str = "mount volume";
        for mount in config.mounts() {
            if !cluster.mount_volume(&mount, volume).await.at_step(MOUNT)? {
                return Err(refused(MOUNT, format!("failed to mount {} on {}", volume, mount)));
            }
            ctx.acquire(Resource::Mount(mount));
        }

        tracing::info!(volume = volume, "successful in setup and mount volume");
        Ok(())
    }

    async fn release(&self, ctx: &mut TestContext<'_>, resource: &Resource) -> Result<(), StepError> {
        let cluster = ctx.cluster;
        let mnode = ctx.config.mnode();
        match resource {
            Resource::RootSquash { volume, .. } => {
                // the refresh makes running Ganesha instances drop squash too
                teardown_result(
                    "disable root squash",
                    cluster.set_root_squash(mnode, volume, false, true).await,
                    format!("failed to disable root squash on {}", volume),
                )
            }
            Resource::Mount(mount) => teardown_result(
                "unmount volume",
                cluster.unmount_volume(mount).await,
                format!("failed to unmount {}", mount),
            ),
            Resource::Export { node, volume } => {
                // an unexport that reports failure may still have taken
                // effect, the wait below is the authority
                match cluster.unexport_volume(node, volume).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(volume = volume.as_str(), "unexport reported failure"),
                    Err(e) => tracing::warn!(volume = volume.as_str(), error = %e, "unexport failed"),
                }
                teardown_result(
                    "wait for unexport",
                    cluster.wait_for_unexported(node, volume).await,
                    format!("volume {} is not unexported", volume),
                )
            }
            Resource::Volume { volume } => teardown_result(
                "cleanup volume",
                cluster.cleanup_volume(mnode, volume, &ctx.config.servers).await,
                format!("failed to cleanup volume {}", volume),
            ),
        }
    }
}

/// Final classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    /// The body's expectations did not hold
    Fail,
    /// Setup, execution or teardown trouble
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub verdict: Verdict,
    pub state: LifecycleState,
    pub history: Vec<LifecycleState>,
    /// In the order they happened; the first one is the primary cause
    pub failures: Vec<FailureRecord>,
    pub teardown_runs: u32,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn primary_failure(&self) -> Option<&FailureRecord> {
        self.failures.first()
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Drives one lifecycle + scenario pair.
pub struct TestRunner<'a> {
    config: &'a HarnessConfig,
    exec: &'a dyn RemoteExecutor,
    cluster: &'a dyn ClusterControl,
}

struct Tracker {
    name: String,
    history: Vec<LifecycleState>,
}

impl Tracker {
    fn current(&self) -> LifecycleState {
        *self.history.last().unwrap_or(&LifecycleState::Idle)
    }

    fn enter(&mut self, next: LifecycleState) {
        let from = self.current();
        debug_assert!(from.can_transition_to(next), "{:?} -> {:?}", from, next);
        tracing::info!(test = self.name.as_str(), from = ?from, to = ?next, "lifecycle transition");
        self.history.push(next);
    }
}

impl<'a> TestRunner<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        exec: &'a dyn RemoteExecutor,
        cluster: &'a dyn ClusterControl,
    ) -> Self {
        Self {
            config,
            exec,
            cluster,
        }
    }

    pub async fn run(&self, lifecycle: &dyn TestLifecycle, scenario: &dyn Scenario) -> TestOutcome {
        let started = Instant::now();
        let mut ctx = TestContext::new(self.config, self.exec, self.cluster);
        let mut tracker = Tracker {
            name: scenario.name().to_string(),
            history: vec![LifecycleState::Idle],
        };
        let mut failures = Vec::new();
        let mut teardown_runs = 0;

        tracker.enter(LifecycleState::SettingUp);
        let setup = match lifecycle.setup_class(&mut ctx).await {
            Ok(()) => lifecycle.setup(&mut ctx).await,
            Err(e) => Err(e),
        };

        if let Err(e) = setup {
            tracing::error!(test = scenario.name(), error = %e, "setup failed");
            failures.push(FailureRecord::as_kind(&e, FailureKind::Setup));
            // partial acquisitions are still given back
            for e in lifecycle.teardown(&mut ctx).await {
                failures.push(FailureRecord::as_kind(&e, FailureKind::Teardown));
            }
            teardown_runs += 1;
            tracker.enter(LifecycleState::Failed);
        } else {
            tracker.enter(LifecycleState::Running);
            let body = tokio::time::timeout(self.config.test_timeout(), scenario.run(&mut ctx)).await;
            let body = body.unwrap_or_else(|_| Err(StepError::TimedOut(self.config.test_timeout())));
            if let Err(e) = &body {
                tracing::error!(test = scenario.name(), kind = %e.kind(), error = %e, "test body failed");
                failures.push(FailureRecord::from(e));
            }

            tracker.enter(LifecycleState::TearingDown);
            let teardown_errors = lifecycle.teardown(&mut ctx).await;
            teardown_runs += 1;
            let teardown_failed = !teardown_errors.is_empty();
            for e in &teardown_errors {
                failures.push(FailureRecord::as_kind(e, FailureKind::Teardown));
            }
            tracker.enter(if teardown_failed {
                LifecycleState::Failed
            } else {
                LifecycleState::Done
            });
        }

        let verdict = match failures.first() {
            None => Verdict::Pass,
            Some(f) if f.kind == FailureKind::Assertion => Verdict::Fail,
            Some(_) => Verdict::Error,
        };
        tracing::info!(test = scenario.name(), verdict = ?verdict, failures = failures.len(), "test finished");

        TestOutcome {
            name: scenario.name().to_string(),
            verdict,
            state: tracker.current(),
            history: tracker.history,
            failures,
            teardown_runs,
            duration: started.elapsed(),
        }
    }
}
