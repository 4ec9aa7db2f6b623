//! nfsqa functional tests
//!
//! Lifecycle runner, test registry and scenarios for NFS-Ganesha exports of
//! a storage cluster. Each test runs against a [`HarnessConfig`] through a
//! [`RemoteExecutor`](nfsqa_remote::RemoteExecutor) and a
//! [`ClusterControl`](nfsqa_cluster::ClusterControl) backend; [`SimCluster`]
//! provides both in-process.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod report;
pub mod scenario;
pub mod sim;

pub use config::{ConfigError, HarnessConfig, MountConfig, ScenarioConfig, VolumeConfig};
pub use context::{Resource, ScenarioState, TestContext};
pub use error::{FailureKind, FailureRecord, StepError};
pub use lifecycle::{GaneshaVolumeLifecycle, LifecycleState, TestLifecycle, TestOutcome, TestRunner, Verdict};
pub use registry::{registry, run_suite, select, TestCase};
pub use report::{TestCaseResult, TestStatus, TestSuiteReport};
pub use scenario::{RootSquashRestart, Scenario};
pub use sim::{SimCluster, SimFault, NFSNOBODY};
