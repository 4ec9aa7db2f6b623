//! Per-test context: collaborators, acquired resources and scenario state

use std::collections::BTreeSet;
use std::fmt;

use nfsqa_cluster::{ClusterControl, SquashPolicy};
use nfsqa_remote::{FileProbe, MountPoint, RemoteExecutor};

use crate::config::HarnessConfig;

/// Something setup or the body acquired that teardown must give back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Volume created and started
    Volume { volume: String },
    /// Volume exported through NFS-Ganesha
    Export { node: String, volume: String },
    /// Volume mounted on a client
    Mount(MountPoint),
    /// Root squash turned on for the volume's export
    RootSquash { server: String, volume: String },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Volume { volume } => write!(f, "volume {}", volume),
            Resource::Export { node, volume } => write!(f, "export of {} on {}", volume, node),
            Resource::Mount(m) => write!(f, "mount {}", m),
            Resource::RootSquash { volume, .. } => write!(f, "root squash on {}", volume),
        }
    }
}

/// What a scenario has observed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioState {
    /// Absolute paths of files the scenario created
    pub created_files: BTreeSet<String>,
    /// Last squash policy the scenario set or read back
    pub squash: Option<SquashPolicy>,
    /// Last observed cluster health (daemon running and peers connected)
    pub cluster_healthy: Option<bool>,
}

/// Everything one test instance owns. Nothing here is shared between
/// concurrently running tests.
pub struct TestContext<'a> {
    pub config: &'a HarnessConfig,
    pub exec: &'a dyn RemoteExecutor,
    pub cluster: &'a dyn ClusterControl,
    pub state: ScenarioState,
    resources: Vec<Resource>,
}

impl<'a> TestContext<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        exec: &'a dyn RemoteExecutor,
        cluster: &'a dyn ClusterControl,
    ) -> Self {
        Self {
            config,
            exec,
            cluster,
            state: ScenarioState::default(),
            resources: Vec::new(),
        }
    }

    pub fn probe(&self) -> FileProbe<'a> {
        FileProbe::new(self.exec)
    }

    pub fn mounts(&self) -> Vec<MountPoint> {
        self.config.mounts()
    }

    /// Records an acquisition. Registering the same resource twice is a
    /// no-op so it is released once.
    pub fn acquire(&mut self, resource: Resource) {
        if !self.resources.contains(&resource) {
            tracing::debug!(resource = %resource, "acquired");
            self.resources.push(resource);
        }
    }

    /// Most recent acquisition still held.
    pub fn release_next(&mut self) -> Option<Resource> {
        self.resources.pop()
    }

    pub fn held(&self) -> &[Resource] {
        &self.resources
    }
}
