//! Test bodies driven against a prepared volume.

use async_trait::async_trait;
use nfsqa_cluster::SquashPolicy;
use nfsqa_remote::{numbered_names, MountPoint};

use crate::config::ScenarioConfig;
use crate::context::{Resource, TestContext};
use crate::error::{ensure, AtStep, StepError};

/// A test body. Runs after setup succeeded and before teardown.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError>;
}

/// Root squash set on a Ganesha export must survive a glusterd restart.
///
/// Files written by root before squash stay root-owned and must become
/// read-only to the squashed identity; files written after squash belong
/// to the anonymous user and must stay writable.
#[derive(Debug, Clone)]
pub struct RootSquashRestart {
    params: ScenarioConfig,
}

impl RootSquashRestart {
    pub const NAME: &'static str = "root_squash_enable_glusterd_restart";

    pub fn new(params: ScenarioConfig) -> Self {
        Self { params }
    }

    async fn create_files(
        &self,
        ctx: &mut TestContext<'_>,
        mount: &MountPoint,
        prefix: &str,
        count: u32,
        step: &str,
    ) -> Result<(), StepError> {
        let result = ctx
            .probe()
            .create_files(&mount.target(), &mount.mountpoint, prefix, count)
            .await
            .at_step(step)?;
        ensure(
            result.is_success(),
            step,
            format!("failed to create {}1..{}{} on {}: {}", prefix, prefix, count, mount, result.stderr.trim()),
        )?;
        for name in numbered_names(prefix, count) {
            ctx.state.created_files.insert(mount.path_of(&name));
        }
        Ok(())
    }

    async fn stat_all(&self, ctx: &mut TestContext<'_>, step: &str) -> Result<(), StepError> {
        let mounts = ctx.mounts();
        let ok = ctx.probe().stat_all(&mounts).await.at_step(step)?;
        ensure(ok, step, "stat failed on some of the clients")
    }
}

#[async_trait]
impl Scenario for RootSquashRestart {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<(), StepError> {
        let config = ctx.config;
        let cluster = ctx.cluster;
        let volume = config.volume.name.as_str();
        let mnode = config.mnode();
        let mounts = ctx.mounts();
        let first = mounts
            .first()
            .ok_or_else(|| StepError::setup("mounts", "no mounts configured"))?;
        let p = &self.params;

        self.create_files(ctx, first, "file", p.files, "create files as root").await?;
        tracing::info!(count = p.files, "created files as root");

        self.stat_all(ctx, "stat after root writes").await?;

        const CHMOD: &str = "chmod mount point";
        let ok = ctx
            .probe()
            .set_permissions(&first.target(), &first.mountpoint, 0o777)
            .await
            .at_step(CHMOD)?;
        ensure(ok, CHMOD, format!("failed to set permissions on {}", first))?;

        const SQUASH: &str = "enable root squash";
        ctx.acquire(Resource::RootSquash {
            server: mnode.to_string(),
            volume: volume.to_string(),
        });
        let ok = cluster
            .set_root_squash(mnode, volume, true, true)
            .await
            .at_step(SQUASH)?;
        ensure(ok, SQUASH, format!("failed to enable root squash on {}", volume))?;
        ctx.state.squash = Some(SquashPolicy::RootSquash);
        tracing::info!(volume = volume, "root squash enabled");

        self.create_files(ctx, first, "Squashfile", p.squash_files, "create files under squash")
            .await?;

        self.stat_all(ctx, "stat after squashed writes").await?;

        const RESTART: &str = "restart glusterd";
        let ok = cluster
            .restart_cluster_daemon(&config.servers)
            .await
            .at_step(RESTART)?;
        ensure(ok, RESTART, "failed to restart glusterd on all servers")?;
        tracing::info!(servers = ?config.servers, "glusterd restarted");

        const RUNNING: &str = "glusterd running";
        let ok = cluster
            .wait_for_daemon_running(&config.servers)
            .await
            .at_step(RUNNING)?;
        ensure(ok, RUNNING, "glusterd is not running on all servers")?;

        const PEERS: &str = "peers connected";
        let ok = cluster
            .wait_for_peers_connected(mnode, &config.servers)
            .await
            .at_step(PEERS)?;
        ctx.state.cluster_healthy = Some(ok);
        ensure(ok, PEERS, "peers are not in connected state")?;

        const ROOT_EDIT: &str = "edit root-owned file";
        let root_file = format!("file{}", p.root_file_index);
        for mount in &mounts {
            let path = mount.path_of(&root_file);
            let written = ctx
                .probe()
                .append_to_file(&mount.target(), &path, &p.content)
                .await
                .at_step(ROOT_EDIT)?;
            ensure(
                !written,
                ROOT_EDIT,
                format!("{} was editable from {} with root squash enabled", path, mount.client),
            )?;
        }
        tracing::info!(file = root_file.as_str(), "edit of root-owned file refused as expected");

        const SQUASH_EDIT: &str = "edit squashed file";
        let squash_file = format!("Squashfile{}", p.squash_file_index);
        for mount in &mounts {
            let path = mount.path_of(&squash_file);
            let written = ctx
                .probe()
                .append_to_file(&mount.target(), &path, &p.content)
                .await
                .at_step(SQUASH_EDIT)?;
            ensure(
                written,
                SQUASH_EDIT,
                format!("{} was not editable from {}", path, mount.client),
            )?;
        }
        tracing::info!(file = squash_file.as_str(), "edit of squashed file succeeded");
        Ok(())
    }
}
