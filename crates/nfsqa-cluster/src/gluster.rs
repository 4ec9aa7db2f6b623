//! [`ClusterControl`] over the gluster CLI, systemd and the Ganesha HA script

use std::sync::Arc;

use async_trait::async_trait;
use nfsqa_remote::shell::quote;
use nfsqa_remote::{CommandResult, MountPoint, MountProtocol, RemoteExecutor, RemoteTarget};

use crate::control::ClusterControl;
use crate::error::{validate_volume_name, Result};
use crate::ganesha::{GaneshaConfig, SquashPolicy};
use crate::poll::PollPolicy;
use crate::topology::VolumeLayout;

/// Control-plane daemon managed through systemd.
const DAEMON: &str = "glusterd";

/// One row of `gluster pool list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub uuid: String,
    pub hostname: String,
    pub connected: bool,
}

/// Parses `gluster pool list` output, skipping the header.
pub fn parse_pool_list(stdout: &str) -> Vec<PoolEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let uuid = cols.next()?;
            let hostname = cols.next()?;
            let state = cols.next()?;
            if uuid == "UUID" {
                return None;
            }
            Some(PoolEntry {
                uuid: uuid.to_string(),
                hostname: hostname.to_string(),
                connected: state == "Connected",
            })
        })
        .collect()
}

/// Drives a GlusterFS + NFS-Ganesha cluster through remote shell commands.
#[derive(Clone)]
pub struct GlusterCli {
    exec: Arc<dyn RemoteExecutor>,
    ganesha: GaneshaConfig,
    brick_root: String,
    poll: PollPolicy,
}

impl GlusterCli {
    pub fn new(exec: Arc<dyn RemoteExecutor>, ganesha: GaneshaConfig) -> Self {
        Self {
            exec,
            ganesha,
            brick_root: "/bricks/brick0".to_string(),
            poll: PollPolicy::default(),
        }
    }

    pub fn with_brick_root(mut self, brick_root: &str) -> Self {
        self.brick_root = brick_root.to_string();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn ganesha(&self) -> &GaneshaConfig {
        &self.ganesha
    }

    async fn run(&self, host: &str, command: &str) -> Result<CommandResult> {
        let result = self.exec.execute(&RemoteTarget::new(host), command).await?;
        if !result.is_success() {
            tracing::warn!(
                host = host,
                command = command,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "cluster command failed"
            );
        }
        Ok(result)
    }

    /// Runs `command` on every host; true iff all of them succeed.
    /// Later hosts are still attempted after a failure.
    async fn run_on_all(&self, hosts: &[String], command: &str) -> Result<bool> {
        let mut all_ok = true;
        for host in hosts {
            all_ok &= self.run(host, command).await?.is_success();
        }
        Ok(all_ok)
    }

    async fn gluster(&self, node: &str, args: &str) -> Result<CommandResult> {
        self.run(node, &format!("gluster --mode=script {}", args)).await
    }
}

#[async_trait]
impl ClusterControl for GlusterCli {
    fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    async fn set_root_squash(
        &self,
        server: &str,
        volume: &str,
        enabled: bool,
        refresh_config: bool,
    ) -> Result<bool> {
        validate_volume_name(volume)?;
        let policy = SquashPolicy::from_enabled(enabled);
        let cmd = self.ganesha.set_squash_command(volume, policy);
        if !self.run(server, &cmd).await?.is_success() {
            return Ok(false);
        }
        if refresh_config {
            let cmd = self.ganesha.refresh_config_command(volume);
            if !self.run(server, &cmd).await?.is_success() {
                return Ok(false);
            }
        }
        tracing::info!(
            server = server,
            volume = volume,
            squash = policy.conf_value(),
            refreshed = refresh_config,
            "root squash updated"
        );
        Ok(true)
    }

    async fn root_squash_policy(&self, server: &str, volume: &str) -> Result<Option<SquashPolicy>> {
        validate_volume_name(volume)?;
        let result = self.run(server, &self.ganesha.query_squash_command(volume)).await?;
        if !result.is_success() {
            return Ok(None);
        }
        Ok(GaneshaConfig::parse_squash(&result.stdout))
    }

    async fn export_volume(&self, node: &str, volume: &str) -> Result<bool> {
        validate_volume_name(volume)?;
        let result = self
            .gluster(node, &format!("volume set {} ganesha.enable on", volume))
            .await?;
        Ok(result.is_success())
    }

    async fn unexport_volume(&self, node: &str, volume: &str) -> Result<bool> {
        validate_volume_name(volume)?;
        let result = self
            .gluster(node, &format!("volume set {} ganesha.enable off", volume))
            .await?;
        Ok(result.is_success())
    }

    async fn is_volume_exported(&self, node: &str, volume: &str) -> Result<bool> {
        validate_volume_name(volume)?;
        let cmd = format!("showmount -e localhost | grep -w {}", quote(&format!("/{}", volume)));
        Ok(self.exec.execute(&RemoteTarget::new(node), &cmd).await?.is_success())
    }

    async fn restart_cluster_daemon(&self, servers: &[String]) -> Result<bool> {
        let ok = self
            .run_on_all(servers, &format!("systemctl restart {}", DAEMON))
            .await?;
        tracing::info!(servers = ?servers, ok = ok, "restarted {}", DAEMON);
        Ok(ok)
    }

    async fn is_cluster_daemon_running(&self, servers: &[String]) -> Result<bool> {
        let cmd = format!("systemctl is-active {}", DAEMON);
        let mut all_ok = true;
        for server in servers {
            let result = self.exec.execute(&RemoteTarget::new(server), &cmd).await?;
            if !result.is_success() {
                tracing::debug!(server = server.as_str(), state = %result.stdout.trim(), "{} not active", DAEMON);
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    async fn are_peers_connected(&self, node: &str, servers: &[String]) -> Result<bool> {
        let result = self.exec.execute(&RemoteTarget::new(node), "gluster pool list").await?;
        if !result.is_success() {
            return Ok(false);
        }
        let pool = parse_pool_list(&result.stdout);
        let all = servers.iter().filter(|s| s.as_str() != node).all(|server| {
            let connected = pool.iter().any(|p| &p.hostname == server && p.connected);
            if !connected {
                tracing::debug!(node = node, peer = server.as_str(), "peer not connected");
            }
            connected
        });
        Ok(all)
    }

    async fn is_ganesha_cluster_healthy(&self, node: &str) -> Result<bool> {
        let result = self.run(node, &self.ganesha.status_command()).await?;
        Ok(result.is_success() && GaneshaConfig::is_healthy_status(&result.stdout))
    }

    async fn create_volume(
        &self,
        node: &str,
        volume: &str,
        layout: &VolumeLayout,
        servers: &[String],
    ) -> Result<bool> {
        validate_volume_name(volume)?;
        let bricks = layout.bricks(servers, &self.brick_root, volume)?;
        let type_args = layout.create_args();
        let mut args = format!("volume create {} ", volume);
        if !type_args.is_empty() {
            args.push_str(&type_args);
            args.push(' ');
        }
        let bricks_arg: Vec<String> = bricks.iter().map(|b| quote(b)).collect();
        args.push_str(&bricks_arg.join(" "));
        args.push_str(" force");
        let result = self.gluster(node, &args).await?;
        tracing::info!(
            volume = volume,
            vtype = %layout.vtype,
            bricks = bricks.len(),
            ok = result.is_success(),
            "volume create"
        );
        Ok(result.is_success())
    }

    async fn start_volume(&self, node: &str, volume: &str) -> Result<bool> {
        validate_volume_name(volume)?;
        Ok(self
            .gluster(node, &format!("volume start {}", volume))
            .await?
            .is_success())
    }

    async fn cleanup_volume(&self, node: &str, volume: &str, servers: &[String]) -> Result<bool> {
        validate_volume_name(volume)?;
        // stop fails harmlessly if the volume never started
        self.gluster(node, &format!("volume stop {} force", volume)).await?;
        let deleted = self
            .gluster(node, &format!("volume delete {}", volume))
            .await?
            .is_success();
        // only the glob stays outside the quotes
        let prefix = format!("{}/{}_brick", self.brick_root.trim_end_matches('/'), volume);
        let removed = self
            .run_on_all(servers, &format!("rm -rf {}*", quote(&prefix)))
            .await?;
        Ok(deleted && removed)
    }

    async fn mount_volume(&self, mount: &MountPoint, volume: &str) -> Result<bool> {
        validate_volume_name(volume)?;
        let source = quote(&format!("{}:/{}", mount.server, volume));
        let mp = quote(&mount.mountpoint);
        let cmd = match mount.protocol {
            MountProtocol::Nfs => format!(
                "mkdir -p {mp} && mount -t nfs -o vers={v} {src} {mp}",
                mp = mp,
                v = self.ganesha.nfs_version,
                src = source
            ),
            MountProtocol::Glusterfs => format!(
                "mkdir -p {mp} && mount -t glusterfs {src} {mp}",
                mp = mp,
                src = source
            ),
        };
        let ok = self.run(&mount.client, &cmd).await?.is_success();
        tracing::info!(mount = %mount, protocol = %mount.protocol, ok = ok, "mount");
        Ok(ok)
    }

    async fn unmount_volume(&self, mount: &MountPoint) -> Result<bool> {
        let cmd = format!("umount {}", quote(&mount.mountpoint));
        let ok = self.run(&mount.client, &cmd).await?.is_success();
        tracing::info!(mount = %mount, ok = ok, "unmount");
        Ok(ok)
    }
}
