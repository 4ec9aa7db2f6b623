//! Cluster control facade consumed by test lifecycles and scenarios.
//!
//! Every operation reports its verdict explicitly: `Ok(true)` on success,
//! `Ok(false)` when the cluster refused or did not converge within the poll
//! bound, and `Err` only when a node could not be driven at all. Callers
//! treat anything but `Ok(true)` as fatal for the current test.

use async_trait::async_trait;
use nfsqa_remote::MountPoint;

use crate::error::{ClusterError, Result};
use crate::ganesha::SquashPolicy;
use crate::poll::{poll_until, PollPolicy};
use crate::topology::VolumeLayout;

/// Typed management operations over a storage cluster with an NFS-Ganesha
/// export layer.
///
/// Implementations must be idempotent and safe to retry.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Bound used by the `wait_for_*` operations.
    fn poll_policy(&self) -> PollPolicy;

    /// Enables or disables root squash on `volume`'s export, optionally
    /// making the running Ganesha instances reload it.
    async fn set_root_squash(
        &self,
        server: &str,
        volume: &str,
        enabled: bool,
        refresh_config: bool,
    ) -> Result<bool>;

    /// Current root-squash setting of `volume`'s export, if readable.
    async fn root_squash_policy(&self, server: &str, volume: &str) -> Result<Option<SquashPolicy>>;

    /// Exports `volume` through NFS-Ganesha.
    async fn export_volume(&self, node: &str, volume: &str) -> Result<bool>;

    /// Withdraws the NFS-Ganesha export of `volume`.
    async fn unexport_volume(&self, node: &str, volume: &str) -> Result<bool>;

    /// Whether `node` currently serves an export of `volume`.
    async fn is_volume_exported(&self, node: &str, volume: &str) -> Result<bool>;

    /// Polls until `volume` is no longer exported from `node`.
    async fn wait_for_unexported(&self, node: &str, volume: &str) -> Result<bool> {
        let what = format!("volume {} unexported on {}", volume, node);
        poll_until(self.poll_policy(), &what, || async {
            Ok::<_, ClusterError>(!self.is_volume_exported(node, volume).await?)
        })
        .await
    }

    /// Restarts the control-plane daemon on every server.
    async fn restart_cluster_daemon(&self, servers: &[String]) -> Result<bool>;

    /// Whether the control-plane daemon is running on every server.
    async fn is_cluster_daemon_running(&self, servers: &[String]) -> Result<bool>;

    /// Polls until the control-plane daemon runs on every server.
    async fn wait_for_daemon_running(&self, servers: &[String]) -> Result<bool> {
        poll_until(self.poll_policy(), "cluster daemon running", || {
            self.is_cluster_daemon_running(servers)
        })
        .await
    }

    /// Whether every server other than `node` is a connected peer of `node`.
    async fn are_peers_connected(&self, node: &str, servers: &[String]) -> Result<bool>;

    /// Polls until every server is a connected peer of `node`.
    async fn wait_for_peers_connected(&self, node: &str, servers: &[String]) -> Result<bool> {
        poll_until(self.poll_policy(), "peers connected", || {
            self.are_peers_connected(node, servers)
        })
        .await
    }

    /// Readiness of the NFS-Ganesha HA cluster as seen from `node`.
    async fn is_ganesha_cluster_healthy(&self, node: &str) -> Result<bool>;

    /// Creates `volume` with bricks spread over `servers`.
    async fn create_volume(
        &self,
        node: &str,
        volume: &str,
        layout: &VolumeLayout,
        servers: &[String],
    ) -> Result<bool>;

    /// Starts a created volume.
    async fn start_volume(&self, node: &str, volume: &str) -> Result<bool>;

    /// Stops and deletes `volume` and removes its brick directories.
    async fn cleanup_volume(&self, node: &str, volume: &str, servers: &[String]) -> Result<bool>;

    /// Mounts `volume` on the client described by `mount`.
    async fn mount_volume(&self, mount: &MountPoint, volume: &str) -> Result<bool>;

    /// Unmounts the client mount.
    async fn unmount_volume(&self, mount: &MountPoint) -> Result<bool>;
}
