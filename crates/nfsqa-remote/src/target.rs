//! Remote targets, command results and client mount descriptions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a command runs and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTarget {
    host: String,
    user: Option<String>,
}

impl RemoteTarget {
    /// Target `host` with the executor's default identity.
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            user: None,
        }
    }

    /// Target `host` acting as `user`.
    pub fn with_user(host: &str, user: &str) -> Self {
        Self {
            host: host.to_string(),
            user: Some(user.to_string()),
        }
    }

    /// Host identifier.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Acting identity, if one was requested.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Whether the host names the local machine.
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.host),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Outcome of one executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Process exit code; -1 when the process was killed by a signal
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandResult {
    /// Builds a result from its parts.
    pub fn new(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    /// Exit code zero with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        Self::new(0, stdout, "")
    }

    /// Non-zero exit with the given stderr.
    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self::new(exit_code, "", stderr)
    }

    /// Whether the command exited zero.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Protocol a client uses to mount the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountProtocol {
    /// NFS through the NFS-Ganesha export
    Nfs,
    /// Native FUSE client
    Glusterfs,
}

impl MountProtocol {
    /// Name used in configuration and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            MountProtocol::Nfs => "nfs",
            MountProtocol::Glusterfs => "glusterfs",
        }
    }
}

impl fmt::Display for MountProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client's view of the exported volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Client host that holds the mount
    pub client: String,
    /// Absolute mount path on the client
    pub mountpoint: String,
    /// Identity that owns the mount and performs I/O on it
    pub user: String,
    /// Server (or virtual IP) the volume is mounted from
    pub server: String,
    /// Mount protocol
    pub protocol: MountProtocol,
}

impl MountPoint {
    /// NFS mount of `server` at `client:mountpoint` owned by root.
    pub fn nfs(client: &str, mountpoint: &str, server: &str) -> Self {
        Self {
            client: client.to_string(),
            mountpoint: mountpoint.to_string(),
            user: "root".to_string(),
            server: server.to_string(),
            protocol: MountProtocol::Nfs,
        }
    }

    /// Target that acts on the mount as its owner.
    pub fn target(&self) -> RemoteTarget {
        RemoteTarget::with_user(&self.client, &self.user)
    }

    /// Absolute path of `name` inside the mount.
    pub fn path_of(&self, name: &str) -> String {
        crate::shell::join_path(&self.mountpoint, name)
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.mountpoint)
    }
}
