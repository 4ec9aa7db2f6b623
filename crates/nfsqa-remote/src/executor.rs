//! Remote command execution.
//!
//! This module defines the [`RemoteExecutor`] trait, the single side-effecting
//! primitive the harness uses to touch the test environment, along with an
//! ssh-backed implementation for remote nodes and a local one for the
//! machine the harness runs on.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{RemoteError, Result};
use crate::shell::quote;
use crate::target::{CommandResult, RemoteTarget};

/// ssh reserves this exit status for its own failures.
const SSH_FAILURE_EXIT: i32 = 255;

/// `sudo -n` exits with this when it refuses to run the command.
const SUDO_FAILURE_EXIT: i32 = 1;

/// Runs shell commands on named hosts.
///
/// Implementations are stateless from the caller's point of view and must
/// never block longer than their configured timeout.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` through a shell on `target`.
    ///
    /// # Returns
    /// The exit code and captured output. A non-zero exit is reported in the
    /// result, not as an error; errors are reserved for an unreachable host,
    /// an exceeded timeout, or a local spawn failure.
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult>;
}

#[async_trait]
impl<E: RemoteExecutor + ?Sized> RemoteExecutor for Arc<E> {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
        (**self).execute(target, command).await
    }
}

#[async_trait]
impl<E: RemoteExecutor + ?Sized> RemoteExecutor for &E {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
        (**self).execute(target, command).await
    }
}

/// ssh client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// ssh binary to invoke
    pub program: String,
    /// Login user when the target carries no identity of its own
    pub default_user: Option<String>,
    /// Remote port; ssh's own default when unset
    pub port: Option<u16>,
    /// Private key passed with `-i`
    pub identity_file: Option<String>,
    /// `ConnectTimeout` handed to ssh, in seconds
    pub connect_timeout_secs: u64,
    /// Upper bound for a whole command, in seconds
    pub command_timeout_secs: u64,
    /// Verify host keys against known_hosts
    pub strict_host_key_checking: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            default_user: Some("root".to_string()),
            port: None,
            identity_file: None,
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            strict_host_key_checking: false,
        }
    }
}

impl SshConfig {
    /// Bound applied to every command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Arguments passed to ssh for running `command` on `target`.
    pub fn args_for(&self, target: &RemoteTarget, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if !self.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=no".to_string());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        let user = target.user().or(self.default_user.as_deref());
        match user {
            Some(user) => args.push(format!("{}@{}", user, target.host())),
            None => args.push(target.host().to_string()),
        }
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

/// Executes commands on remote hosts through the system ssh client.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    /// Creates an executor with the given ssh configuration.
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.args_for(target, command));
        let timeout = self.config.command_timeout();
        let output = run_bounded(cmd, &self.config.program, target, command, timeout).await?;
        let result = to_result(output);

        if result.exit_code == SSH_FAILURE_EXIT && is_ssh_transport_failure(&result.stderr) {
            tracing::warn!(
                host = target.host(),
                stderr = %result.stderr.trim(),
                "ssh connection failed"
            );
            return Err(RemoteError::Connection {
                host: target.host().to_string(),
                reason: result.stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            remote = %target,
            command = command,
            exit_code = result.exit_code,
            "remote command finished"
        );
        Ok(result)
    }
}

/// Executes commands on the machine the harness runs on.
///
/// A target user is honoured with `sudo -n -u`, so the harness account
/// needs passwordless sudo for any identity other than its own.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    timeout: Duration,
}

impl LocalExecutor {
    /// Creates an executor bounding each command by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
        let (program, cmd) = match target.user() {
            Some(user) => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-n", "-u", user, "sh", "-c", command]);
                ("sudo", cmd)
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", command]);
                ("sh", cmd)
            }
        };
        let output = run_bounded(cmd, program, target, command, self.timeout).await?;
        let result = to_result(output);

        if target.user().is_some() && is_sudo_refusal(&result) {
            tracing::warn!(
                remote = %target,
                stderr = %result.stderr.trim(),
                "sudo refused to switch user"
            );
            return Err(RemoteError::Connection {
                host: target.host().to_string(),
                reason: result.stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            remote = %target,
            command = command,
            exit_code = result.exit_code,
            "local command finished"
        );
        Ok(result)
    }
}

/// Runs commands for local targets in-process and sends the rest over ssh.
#[derive(Debug, Clone, Default)]
pub struct HostExecutor {
    ssh: SshExecutor,
    local: LocalExecutor,
}

impl HostExecutor {
    /// Uses `config` for remote hosts and its command timeout for local ones.
    pub fn new(config: SshConfig) -> Self {
        let local = LocalExecutor::new(config.command_timeout());
        Self {
            ssh: SshExecutor::new(config),
            local,
        }
    }
}

#[async_trait]
impl RemoteExecutor for HostExecutor {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
        if target.is_local() {
            self.local.execute(target, command).await
        } else {
            self.ssh.execute(target, command).await
        }
    }
}

async fn run_bounded(
    mut cmd: Command,
    program: &str,
    target: &RemoteTarget,
    command: &str,
    timeout: Duration,
) -> Result<Output> {
    cmd.kill_on_drop(true).stdin(std::process::Stdio::null());
    tracing::trace!(remote = %target, command = %quote(command), "spawning");

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(RemoteError::Spawn {
            program: program.to_string(),
            source,
        }),
        Err(_) => {
            tracing::warn!(remote = %target, command = command, "command timed out");
            Err(RemoteError::Timeout {
                host: target.host().to_string(),
                command: command.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

fn to_result(output: Output) -> CommandResult {
    CommandResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Whether ssh's stderr describes a failure to reach or log into the host
/// rather than the remote command exiting 255.
pub fn is_ssh_transport_failure(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "ssh:",
        "Connection refused",
        "Connection timed out",
        "Connection closed",
        "No route to host",
        "Could not resolve hostname",
        "Permission denied (",
        "Host key verification failed",
    ];
    MARKERS.iter().any(|m| stderr.contains(m))
}

/// Whether a `sudo -n -u` run failed in sudo itself, before the command
/// ever started.
pub fn is_sudo_refusal(result: &CommandResult) -> bool {
    result.exit_code == SUDO_FAILURE_EXIT && result.stderr.trim_start().starts_with("sudo:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_default() {
        let config = SshConfig::default();
        assert_eq!(config.program, "ssh");
        assert_eq!(config.default_user.as_deref(), Some("root"));
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_ssh_args_default_user() {
        let config = SshConfig::default();
        let args = config.args_for(&RemoteTarget::new("s1"), "gluster pool list");
        assert_eq!(args.last().map(String::as_str), Some("gluster pool list"));
        assert_eq!(args[args.len() - 2], "--");
        assert!(args.contains(&"root@s1".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn test_ssh_args_target_user_port_and_key() {
        let config = SshConfig {
            port: Some(2222),
            identity_file: Some("/keys/id_ed25519".to_string()),
            strict_host_key_checking: true,
            ..SshConfig::default()
        };
        let args = config.args_for(&RemoteTarget::with_user("c1", "qa"), "id");
        assert!(args.contains(&"qa@c1".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/keys/id_ed25519");
        assert!(!args.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn test_ssh_args_without_any_user() {
        let config = SshConfig {
            default_user: None,
            ..SshConfig::default()
        };
        let args = config.args_for(&RemoteTarget::new("s2"), "true");
        assert_eq!(args[args.len() - 3..], ["s2", "--", "true"]);
    }

    #[test]
    fn test_transport_failure_detection() {
        assert!(is_ssh_transport_failure(
            "ssh: connect to host s9 port 22: No route to host"
        ));
        assert!(is_ssh_transport_failure("root@s1: Permission denied (publickey)."));
        assert!(!is_ssh_transport_failure("my-script: fatal error"));
    }

    #[tokio::test]
    async fn test_local_executor_captures_output() {
        let exec = LocalExecutor::default();
        let result = exec
            .execute(&RemoteTarget::new("localhost"), "echo out; echo err >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[test]
    fn test_sudo_refusal_detection() {
        assert!(is_sudo_refusal(&CommandResult::failed(1, "sudo: a password is required\n")));
        assert!(is_sudo_refusal(&CommandResult::failed(1, "sudo: unknown user qa\n")));
        assert!(!is_sudo_refusal(&CommandResult::failed(
            1,
            "sh: /mnt/v1/file10: Permission denied\n"
        )));
        assert!(!is_sudo_refusal(&CommandResult::failed(2, "sudo: weird\n")));
    }

    #[tokio::test]
    async fn test_local_executor_unusable_user_is_error() {
        // either sudo is missing or it rejects the user; the command never runs
        let exec = LocalExecutor::default();
        let result = exec
            .execute(&RemoteTarget::with_user("localhost", "nfsqa-no-such-user"), "true")
            .await;
        assert!(result.is_err(), "{:?}", result);
    }

    #[tokio::test]
    async fn test_local_executor_times_out() {
        let exec = LocalExecutor::new(Duration::from_millis(100));
        let err = exec
            .execute(&RemoteTarget::new("localhost"), "sleep 5")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.host(), Some("localhost"));
    }

    #[tokio::test]
    async fn test_arc_executor_delegates() {
        let exec: Arc<dyn RemoteExecutor> = Arc::new(LocalExecutor::default());
        let result = exec
            .execute(&RemoteTarget::new("localhost"), "true")
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_host_executor_routes_by_host() {
        let exec = HostExecutor::new(SshConfig {
            program: "/nonexistent/ssh".to_string(),
            ..SshConfig::default()
        });
        let local = exec
            .execute(&RemoteTarget::new("localhost"), "echo here")
            .await
            .unwrap();
        assert_eq!(local.stdout, "here\n");
        let err = exec
            .execute(&RemoteTarget::new("s1"), "true")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Spawn { .. }));
    }
}
