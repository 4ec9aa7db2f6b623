//! File and permission probes on client mounts
//!
//! Every probe is a single remote command whose exit code is the answer;
//! `Err` is reserved for failures of the execution channel.

use crate::error::{RemoteError, Result};
use crate::executor::RemoteExecutor;
use crate::shell::{join_path, quote};
use crate::target::{CommandResult, MountPoint, RemoteTarget};

/// Ownership and mode bits of a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Owning user id
    pub uid: u32,
    /// Owning group id
    pub gid: u32,
    /// Permission bits
    pub mode: u32,
}

impl FileStat {
    /// Parses `stat -c '%u %g %a'` output.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        let mode = u32::from_str_radix(fields.next()?, 8).ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self { uid, gid, mode })
    }
}

/// Names `prefix1..=prefixN`.
pub fn numbered_names(prefix: &str, count: u32) -> Vec<String> {
    (1..=count).map(|i| format!("{}{}", prefix, i)).collect()
}

/// File/permission checks derived from remote command exit codes
pub struct FileProbe<'a> {
    exec: &'a dyn RemoteExecutor,
}

impl<'a> FileProbe<'a> {
    /// Probe issuing its commands through `exec`.
    pub fn new(exec: &'a dyn RemoteExecutor) -> Self {
        Self { exec }
    }

    /// `chmod` `path` to `mode` (e.g. `0o777`).
    pub async fn set_permissions(
        &self,
        target: &RemoteTarget,
        path: &str,
        mode: u32,
    ) -> Result<bool> {
        let cmd = format!("chmod {:o} {}", mode, quote(path));
        let result = self.exec.execute(target, &cmd).await?;
        if !result.is_success() {
            tracing::error!(
                host = target.host(),
                path = path,
                mode = %format!("{:o}", mode),
                stderr = %result.stderr.trim(),
                "failed to set permissions"
            );
        }
        Ok(result.is_success())
    }

    /// Appends `content` and a newline to `path`.
    ///
    /// `Ok(false)` means the write was refused (permissions, missing file),
    /// which callers may be expecting.
    pub async fn append_to_file(
        &self,
        target: &RemoteTarget,
        path: &str,
        content: &str,
    ) -> Result<bool> {
        let cmd = format!("echo {} >> {}", quote(content), quote(path));
        let result = self.exec.execute(target, &cmd).await?;
        if result.is_success() {
            tracing::debug!(remote = %target, path = path, "appended to file");
        } else {
            tracing::info!(
                remote = %target,
                path = path,
                stderr = %result.stderr.trim(),
                "append refused"
            );
        }
        Ok(result.is_success())
    }

    /// Stats every entry below every mount; true iff all of them succeed.
    ///
    /// All mounts are probed even after a failure so the log names each
    /// broken client.
    pub async fn stat_all(&self, mounts: &[MountPoint]) -> Result<bool> {
        let mut all_ok = true;
        for mount in mounts {
            let cmd = format!("find {} | xargs stat", quote(&mount.mountpoint));
            let result = self.exec.execute(&mount.target(), &cmd).await?;
            if result.is_success() {
                tracing::debug!(mount = %mount, "stat succeeded");
            } else {
                tracing::error!(mount = %mount, stderr = %result.stderr.trim(), "stat failed");
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Creates empty files `dir/prefix1..=prefixN`.
    pub async fn create_files(
        &self,
        target: &RemoteTarget,
        dir: &str,
        prefix: &str,
        count: u32,
    ) -> Result<CommandResult> {
        let cmd = format!(
            "for i in $(seq 1 {}); do touch {}$i || exit 1; done",
            count,
            quote(&join_path(dir, prefix))
        );
        let result = self.exec.execute(target, &cmd).await?;
        tracing::info!(
            remote = %target,
            dir = dir,
            prefix = prefix,
            count = count,
            exit_code = result.exit_code,
            "created numbered files"
        );
        Ok(result)
    }

    /// Owner and mode of `path`; `None` if it cannot be stat'ed.
    pub async fn stat_file(
        &self,
        target: &RemoteTarget,
        path: &str,
    ) -> Result<Option<FileStat>> {
        let cmd = format!("stat -c '%u %g %a' {}", quote(path));
        let result = self.exec.execute(target, &cmd).await?;
        if !result.is_success() {
            return Ok(None);
        }
        FileStat::parse(result.stdout.trim())
            .map(Some)
            .ok_or_else(|| RemoteError::Parse {
                host: target.host().to_string(),
                reason: format!("bad stat output for {}: {:?}", path, result.stdout),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers each command with a canned result and records what it saw.
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        answer: Box<dyn Fn(&str) -> CommandResult + Send + Sync>,
    }

    impl Recorder {
        fn new(answer: impl Fn(&str) -> CommandResult + Send + Sync + 'static) -> Self {
            Self {
                seen: Mutex::new(vec![]),
                answer: Box::new(answer),
            }
        }

        fn commands(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for Recorder {
        async fn execute(&self, target: &RemoteTarget, command: &str) -> Result<CommandResult> {
            self.seen
                .lock()
                .unwrap()
                .push((target.to_string(), command.to_string()));
            Ok((self.answer)(command))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RemoteExecutor for Unreachable {
        async fn execute(&self, target: &RemoteTarget, _command: &str) -> Result<CommandResult> {
            Err(RemoteError::Connection {
                host: target.host().to_string(),
                reason: "No route to host".to_string(),
            })
        }
    }

    #[test]
    fn test_file_stat_parse() {
        assert_eq!(
            FileStat::parse("65534 65534 644"),
            Some(FileStat { uid: 65534, gid: 65534, mode: 0o644 })
        );
        assert_eq!(FileStat::parse("0 0"), None);
        assert_eq!(FileStat::parse("0 0 999"), None);
        assert_eq!(FileStat::parse("0 0 644 extra"), None);
    }

    #[test]
    fn test_numbered_names() {
        assert_eq!(numbered_names("file", 3), vec!["file1", "file2", "file3"]);
        assert!(numbered_names("file", 0).is_empty());
    }

    #[tokio::test]
    async fn test_set_permissions_formats_octal() {
        let exec = Recorder::new(|_| CommandResult::ok(""));
        let probe = FileProbe::new(&exec);
        let ok = probe
            .set_permissions(&RemoteTarget::new("c1"), "/mnt/v1", 0o777)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(exec.commands()[0].1, "chmod 777 /mnt/v1");
    }

    #[tokio::test]
    async fn test_append_refused_is_false_not_error() {
        let exec = Recorder::new(|_| CommandResult::failed(1, "Permission denied"));
        let probe = FileProbe::new(&exec);
        let ok = probe
            .append_to_file(&RemoteTarget::with_user("c1", "root"), "/mnt/v1/file10", "hello")
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(exec.commands()[0].0, "root@c1");
        assert_eq!(exec.commands()[0].1, "echo hello >> /mnt/v1/file10");
    }

    #[tokio::test]
    async fn test_append_quotes_content() {
        let exec = Recorder::new(|_| CommandResult::ok(""));
        let probe = FileProbe::new(&exec);
        probe
            .append_to_file(&RemoteTarget::new("c1"), "/mnt/v1/a b", "x; rm -rf /")
            .await
            .unwrap();
        assert_eq!(exec.commands()[0].1, "echo 'x; rm -rf /' >> '/mnt/v1/a b'");
    }

    #[tokio::test]
    async fn test_stat_all_checks_every_mount() {
        let exec = Recorder::new(|cmd| {
            if cmd.contains("/mnt/bad") {
                CommandResult::failed(1, "stale file handle")
            } else {
                CommandResult::ok("")
            }
        });
        let probe = FileProbe::new(&exec);
        let mounts = vec![
            MountPoint::nfs("c1", "/mnt/bad", "vip"),
            MountPoint::nfs("c2", "/mnt/good", "vip"),
        ];
        assert!(!probe.stat_all(&mounts).await.unwrap());
        assert_eq!(exec.commands().len(), 2);

        assert!(probe.stat_all(&mounts[1..]).await.unwrap());
        assert!(probe.stat_all(&[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_files_command() {
        let exec = Recorder::new(|_| CommandResult::ok(""));
        let probe = FileProbe::new(&exec);
        let result = probe
            .create_files(&RemoteTarget::new("c1"), "/mnt/v1", "Squashfile", 10)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(
            exec.commands()[0].1,
            "for i in $(seq 1 10); do touch /mnt/v1/Squashfile$i || exit 1; done"
        );
    }

    #[tokio::test]
    async fn test_stat_file() {
        let exec = Recorder::new(|cmd| {
            if cmd.ends_with("missing") {
                CommandResult::failed(1, "No such file")
            } else if cmd.ends_with("garbage") {
                CommandResult::ok("what")
            } else {
                CommandResult::ok("0 0 755\n")
            }
        });
        let probe = FileProbe::new(&exec);
        let target = RemoteTarget::new("c1");
        assert_eq!(
            probe.stat_file(&target, "/mnt/v1").await.unwrap(),
            Some(FileStat { uid: 0, gid: 0, mode: 0o755 })
        );
        assert_eq!(probe.stat_file(&target, "/mnt/missing").await.unwrap(), None);
        assert!(probe.stat_file(&target, "/mnt/garbage").await.is_err());
    }

    #[tokio::test]
    async fn test_connection_error_propagates() {
        let probe = FileProbe::new(&Unreachable);
        let err = probe
            .append_to_file(&RemoteTarget::new("c9"), "/mnt/v1/f", "x")
            .await
            .unwrap_err();
        assert_eq!(err.host(), Some("c9"));
    }
}
