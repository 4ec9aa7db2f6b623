//! In-process cluster for dry runs and tests.
//!
//! `SimCluster` plays both sides of the harness boundary: it answers the
//! shell commands [`FileProbe`](nfsqa_remote::FileProbe) sends to clients
//! and implements [`ClusterControl`] directly. Volumes hold flat file
//! namespaces with owners and mode bits; root squash remaps uid 0 on NFS
//! mounts to [`NFSNOBODY`] once a refresh made it active.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use nfsqa_cluster::{ClusterControl, ClusterError, PollPolicy, SquashPolicy, VolumeLayout};
use nfsqa_remote::{CommandResult, MountPoint, MountProtocol, RemoteError, RemoteExecutor, RemoteTarget};
use regex::Regex;

use crate::config::HarnessConfig;

/// Anonymous uid root is squashed to.
pub const NFSNOBODY: u32 = 65534;

/// uid given to every non-root user name
const UNPRIVILEGED_UID: u32 = 1000;

/// Status checks a daemon or peer stays down for after a restart.
const DEFAULT_SETTLE_CHECKS: u32 = 2;

/// Misbehaviour the simulated cluster can be told to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimFault {
    /// Every command or operation touching the host fails to connect
    Unreachable(String),
    /// The named `ClusterControl` operation reports failure
    FailOperation(String),
    /// The named `ClusterControl` operation cannot reach its host
    DisconnectOperation(String),
    /// A glusterd restart silently drops root squash from every export
    ResetSquashOnRestart,
}

#[derive(Debug, Clone)]
struct SimFile {
    uid: u32,
    mode: u32,
    content: String,
}

#[derive(Debug, Clone)]
struct SimVolume {
    started: bool,
    root_uid: u32,
    root_mode: u32,
    files: BTreeMap<String, SimFile>,
}

impl SimVolume {
    fn new() -> Self {
        Self {
            started: false,
            root_uid: 0,
            root_mode: 0o755,
            files: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ExportState {
    /// Policy written to the export file
    configured: bool,
    /// Policy the running Ganesha instances enforce
    active: bool,
}

#[derive(Debug)]
struct SimState {
    servers: Vec<String>,
    volumes: BTreeMap<String, SimVolume>,
    exports: BTreeMap<String, ExportState>,
    /// (client, mountpoint) → (volume, protocol)
    mounts: BTreeMap<(String, String), (String, MountProtocol)>,
    daemon_down: BTreeMap<String, u32>,
    peers_down: u32,
    settle_checks: u32,
    faults: Vec<SimFault>,
    calls: Vec<String>,
    commands: Vec<(String, String)>,
}

impl SimState {
    fn is_unreachable(&self, host: &str) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, SimFault::Unreachable(h) if h == host))
    }

    fn fails(&self, op: &str) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, SimFault::FailOperation(o) if o == op))
    }

    /// Volume and path inside it for an absolute client path.
    fn resolve(&self, client: &str, path: &str) -> Option<(String, MountProtocol, String)> {
        self.mounts.iter().find_map(|((c, mp), (volume, protocol))| {
            if c != client {
                return None;
            }
            let mp = mp.trim_end_matches('/');
            let rel = if path.trim_end_matches('/') == mp {
                String::new()
            } else {
                path.strip_prefix(mp)?.strip_prefix('/')?.to_string()
            };
            Some((volume.clone(), *protocol, rel))
        })
    }

    fn effective_uid(&self, user: Option<&str>, volume: &str, protocol: MountProtocol) -> u32 {
        let uid = match user {
            None | Some("root") => 0,
            Some(_) => UNPRIVILEGED_UID,
        };
        let squashed = protocol == MountProtocol::Nfs
            && self.exports.get(volume).map_or(false, |e| e.active);
        if uid == 0 && squashed {
            NFSNOBODY
        } else {
            uid
        }
    }
}

fn may_write(uid: u32, owner: u32, mode: u32) -> bool {
    uid == 0 || (uid == owner && mode & 0o200 != 0) || mode & 0o002 != 0
}

struct Grammar {
    touch: Regex,
    chmod: Regex,
    append: Regex,
    stat_tree: Regex,
    stat_file: Regex,
}

impl Grammar {
    fn build() -> Result<Self, regex::Error> {
        Ok(Self {
            touch: Regex::new(r"^for i in \$\(seq 1 (\d+)\); do touch (.+)\$i \|\| exit 1; done$")?,
            chmod: Regex::new(r"^chmod ([0-7]+) (.+)$")?,
            append: Regex::new(r"^echo (.+?) >> (.+)$")?,
            stat_tree: Regex::new(r"^find (.+) \| xargs stat$")?,
            stat_file: Regex::new(r"^stat -c '%u %g %a' (.+)$")?,
        })
    }
}

fn grammar() -> Result<&'static Grammar, &'static regex::Error> {
    static GRAMMAR: OnceLock<Result<Grammar, regex::Error>> = OnceLock::new();
    GRAMMAR.get_or_init(Grammar::build).as_ref()
}

/// Reverses `nfsqa_remote::shell::quote`.
fn unquote(word: &str) -> String {
    match word.strip_prefix('\'').and_then(|w| w.strip_suffix('\'')) {
        Some(inner) => inner.replace("'\\''", "'"),
        None => word.to_string(),
    }
}

fn denied(cmd: &str, path: &str) -> CommandResult {
    CommandResult::failed(1, &format!("{}: cannot access '{}': Permission denied", cmd, path))
}

fn missing(cmd: &str, path: &str) -> CommandResult {
    CommandResult::failed(1, &format!("{}: cannot access '{}': No such file or directory", cmd, path))
}

/// Simulated storage cluster with an NFS-Ganesha export layer.
#[derive(Debug)]
pub struct SimCluster {
    poll: PollPolicy,
    state: Mutex<SimState>,
}

impl SimCluster {
    pub fn new(servers: Vec<String>, poll: PollPolicy) -> Self {
        Self {
            poll,
            state: Mutex::new(SimState {
                servers,
                volumes: BTreeMap::new(),
                exports: BTreeMap::new(),
                mounts: BTreeMap::new(),
                daemon_down: BTreeMap::new(),
                peers_down: 0,
                settle_checks: DEFAULT_SETTLE_CHECKS,
                faults: Vec::new(),
                calls: Vec::new(),
                commands: Vec::new(),
            }),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.servers.clone(), config.poll)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a call to `op` and fails it if `op` is disconnected or any of
    /// `hosts` is unreachable.
    fn begin<'h>(
        &self,
        op: &str,
        hosts: impl IntoIterator<Item = &'h str>,
    ) -> Result<MutexGuard<'_, SimState>, ClusterError> {
        let mut st = self.lock();
        st.calls.push(op.to_string());
        let disconnected = SimFault::DisconnectOperation(op.to_string());
        for host in hosts {
            if st.faults.contains(&disconnected) {
                return Err(RemoteError::Connection {
                    host: host.to_string(),
                    reason: "Connection reset by peer".to_string(),
                }
                .into());
            }
            if st.is_unreachable(host) {
                return Err(RemoteError::Connection {
                    host: host.to_string(),
                    reason: "No route to host".to_string(),
                }
                .into());
            }
        }
        Ok(st)
    }

    pub fn inject(&self, fault: SimFault) {
        tracing::debug!(fault = ?fault, "injecting fault");
        let mut st = self.lock();
        if !st.faults.contains(&fault) {
            st.faults.push(fault);
        }
    }

    pub fn clear(&self, fault: &SimFault) {
        self.lock().faults.retain(|f| f != fault);
    }

    /// Status checks that report glusterd (and peers) down after a restart.
    pub fn set_daemon_settle_checks(&self, checks: u32) {
        self.lock().settle_checks = checks;
    }

    /// Creates, starts and exports `volume` if needed and mounts it over NFS
    /// at `client:mountpoint`, bypassing the control operations.
    pub fn attach_mount(&self, client: &str, mountpoint: &str, volume: &str) {
        let mut st = self.lock();
        st.volumes
            .entry(volume.to_string())
            .or_insert_with(SimVolume::new)
            .started = true;
        st.exports.entry(volume.to_string()).or_default();
        st.mounts.insert(
            (client.to_string(), mountpoint.to_string()),
            (volume.to_string(), MountProtocol::Nfs),
        );
    }

    /// Names of existing volumes.
    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    /// Mounts as `client:mountpoint`.
    pub fn mounted(&self) -> Vec<String> {
        self.lock()
            .mounts
            .keys()
            .map(|(c, mp)| format!("{}:{}", c, mp))
            .collect()
    }

    pub fn is_exported(&self, volume: &str) -> bool {
        self.lock().exports.contains_key(volume)
    }

    /// Contents of a file inside a volume.
    pub fn file_content(&self, volume: &str, name: &str) -> Option<String> {
        self.lock()
            .volumes
            .get(volume)?
            .files
            .get(name)
            .map(|f| f.content.clone())
    }

    /// Control operations called so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }

    /// Shell commands received so far as `(host, command)`.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.lock().commands.clone()
    }

    fn run_command(st: &mut SimState, target: &RemoteTarget, command: &str) -> Result<CommandResult, RemoteError> {
        let g = grammar().map_err(|e| RemoteError::Parse {
            host: target.host().to_string(),
            reason: e.to_string(),
        })?;
        let client = target.host();
        let user = target.user();

        if let Some(c) = g.touch.captures(command) {
            let count: u32 = c[1].parse().unwrap_or(0);
            let base = unquote(&c[2]);
            for i in 1..=count {
                let path = format!("{}{}", base, i);
                let Some((volume, protocol, rel)) = st.resolve(client, &path) else {
                    return Ok(missing("touch", &path));
                };
                let uid = st.effective_uid(user, &volume, protocol);
                let Some(vol) = st.volumes.get_mut(&volume) else {
                    return Ok(missing("touch", &path));
                };
                match vol.files.get(&rel) {
                    Some(f) if !may_write(uid, f.uid, f.mode) => return Ok(denied("touch", &path)),
                    Some(_) => {}
                    None if rel.is_empty() || rel.contains('/') => return Ok(missing("touch", &path)),
                    None => {
                        if !may_write(uid, vol.root_uid, vol.root_mode) {
                            return Ok(denied("touch", &path));
                        }
                        vol.files.insert(
                            rel,
                            SimFile {
                                uid,
                                mode: 0o644,
                                content: String::new(),
                            },
                        );
                    }
                }
            }
            return Ok(CommandResult::ok(""));
        }

        if let Some(c) = g.chmod.captures(command) {
            let mode = u32::from_str_radix(&c[1], 8).unwrap_or(0);
            let path = unquote(&c[2]);
            let Some((volume, protocol, rel)) = st.resolve(client, &path) else {
                return Ok(missing("chmod", &path));
            };
            let uid = st.effective_uid(user, &volume, protocol);
            let Some(vol) = st.volumes.get_mut(&volume) else {
                return Ok(missing("chmod", &path));
            };
            if rel.is_empty() {
                if uid != 0 && uid != vol.root_uid {
                    return Ok(denied("chmod", &path));
                }
                vol.root_mode = mode;
            } else {
                let Some(f) = vol.files.get_mut(&rel) else {
                    return Ok(missing("chmod", &path));
                };
                if uid != 0 && uid != f.uid {
                    return Ok(denied("chmod", &path));
                }
                f.mode = mode;
            }
            return Ok(CommandResult::ok(""));
        }

        if let Some(c) = g.append.captures(command) {
            let content = unquote(&c[1]);
            let path = unquote(&c[2]);
            let Some((volume, protocol, rel)) = st.resolve(client, &path) else {
                return Ok(missing("sh", &path));
            };
            let uid = st.effective_uid(user, &volume, protocol);
            let Some(vol) = st.volumes.get_mut(&volume) else {
                return Ok(missing("sh", &path));
            };
            if rel.is_empty() || rel.contains('/') {
                return Ok(missing("sh", &path));
            }
            let (root_uid, root_mode) = (vol.root_uid, vol.root_mode);
            match vol.files.get_mut(&rel) {
                Some(f) if may_write(uid, f.uid, f.mode) => {
                    f.content.push_str(&content);
                    f.content.push('\n');
                }
                Some(_) => return Ok(denied("sh", &path)),
                None if may_write(uid, root_uid, root_mode) => {
                    vol.files.insert(
                        rel,
                        SimFile {
                            uid,
                            mode: 0o644,
                            content: format!("{}\n", content),
                        },
                    );
                }
                None => return Ok(denied("sh", &path)),
            }
            return Ok(CommandResult::ok(""));
        }

        if let Some(c) = g.stat_tree.captures(command) {
            let path = unquote(&c[1]);
            let listing = st
                .resolve(client, &path)
                .filter(|(_, _, rel)| rel.is_empty())
                .and_then(|(volume, _, _)| st.volumes.get(&volume))
                .map(|vol| {
                    vol.files
                        .keys()
                        .map(|name| format!("  File: {}/{}\n", path.trim_end_matches('/'), name))
                        .collect::<String>()
                });
            return Ok(match listing {
                Some(out) => CommandResult::ok(&format!("  File: {}\n{}", path, out)),
                None => missing("find", &path),
            });
        }

        if let Some(c) = g.stat_file.captures(command) {
            let path = unquote(&c[1]);
            let found = st.resolve(client, &path).and_then(|(volume, _, rel)| {
                let vol = st.volumes.get(&volume)?;
                if rel.is_empty() {
                    Some((vol.root_uid, vol.root_mode))
                } else {
                    vol.files.get(&rel).map(|f| (f.uid, f.mode))
                }
            });
            return Ok(match found {
                Some((uid, mode)) => CommandResult::ok(&format!("{} {} {:o}\n", uid, uid, mode)),
                None => missing("stat", &path),
            });
        }

        Ok(CommandResult::failed(127, &format!("sh: {}: command not found", command)))
    }
}

#[async_trait]
impl RemoteExecutor for SimCluster {
    async fn execute(&self, target: &RemoteTarget, command: &str) -> nfsqa_remote::Result<CommandResult> {
        let mut st = self.lock();
        st.commands.push((target.host().to_string(), command.to_string()));
        if st.is_unreachable(target.host()) {
            return Err(RemoteError::Connection {
                host: target.host().to_string(),
                reason: "No route to host".to_string(),
            });
        }
        let result = Self::run_command(&mut st, target, command)?;
        tracing::debug!(remote = %target, command = command, exit_code = result.exit_code, "simulated command");
        Ok(result)
    }
}

#[async_trait]
impl ClusterControl for SimCluster {
    fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    async fn set_root_squash(
        &self,
        server: &str,
        volume: &str,
        enabled: bool,
        refresh_config: bool,
    ) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("set_root_squash", [server])?;
        if st.fails("set_root_squash") {
            return Ok(false);
        }
        let Some(export) = st.exports.get_mut(volume) else {
            return Ok(false);
        };
        export.configured = enabled;
        if refresh_config {
            export.active = enabled;
        }
        Ok(true)
    }

    async fn root_squash_policy(&self, server: &str, volume: &str) -> nfsqa_cluster::Result<Option<SquashPolicy>> {
        let st = self.begin("root_squash_policy", [server])?;
        Ok(st
            .exports
            .get(volume)
            .map(|e| SquashPolicy::from_enabled(e.configured)))
    }

    async fn export_volume(&self, node: &str, volume: &str) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("export_volume", [node])?;
        if st.fails("export_volume") || !st.volumes.get(volume).map_or(false, |v| v.started) {
            return Ok(false);
        }
        st.exports.entry(volume.to_string()).or_default();
        Ok(true)
    }

    async fn unexport_volume(&self, node: &str, volume: &str) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("unexport_volume", [node])?;
        if st.fails("unexport_volume") {
            return Ok(false);
        }
        st.exports.remove(volume);
        Ok(true)
    }

    async fn is_volume_exported(&self, node: &str, volume: &str) -> nfsqa_cluster::Result<bool> {
        let st = self.begin("is_volume_exported", [node])?;
        Ok(st.exports.contains_key(volume))
    }

    async fn restart_cluster_daemon(&self, servers: &[String]) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("restart_cluster_daemon", servers.iter().map(String::as_str))?;
        if st.fails("restart_cluster_daemon") {
            return Ok(false);
        }
        let settle = st.settle_checks;
        for server in servers {
            st.daemon_down.insert(server.clone(), settle);
        }
        st.peers_down = settle;
        if st.faults.contains(&SimFault::ResetSquashOnRestart) {
            for export in st.exports.values_mut() {
                *export = ExportState::default();
            }
        }
        Ok(true)
    }

    async fn is_cluster_daemon_running(&self, servers: &[String]) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("is_cluster_daemon_running", servers.iter().map(String::as_str))?;
        let mut running = true;
        for server in servers {
            if let Some(left) = st.daemon_down.get_mut(server) {
                if *left > 0 {
                    *left -= 1;
                    running = false;
                }
            }
        }
        Ok(running)
    }

    async fn are_peers_connected(&self, node: &str, servers: &[String]) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("are_peers_connected", [node])?;
        if servers.iter().any(|s| s != node && st.is_unreachable(s)) {
            return Ok(false);
        }
        if st.peers_down > 0 {
            st.peers_down -= 1;
            return Ok(false);
        }
        let known = servers.iter().all(|s| st.servers.contains(s));
        Ok(known)
    }

    async fn is_ganesha_cluster_healthy(&self, node: &str) -> nfsqa_cluster::Result<bool> {
        let st = self.begin("is_ganesha_cluster_healthy", [node])?;
        Ok(!st.fails("is_ganesha_cluster_healthy"))
    }

    async fn create_volume(
        &self,
        node: &str,
        volume: &str,
        layout: &VolumeLayout,
        servers: &[String],
    ) -> nfsqa_cluster::Result<bool> {
        nfsqa_cluster::error::validate_volume_name(volume)?;
        let mut st = self.begin(
            "create_volume",
            std::iter::once(node).chain(servers.iter().map(String::as_str)),
        )?;
        if st.fails("create_volume") || st.volumes.contains_key(volume) {
            return Ok(false);
        }
        layout.validate()?;
        tracing::debug!(volume = volume, bricks = layout.brick_count(), "simulated volume create");
        st.volumes.insert(volume.to_string(), SimVolume::new());
        Ok(true)
    }

    async fn start_volume(&self, node: &str, volume: &str) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("start_volume", [node])?;
        if st.fails("start_volume") {
            return Ok(false);
        }
        match st.volumes.get_mut(volume) {
            Some(v) => {
                v.started = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cleanup_volume(&self, node: &str, volume: &str, servers: &[String]) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin(
            "cleanup_volume",
            std::iter::once(node).chain(servers.iter().map(String::as_str)),
        )?;
        if st.fails("cleanup_volume") {
            return Ok(false);
        }
        st.volumes.remove(volume);
        st.exports.remove(volume);
        Ok(true)
    }

    async fn mount_volume(&self, mount: &MountPoint, volume: &str) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("mount_volume", [mount.client.as_str()])?;
        if st.fails("mount_volume") || !st.volumes.get(volume).map_or(false, |v| v.started) {
            return Ok(false);
        }
        if mount.protocol == MountProtocol::Nfs && !st.exports.contains_key(volume) {
            return Ok(false);
        }
        st.mounts.insert(
            (mount.client.clone(), mount.mountpoint.clone()),
            (volume.to_string(), mount.protocol),
        );
        Ok(true)
    }

    async fn unmount_volume(&self, mount: &MountPoint) -> nfsqa_cluster::Result<bool> {
        let mut st = self.begin("unmount_volume", [mount.client.as_str()])?;
        if st.fails("unmount_volume") {
            return Ok(false);
        }
        st.mounts
            .remove(&(mount.client.clone(), mount.mountpoint.clone()));
        Ok(true)
    }
}
