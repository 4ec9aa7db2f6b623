//! Harness configuration

use std::path::Path;
use std::time::Duration;

use nfsqa_cluster::{GaneshaConfig, PollPolicy, VolumeLayout, VolumeType};
use nfsqa_remote::{MountPoint, MountProtocol, SshConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no servers configured")]
    NoServers,
    #[error("no client mounts configured")]
    NoMounts,
    #[error("management node {0} is not one of the servers")]
    UnknownMnode(String),
    #[error("invalid volume: {0}")]
    InvalidVolume(String),
    #[error("mount path {0} must be absolute")]
    RelativeMount(String),
    #[error("poll policy must allow at least one attempt")]
    ZeroPollAttempts,
    #[error("test timeout must be at least one second")]
    ZeroTestTimeout,
    #[error("brick root {0:?} must be an absolute path without whitespace")]
    InvalidBrickRoot(String),
    #[error("scenario: {0}")]
    InvalidScenario(String),
}

/// One client mount as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub client: String,
    pub mountpoint: String,
    /// Identity that performs I/O on the mount (default: root)
    #[serde(default)]
    pub user: Option<String>,
    /// Server to mount from (default: Ganesha VIP, else the management node)
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub vtype: VolumeType,
    #[serde(default = "default_brick_root")]
    pub brick_root: String,
    /// Explicit brick counts; derived from `type` when absent
    #[serde(default)]
    pub layout: Option<VolumeLayout>,
}

fn default_brick_root() -> String {
    "/bricks/brick0".to_string()
}

impl VolumeConfig {
    pub fn layout(&self) -> VolumeLayout {
        self.layout
            .unwrap_or_else(|| VolumeLayout::default_for(self.vtype))
    }
}

/// Knobs of the root-squash scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Files created by root before squash is enabled
    pub files: u32,
    /// Files created after squash is enabled
    pub squash_files: u32,
    /// Which pre-squash file the squashed identity tries to edit
    pub root_file_index: u32,
    /// Which post-squash file the squashed identity tries to edit
    pub squash_file_index: u32,
    /// Text appended during the edit checks
    pub content: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            files: 10,
            squash_files: 10,
            root_file_index: 10,
            squash_file_index: 5,
            content: "hello".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub servers: Vec<String>,
    /// Node management commands run on (default: first server)
    #[serde(default)]
    pub mnode: Option<String>,
    pub mounts: Vec<MountConfig>,
    pub volume: VolumeConfig,
    #[serde(default = "default_protocol")]
    pub protocol: MountProtocol,
    #[serde(default)]
    pub ganesha: GaneshaConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
}

fn default_protocol() -> MountProtocol {
    MountProtocol::Nfs
}

fn default_test_timeout_secs() -> u64 {
    1800
}

impl HarnessConfig {
    /// Three servers, one root-owned NFS mount on `c1`: the layout the
    /// root-squash cases were written against.
    pub fn example() -> Self {
        Self {
            servers: vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
            mnode: None,
            mounts: vec![MountConfig {
                client: "c1".to_string(),
                mountpoint: "/mnt/v1".to_string(),
                user: None,
                server: None,
            }],
            volume: VolumeConfig {
                name: "v1".to_string(),
                vtype: VolumeType::Replicated,
                brick_root: default_brick_root(),
                layout: None,
            },
            protocol: MountProtocol::Nfs,
            ganesha: GaneshaConfig::default(),
            ssh: SshConfig::default(),
            poll: PollPolicy::default(),
            scenario: ScenarioConfig::default(),
            test_timeout_secs: default_test_timeout_secs(),
        }
    }

    /// Loads a YAML, TOML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: HarnessConfig = match ext.to_lowercase().as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        if self.mounts.is_empty() {
            return Err(ConfigError::NoMounts);
        }
        if let Some(mnode) = &self.mnode {
            if !self.servers.contains(mnode) {
                return Err(ConfigError::UnknownMnode(mnode.clone()));
            }
        }
        nfsqa_cluster::error::validate_volume_name(&self.volume.name)
            .map_err(|e| ConfigError::InvalidVolume(e.to_string()))?;
        let layout = self.volume.layout();
        if layout.vtype != self.volume.vtype {
            return Err(ConfigError::InvalidVolume(format!(
                "layout is {} but volume type is {}",
                layout.vtype, self.volume.vtype
            )));
        }
        layout
            .validate()
            .map_err(|e| ConfigError::InvalidVolume(e.to_string()))?;
        let root = &self.volume.brick_root;
        if !root.starts_with('/') || root.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidBrickRoot(root.clone()));
        }
        for m in &self.mounts {
            if !m.mountpoint.starts_with('/') {
                return Err(ConfigError::RelativeMount(m.mountpoint.clone()));
            }
        }
        if self.poll.attempts == 0 {
            return Err(ConfigError::ZeroPollAttempts);
        }
        if self.test_timeout_secs == 0 {
            return Err(ConfigError::ZeroTestTimeout);
        }
        let s = &self.scenario;
        if s.root_file_index == 0 || s.root_file_index > s.files {
            return Err(ConfigError::InvalidScenario(format!(
                "root_file_index {} outside 1..={}",
                s.root_file_index, s.files
            )));
        }
        if s.squash_file_index == 0 || s.squash_file_index > s.squash_files {
            return Err(ConfigError::InvalidScenario(format!(
                "squash_file_index {} outside 1..={}",
                s.squash_file_index, s.squash_files
            )));
        }
        Ok(())
    }

    /// Management node.
    pub fn mnode(&self) -> &str {
        self.mnode
            .as_deref()
            .or_else(|| self.servers.first().map(String::as_str))
            .unwrap_or("localhost")
    }

    /// Host clients mount from when a mount names none.
    pub fn export_server(&self) -> &str {
        match (self.protocol, &self.ganesha.vip) {
            (MountProtocol::Nfs, Some(vip)) => vip,
            _ => self.mnode(),
        }
    }

    /// Client mounts with defaults filled in.
    pub fn mounts(&self) -> Vec<MountPoint> {
        self.mounts
            .iter()
            .map(|m| MountPoint {
                client: m.client.clone(),
                mountpoint: m.mountpoint.clone(),
                user: m.user.clone().unwrap_or_else(|| "root".to_string()),
                server: m
                    .server
                    .clone()
                    .unwrap_or_else(|| self.export_server().to_string()),
                protocol: self.protocol,
            })
            .collect()
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
servers: [s1, s2, s3]
mounts:
  - client: c1
    mountpoint: /mnt/v1
  - client: c2
    mountpoint: /mnt/v1
    user: qa
volume:
  name: testvol_replicated
  type: replicated
ganesha:
  vip: 10.0.0.100
poll:
  attempts: 30
  interval_ms: 2000
"#;

    #[test]
    fn test_example_is_valid() {
        let config = HarnessConfig::example();
        assert!(config.validate().is_ok());
        assert_eq!(config.mnode(), "s1");
        assert_eq!(config.mounts()[0].server, "s1");
        assert_eq!(config.test_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_from_file_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{}", YAML).unwrap();
        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.volume.vtype, VolumeType::Replicated);
        assert_eq!(config.volume.brick_root, "/bricks/brick0");
        assert_eq!(config.poll.attempts, 30);
        assert_eq!(config.scenario, ScenarioConfig::default());

        let mounts = config.mounts();
        assert_eq!(mounts[0].user, "root");
        assert_eq!(mounts[0].server, "10.0.0.100");
        assert_eq!(mounts[1].user, "qa");
        assert_eq!(mounts[1].protocol, MountProtocol::Nfs);
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
servers = ["s1", "s2"]
mnode = "s2"
protocol = "glusterfs"

[[mounts]]
client = "c1"
mountpoint = "/mnt/gv"

[volume]
name = "gv"
type = "distributed"
"#
        )
        .unwrap();
        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mnode(), "s2");
        assert_eq!(config.protocol, MountProtocol::Glusterfs);
        assert_eq!(config.mounts()[0].server, "s2");
    }

    #[test]
    fn test_from_file_json_roundtrip() {
        let config = HarnessConfig::example();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(HarnessConfig::from_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        let err = HarnessConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported config file extension"));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut c = HarnessConfig::example();
        c.servers.clear();
        assert_eq!(c.validate(), Err(ConfigError::NoServers));

        let mut c = HarnessConfig::example();
        c.mounts.clear();
        assert_eq!(c.validate(), Err(ConfigError::NoMounts));

        let mut c = HarnessConfig::example();
        c.mnode = Some("s9".to_string());
        assert_eq!(c.validate(), Err(ConfigError::UnknownMnode("s9".to_string())));

        let mut c = HarnessConfig::example();
        c.volume.name = "bad name".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidVolume(_))));

        let mut c = HarnessConfig::example();
        c.mounts[0].mountpoint = "mnt".to_string();
        assert_eq!(c.validate(), Err(ConfigError::RelativeMount("mnt".to_string())));

        let mut c = HarnessConfig::example();
        c.poll.attempts = 0;
        assert_eq!(c.validate(), Err(ConfigError::ZeroPollAttempts));

        let mut c = HarnessConfig::example();
        c.test_timeout_secs = 0;
        assert_eq!(c.validate(), Err(ConfigError::ZeroTestTimeout));

        let mut c = HarnessConfig::example();
        c.scenario.squash_file_index = 11;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidScenario(_))));
    }

    #[test]
    fn test_validate_rejects_unsafe_brick_root() {
        for root in ["/data bricks", "bricks/brick0", "/bricks\tb", ""] {
            let mut c = HarnessConfig::example();
            c.volume.brick_root = root.to_string();
            assert_eq!(c.validate(), Err(ConfigError::InvalidBrickRoot(root.to_string())), "{:?}", root);
        }
        let mut c = HarnessConfig::example();
        c.volume.brick_root = "/data/bricks/".to_string();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_vip_ignored_for_fuse_mounts() {
        let mut c = HarnessConfig::example();
        c.ganesha.vip = Some("vip".to_string());
        assert_eq!(c.export_server(), "vip");
        c.protocol = MountProtocol::Glusterfs;
        assert_eq!(c.export_server(), "s1");
    }
}
