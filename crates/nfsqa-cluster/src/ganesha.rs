//! NFS-Ganesha export file and HA script helpers

use nfsqa_remote::shell::quote;
use serde::{Deserialize, Serialize};

/// Line the HA status report prints when every node is serving.
pub const HEALTHY_MARKER: &str = "Cluster HA Status: HEALTHY";

/// Root-squash setting of an export block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SquashPolicy {
    RootSquash,
    NoRootSquash,
}

impl SquashPolicy {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            SquashPolicy::RootSquash
        } else {
            SquashPolicy::NoRootSquash
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self == SquashPolicy::RootSquash
    }

    /// Value of the `Squash` key in the export block.
    pub fn conf_value(&self) -> &'static str {
        match self {
            SquashPolicy::RootSquash => "Root_squash",
            SquashPolicy::NoRootSquash => "No_root_squash",
        }
    }

    /// Parses a `Squash` value as Ganesha accepts it (case-insensitive,
    /// with or without quotes and the trailing semicolon).
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().trim_end_matches(';').trim_matches('"').to_ascii_lowercase();
        match v.as_str() {
            "root_squash" | "rootsquash" | "root" => Some(SquashPolicy::RootSquash),
            "no_root_squash" | "noidsquash" | "none" | "no_idsquash" => Some(SquashPolicy::NoRootSquash),
            _ => None,
        }
    }
}

/// Where NFS-Ganesha keeps its shared configuration and HA tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaneshaConfig {
    /// Gluster shared storage mount on every server
    pub shared_storage_dir: String,
    /// HA management script
    pub ha_script: String,
    /// Virtual IP clients mount from; falls back to the management node
    pub vip: Option<String>,
    /// NFS protocol version used for client mounts
    pub nfs_version: u8,
}

impl Default for GaneshaConfig {
    fn default() -> Self {
        Self {
            shared_storage_dir: "/var/run/gluster/shared_storage".to_string(),
            ha_script: "/usr/libexec/ganesha/ganesha-ha.sh".to_string(),
            vip: None,
            nfs_version: 4,
        }
    }
}

impl GaneshaConfig {
    /// Directory holding `ganesha.conf`, `ganesha-ha.conf` and `exports/`.
    pub fn ganesha_dir(&self) -> String {
        format!("{}/nfs-ganesha", self.shared_storage_dir.trim_end_matches('/'))
    }

    /// Export block file generated for `volume`.
    pub fn export_file(&self, volume: &str) -> String {
        format!("{}/exports/export.{}.conf", self.ganesha_dir(), volume)
    }

    /// Rewrites the `Squash` key of `volume`'s export and verifies the result.
    pub fn set_squash_command(&self, volume: &str, policy: SquashPolicy) -> String {
        let file = quote(&self.export_file(volume));
        format!(
            "sed -i 's/Squash=.*;/Squash=\"{value}\";/g' {file} && grep -q 'Squash=\"{value}\";' {file}",
            value = policy.conf_value(),
            file = file
        )
    }

    /// Prints the current `Squash` assignment of `volume`'s export.
    pub fn query_squash_command(&self, volume: &str) -> String {
        format!("grep -o 'Squash=[^;]*' {}", quote(&self.export_file(volume)))
    }

    /// Parses [`Self::query_squash_command`] output.
    pub fn parse_squash(stdout: &str) -> Option<SquashPolicy> {
        stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix("Squash="))
            .last()
            .and_then(SquashPolicy::parse)
    }

    /// Makes the running Ganesha instances reload `volume`'s export.
    pub fn refresh_config_command(&self, volume: &str) -> String {
        format!(
            "{} --refresh-config {} {}",
            quote(&self.ha_script),
            quote(&self.ganesha_dir()),
            quote(volume)
        )
    }

    /// HA cluster status report.
    pub fn status_command(&self) -> String {
        format!("{} --status {}", quote(&self.ha_script), quote(&self.ganesha_dir()))
    }

    /// Whether a status report says every node is serving.
    pub fn is_healthy_status(stdout: &str) -> bool {
        stdout.lines().any(|l| l.trim() == HEALTHY_MARKER)
    }
}
