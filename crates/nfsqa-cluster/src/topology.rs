//! Volume types and brick layouts

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClusterError, Result};

/// Volume topology a test can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeType {
    Replicated,
    Distributed,
    DistributedReplicated,
    Dispersed,
    DistributedDispersed,
}

impl VolumeType {
    /// Every supported topology.
    pub const ALL: [VolumeType; 5] = [
        VolumeType::Replicated,
        VolumeType::Distributed,
        VolumeType::DistributedReplicated,
        VolumeType::Dispersed,
        VolumeType::DistributedDispersed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::Replicated => "replicated",
            VolumeType::Distributed => "distributed",
            VolumeType::DistributedReplicated => "distributed-replicated",
            VolumeType::Dispersed => "dispersed",
            VolumeType::DistributedDispersed => "distributed-dispersed",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Brick counts for `gluster volume create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLayout {
    pub vtype: VolumeType,
    /// Number of distribution subvolumes
    pub dist_count: u32,
    /// Copies per replica set (replicated types only)
    pub replica_count: u32,
    /// Bricks per disperse set (dispersed types only)
    pub disperse_count: u32,
    /// Redundancy bricks per disperse set
    pub redundancy_count: u32,
}

impl VolumeLayout {
    /// Layout used when the configuration names only a topology.
    pub fn default_for(vtype: VolumeType) -> Self {
        let (dist_count, replica_count, disperse_count, redundancy_count) = match vtype {
            VolumeType::Replicated => (1, 3, 0, 0),
            VolumeType::Distributed => (4, 0, 0, 0),
            VolumeType::DistributedReplicated => (2, 3, 0, 0),
            VolumeType::Dispersed => (1, 0, 6, 2),
            VolumeType::DistributedDispersed => (2, 0, 6, 2),
        };
        Self {
            vtype,
            dist_count,
            replica_count,
            disperse_count,
            redundancy_count,
        }
    }

    /// Checks the counts are consistent with the topology.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ClusterError::InvalidTopology {
                reason: format!("{}: {}", self.vtype, reason),
            })
        };
        if self.dist_count == 0 {
            return invalid("dist_count must be at least 1");
        }
        match self.vtype {
            VolumeType::Replicated | VolumeType::DistributedReplicated => {
                if self.replica_count < 2 {
                    return invalid("replica_count must be at least 2");
                }
            }
            VolumeType::Dispersed | VolumeType::DistributedDispersed => {
                if self.disperse_count < 3 {
                    return invalid("disperse_count must be at least 3");
                }
                if self.redundancy_count == 0 || 2 * self.redundancy_count >= self.disperse_count {
                    return invalid("redundancy_count must be positive and less than half of disperse_count");
                }
            }
            VolumeType::Distributed => {}
        }
        if matches!(self.vtype, VolumeType::Replicated | VolumeType::Dispersed) && self.dist_count != 1 {
            return invalid("non-distributed volume must have dist_count 1");
        }
        Ok(())
    }

    /// Total number of bricks.
    pub fn brick_count(&self) -> u32 {
        match self.vtype {
            VolumeType::Distributed => self.dist_count,
            VolumeType::Replicated | VolumeType::DistributedReplicated => {
                self.dist_count * self.replica_count
            }
            VolumeType::Dispersed | VolumeType::DistributedDispersed => {
                self.dist_count * self.disperse_count
            }
        }
    }

    /// Type arguments for `gluster volume create`, e.g. `replica 3`.
    pub fn create_args(&self) -> String {
        match self.vtype {
            VolumeType::Distributed => String::new(),
            VolumeType::Replicated | VolumeType::DistributedReplicated => {
                format!("replica {}", self.replica_count)
            }
            VolumeType::Dispersed | VolumeType::DistributedDispersed => format!(
                "disperse {} redundancy {}",
                self.disperse_count, self.redundancy_count
            ),
        }
    }

    /// Brick paths spread round-robin over `servers`.
    ///
    /// Consecutive bricks land on different servers so every replica or
    /// disperse set spans as many nodes as possible.
    pub fn bricks(&self, servers: &[String], brick_root: &str, volume: &str) -> Result<Vec<String>> {
        self.validate()?;
        if servers.is_empty() {
            return Err(ClusterError::InvalidTopology {
                reason: "no servers to place bricks on".to_string(),
            });
        }
        let root = brick_root.trim_end_matches('/');
        Ok((0..self.brick_count() as usize)
            .map(|i| {
                let server = &servers[i % servers.len()];
                format!("{}:{}/{}_brick{}", server, root, volume, i)
            })
            .collect())
    }
}
