//! Error types for cluster control operations

use nfsqa_remote::RemoteError;
use thiserror::Error;

/// Faults raised while driving the cluster.
///
/// A management command that ran but refused (non-zero exit, volume still
/// exported after the poll bound) is `Ok(false)`, not an error.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid volume topology: {reason}")]
    InvalidTopology { reason: String },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
}

impl ClusterError {
    /// Whether the failure is a command timeout on some node.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Remote(e) if e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Rejects volume names the gluster CLI would refuse or that could break
/// out of the commands they are spliced into.
pub fn validate_volume_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(ClusterError::InvalidName {
            name: name.to_string(),
            reason: "must be 1-64 characters".to_string(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ClusterError::InvalidName {
            name: name.to_string(),
            reason: "only letters, digits, '_' and '-' are allowed".to_string(),
        });
    }
    Ok(())
}
