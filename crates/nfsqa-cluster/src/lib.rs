//! nfsqa cluster control
//!
//! A narrow, typed facade over the management operations the functional
//! tests need: root-squash policy, NFS-Ganesha export state, glusterd
//! lifecycle, peer convergence and volume setup/cleanup. The
//! [`GlusterCli`] implementation drives all of it through remote shell
//! commands on the cluster nodes.

pub mod control;
pub mod error;
pub mod ganesha;
pub mod gluster;
pub mod poll;
pub mod topology;

pub use control::ClusterControl;
pub use error::{ClusterError, Result};
pub use ganesha::{GaneshaConfig, SquashPolicy};
pub use gluster::GlusterCli;
pub use poll::{poll_until, PollPolicy};
pub use topology::{VolumeLayout, VolumeType};
