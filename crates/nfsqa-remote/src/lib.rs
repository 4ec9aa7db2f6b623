#![warn(missing_docs)]

//! nfsqa remote layer
//!
//! Runs shell commands on test nodes (servers and NFS clients) and derives
//! file/permission checks from their exit codes. Everything the harness does
//! to the environment goes through [`RemoteExecutor::execute`].

pub mod error;
pub mod executor;
pub mod probe;
pub mod shell;
pub mod target;

pub use error::{RemoteError, Result};
pub use executor::{HostExecutor, LocalExecutor, RemoteExecutor, SshConfig, SshExecutor};
pub use probe::{numbered_names, FileProbe, FileStat};
pub use shell::{join_path, quote};
pub use target::{CommandResult, MountPoint, MountProtocol, RemoteTarget};
