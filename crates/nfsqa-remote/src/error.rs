//! Error types for remote command execution

use thiserror::Error;

/// Failures of the execution channel itself.
///
/// A command that ran and exited non-zero is not an error; it is reported
/// through [`crate::CommandResult::exit_code`].
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Host could not be reached or the ssh session could not be set up
    #[error("connection to {host} failed: {reason}")]
    Connection {
        /// Target host
        host: String,
        /// Diagnostic from the transport
        reason: String,
    },
    /// Command did not finish within the configured bound
    #[error("command on {host} timed out after {timeout_ms}ms: {command}")]
    Timeout {
        /// Target host
        host: String,
        /// Command that was running
        command: String,
        /// Bound that was exceeded
        timeout_ms: u64,
    },
    /// Local process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Output of a command could not be interpreted
    #[error("unexpected output from {host}: {reason}")]
    Parse {
        /// Target host
        host: String,
        /// What was wrong with the output
        reason: String,
    },
}

impl RemoteError {
    /// Host the failed command was aimed at, if known.
    pub fn host(&self) -> Option<&str> {
        match self {
            RemoteError::Connection { host, .. }
            | RemoteError::Timeout { host, .. }
            | RemoteError::Parse { host, .. } => Some(host),
            RemoteError::Spawn { .. } => None,
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout { .. })
    }
}

/// Result type alias using RemoteError as the error type.
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = RemoteError::Connection {
            host: "s1".to_string(),
            reason: "No route to host".to_string(),
        };
        assert_eq!(err.to_string(), "connection to s1 failed: No route to host");
        assert_eq!(err.host(), Some("s1"));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_error_display() {
        let err = RemoteError::Timeout {
            host: "c1".to_string(),
            command: "sleep 100".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(
            err.to_string(),
            "command on c1 timed out after 500ms: sleep 100"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_spawn_error_has_no_host() {
        let err = RemoteError::Spawn {
            program: "ssh".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.host().is_none());
        assert!(err.to_string().starts_with("failed to spawn ssh"));
    }
}
