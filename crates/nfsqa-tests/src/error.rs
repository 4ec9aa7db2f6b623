//! Step failures and their classification

use std::fmt;
use std::time::Duration;

use nfsqa_cluster::ClusterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a test did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Resource acquisition failed before the body ran
    Setup,
    /// An expected outcome did not hold
    Assertion,
    /// The body could not drive the environment (unreachable host, timeout)
    Execution,
    /// A release step failed
    Teardown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Setup => "setup",
            FailureKind::Assertion => "assertion",
            FailureKind::Execution => "execution",
            FailureKind::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Failure of a single setup, body or teardown step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("setup step '{step}' failed: {reason}")]
    Setup { step: String, reason: String },

    #[error("assertion failed at '{step}': {message}")]
    Assertion { step: String, message: String },

    #[error("execution error at '{step}': {source}")]
    Execution {
        step: String,
        #[source]
        source: ClusterError,
    },

    #[error("teardown step '{step}' failed: {reason}")]
    Teardown { step: String, reason: String },

    #[error("test body exceeded {0:?}")]
    TimedOut(Duration),
}

impl StepError {
    pub fn setup(step: &str, reason: impl Into<String>) -> Self {
        StepError::Setup {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    pub fn assertion(step: &str, message: impl Into<String>) -> Self {
        StepError::Assertion {
            step: step.to_string(),
            message: message.into(),
        }
    }

    pub fn teardown(step: &str, reason: impl Into<String>) -> Self {
        StepError::Teardown {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::Setup { .. } => FailureKind::Setup,
            StepError::Assertion { .. } => FailureKind::Assertion,
            StepError::Execution { .. } | StepError::TimedOut(_) => FailureKind::Execution,
            StepError::Teardown { .. } => FailureKind::Teardown,
        }
    }

    pub fn step(&self) -> &str {
        match self {
            StepError::Setup { step, .. }
            | StepError::Assertion { step, .. }
            | StepError::Execution { step, .. }
            | StepError::Teardown { step, .. } => step,
            StepError::TimedOut(_) => "body",
        }
    }
}

/// Fails `step` with an assertion failure unless `cond` holds.
pub fn ensure(cond: bool, step: &str, message: impl Into<String>) -> Result<(), StepError> {
    if cond {
        Ok(())
    } else {
        Err(StepError::assertion(step, message))
    }
}

/// Tags an infrastructure error with the step it interrupted.
pub trait AtStep<T> {
    fn at_step(self, step: &str) -> Result<T, StepError>;
}

impl<T, E: Into<ClusterError>> AtStep<T> for Result<T, E> {
    fn at_step(self, step: &str) -> Result<T, StepError> {
        self.map_err(|e| StepError::Execution {
            step: step.to_string(),
            source: e.into(),
        })
    }
}

/// Serializable record of one failure, as kept in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub step: String,
    pub message: String,
}

impl FailureRecord {
    /// Records `err` as a failure of `kind`, which may differ from the
    /// error's own classification (any error during setup is a setup failure).
    pub fn as_kind(err: &StepError, kind: FailureKind) -> Self {
        Self {
            kind,
            step: err.step().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&StepError> for FailureRecord {
    fn from(err: &StepError) -> Self {
        Self::as_kind(err, err.kind())
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
