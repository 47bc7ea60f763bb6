//! Deployment engine error types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::RuntimeError;

/// The runtime operation a [`DeployError::ModuleOperation`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleOperationKind {
    /// Installing a new artifact.
    Install,
    /// Re-reading a changed artifact into an existing module.
    Update,
    /// Removing a module whose artifact is gone.
    Uninstall,
    /// Assigning the start level of a fresh install.
    SetStartLevel,
    /// Starting a module.
    Start,
}

impl fmt::Display for ModuleOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
            Self::SetStartLevel => "set_start_level",
            Self::Start => "start",
        })
    }
}

/// Errors from the deployment engine.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A directory or file under the install root could not be read.
    #[error("scan error at {}: {source}", path.display())]
    Scan {
        /// The unreadable path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A runtime operation failed for a single module.
    #[error("{operation} failed for {location}: {message}")]
    ModuleOperation {
        /// Which operation failed.
        operation: ModuleOperationKind,
        /// Location of the affected module or artifact.
        location: String,
        /// Failure reason reported by the runtime.
        message: String,
    },

    /// The runtime did not confirm a refresh in time.
    #[error("refresh not confirmed within {timeout:?}")]
    RefreshTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Filesystem notifications could not be set up.
    #[error("cannot watch {}: {message}", path.display())]
    WatcherSetup {
        /// Directory that could not be watched.
        path: PathBuf,
        /// Failure reason.
        message: String,
    },

    /// The configured install root is neither a usable path nor a `file:` URI.
    #[error("invalid install root: {0}")]
    InvalidInstallRoot(String),

    /// The orphan pass hit uninstall failures and the cycle was aborted.
    #[error("cycle aborted after {failures} uninstall failure(s)")]
    UninstallAborted {
        /// Number of failed uninstalls.
        failures: usize,
    },

    /// A cycle outlived the shutdown grace period and was aborted.
    #[error("cycle still running after {grace:?}, aborted")]
    ShutdownTimeout {
        /// The grace period that elapsed.
        grace: Duration,
    },

    /// A runtime call needed for the whole cycle failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DeployError {
    /// Build a [`DeployError::ModuleOperation`] from a runtime failure.
    #[must_use]
    pub fn module_operation(
        operation: ModuleOperationKind,
        location: impl Into<String>,
        source: &RuntimeError,
    ) -> Self {
        Self::ModuleOperation {
            operation,
            location: location.into(),
            message: source.to_string(),
        }
    }

    /// The failed operation, if this is a per-module failure.
    #[must_use]
    pub fn operation(&self) -> Option<ModuleOperationKind> {
        match self {
            Self::ModuleOperation { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

/// Result type for deployment engine operations.
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_operation_display() {
        let err = DeployError::module_operation(
            ModuleOperationKind::Install,
            "file:///deploy/a.pkg",
            &RuntimeError::Rejected("bad manifest".into()),
        );
        assert_eq!(
            err.to_string(),
            "install failed for file:///deploy/a.pkg: operation rejected: bad manifest"
        );
        assert_eq!(err.operation(), Some(ModuleOperationKind::Install));
    }

    #[test]
    fn test_non_module_errors_have_no_operation() {
        let err = DeployError::RefreshTimeout {
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.operation(), None);
        assert_eq!(err.to_string(), "refresh not confirmed within 30s");
    }
}
