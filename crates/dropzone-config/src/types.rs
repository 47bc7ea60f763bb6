use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment engine settings.
    pub deploy: DeploySection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// DeploySection
// ---------------------------------------------------------------------------

/// What to do with the rest of a cycle when uninstalling an orphaned module
/// fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UninstallFailurePolicy {
    /// Log the failure, keep going with the remaining modules and the rest
    /// of the cycle.
    #[default]
    Isolate,
    /// Finish the orphan pass, then abort the cycle if any uninstall failed.
    Abort,
}

impl fmt::Display for UninstallFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Isolate => "isolate",
            Self::Abort => "abort",
        })
    }
}

/// Deployment engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Directory watched for artifacts. Either a plain path or a `file:` URI.
    pub install_root: String,
    /// File suffix that marks a deployable artifact, including the dot.
    pub artifact_suffix: String,
    /// Start level for artifacts without a two-digit directory segment.
    pub default_start_level: u32,
    /// Whether to watch the install root after the initial deployment.
    pub hot_deploy: bool,
    /// How long a cycle waits for the runtime to finish a refresh.
    pub refresh_timeout_secs: u64,
    /// Quiet period after the last filesystem event before a cycle runs.
    pub debounce_ms: u64,
    /// How long shutdown waits for an in-flight cycle.
    pub shutdown_grace_secs: u64,
    /// Handling of uninstall failures during the orphan pass.
    pub uninstall_failure: UninstallFailurePolicy,
    /// File stem marker the in-memory runtime uses to flag fragment
    /// modules (`db.fragment.pkg`).
    pub fragment_marker: String,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            install_root: "deploy".to_owned(),
            artifact_suffix: ".pkg".to_owned(),
            default_start_level: 1,
            hot_deploy: true,
            refresh_timeout_secs: 30,
            debounce_ms: 1000,
            shutdown_grace_secs: 10,
            uninstall_failure: UninstallFailurePolicy::default(),
            fragment_marker: ".fragment".to_owned(),
        }
    }
}

impl DeploySection {
    /// Refresh wait timeout as a [`Duration`].
    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Write rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
    /// Extra `EnvFilter` directives, e.g. `dropzone_deploy=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directory: None,
            directives: Vec::new(),
        }
    }
}
