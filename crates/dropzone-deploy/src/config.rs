//! Engine configuration resolved from `dropzone_config::DeploySection`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dropzone_config::{DeploySection, UninstallFailurePolicy};
use url::Url;

use crate::error::{DeployError, DeployResult};

/// The install root as both a filesystem path and a location prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot {
    path: PathBuf,
    uri: String,
}

impl InstallRoot {
    /// Resolve a configured install root.
    ///
    /// Accepts a plain path or a `file:` URI. Existing paths are
    /// canonicalised; missing ones are made absolute so the watcher can
    /// report them.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidInstallRoot`] for non-file URIs and
    /// paths that cannot be expressed as a `file://` URI.
    pub fn resolve(raw: &str) -> DeployResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DeployError::InvalidInstallRoot("empty path".into()));
        }

        let path = if raw.starts_with("file:") {
            Url::parse(raw)
                .map_err(|e| DeployError::InvalidInstallRoot(format!("{raw}: {e}")))?
                .to_file_path()
                .map_err(|()| {
                    DeployError::InvalidInstallRoot(format!("{raw} is not a local file URI"))
                })?
        } else {
            PathBuf::from(raw)
        };

        Self::from_path(&path)
    }

    /// Resolve an install root from a filesystem path.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidInstallRoot`] if the path cannot be made
    /// absolute or expressed as a `file://` URI.
    pub fn from_path(path: &Path) -> DeployResult<Self> {
        let path = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => std::path::absolute(path).map_err(|e| {
                DeployError::InvalidInstallRoot(format!("{}: {e}", path.display()))
            })?,
        };

        let uri = Url::from_directory_path(&path)
            .map_err(|()| {
                DeployError::InvalidInstallRoot(format!(
                    "{} cannot be expressed as a file URI",
                    path.display()
                ))
            })?
            .to_string();

        Ok(Self { path, uri })
    }

    /// Filesystem path of the root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `file://` URI of the root, with a trailing slash.
    ///
    /// Modules whose location starts with this prefix belong to the root.
    #[must_use]
    pub fn location_prefix(&self) -> &str {
        &self.uri
    }
}

/// Settings the engine runs with.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Where artifacts live.
    pub install_root: InstallRoot,
    /// File suffix of deployable artifacts.
    pub artifact_suffix: String,
    /// Start level when the location has no two-digit directory.
    pub default_start_level: u32,
    /// Watch the install root after the initial cycle.
    pub hot_deploy: bool,
    /// Bound on the refresh wait.
    pub refresh_timeout: Duration,
    /// Quiet period before a cycle runs.
    pub debounce: Duration,
    /// Shutdown wait for an in-flight cycle.
    pub shutdown_grace: Duration,
    /// What an uninstall failure does to the cycle.
    pub uninstall_failure: UninstallFailurePolicy,
}

impl DeployConfig {
    /// Default settings for `install_root`.
    #[must_use]
    pub fn new(install_root: InstallRoot) -> Self {
        let defaults = DeploySection::default();
        Self {
            install_root,
            artifact_suffix: defaults.artifact_suffix.clone(),
            default_start_level: defaults.default_start_level,
            hot_deploy: defaults.hot_deploy,
            refresh_timeout: defaults.refresh_timeout(),
            debounce: defaults.debounce(),
            shutdown_grace: defaults.shutdown_grace(),
            uninstall_failure: defaults.uninstall_failure,
        }
    }

    /// Set the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the refresh wait timeout.
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the uninstall failure policy.
    #[must_use]
    pub fn with_uninstall_failure(mut self, policy: UninstallFailurePolicy) -> Self {
        self.uninstall_failure = policy;
        self
    }

    /// Enable or disable watching.
    #[must_use]
    pub fn with_hot_deploy(mut self, enabled: bool) -> Self {
        self.hot_deploy = enabled;
        self
    }
}

impl TryFrom<&DeploySection> for DeployConfig {
    type Error = DeployError;

    fn try_from(section: &DeploySection) -> DeployResult<Self> {
        Ok(Self {
            install_root: InstallRoot::resolve(&section.install_root)?,
            artifact_suffix: section.artifact_suffix.clone(),
            default_start_level: section.default_start_level,
            hot_deploy: section.hot_deploy,
            refresh_timeout: section.refresh_timeout(),
            debounce: section.debounce(),
            shutdown_grace: section.shutdown_grace(),
            uninstall_failure: section.uninstall_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_canonicalised() {
        let dir = tempfile::tempdir().unwrap();
        let root = InstallRoot::resolve(dir.path().to_str().unwrap()).unwrap();

        assert_eq!(root.path(), dir.path().canonicalize().unwrap());
        assert!(root.location_prefix().starts_with("file:///"));
        assert!(root.location_prefix().ends_with('/'));
    }

    #[test]
    fn test_file_uri_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::from_directory_path(dir.path()).unwrap().to_string();
        let from_uri = InstallRoot::resolve(&uri).unwrap();
        let from_path = InstallRoot::from_path(dir.path()).unwrap();
        assert_eq!(from_uri, from_path);
    }

    #[test]
    fn test_non_file_uri_rejected() {
        assert!(matches!(
            InstallRoot::resolve("file://remote-host/share/deploy"),
            Err(DeployError::InvalidInstallRoot(_))
        ));
        assert!(matches!(
            InstallRoot::resolve("   "),
            Err(DeployError::InvalidInstallRoot(_))
        ));
    }

    #[test]
    fn test_missing_path_made_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-yet");
        let root = InstallRoot::from_path(&missing).unwrap();
        assert!(root.path().is_absolute());
        assert!(root.location_prefix().ends_with("not-yet/"));
    }

    #[test]
    fn test_from_section() {
        let dir = tempfile::tempdir().unwrap();
        let section = DeploySection {
            install_root: dir.path().display().to_string(),
            debounce_ms: 250,
            uninstall_failure: UninstallFailurePolicy::Abort,
            ..DeploySection::default()
        };
        let config = DeployConfig::try_from(&section).unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.uninstall_failure, UninstallFailurePolicy::Abort);
        assert_eq!(config.artifact_suffix, ".pkg");
    }
}
