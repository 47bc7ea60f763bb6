//! Artifact discovery under the install root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use url::Url;
use walkdir::WalkDir;

use crate::error::{DeployError, DeployResult};

/// A deployable file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// `file://` URI of the artifact. Used as the module location.
    pub location: String,
    /// Filesystem path of the artifact.
    pub path: PathBuf,
    /// Modification time of the file.
    pub last_modified: SystemTime,
}

/// Artifacts keyed by location.
pub type ArtifactSet = BTreeMap<String, Artifact>;

/// Recursively enumerates artifacts with a given suffix.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    root: PathBuf,
    suffix: String,
}

impl ArtifactScanner {
    /// Create a scanner for `root`, matching files that end in `suffix`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }

    /// The directory being scanned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree.
    ///
    /// Unreadable directories and files are logged and skipped; a scan never
    /// fails as a whole.
    #[must_use]
    pub fn scan(&self) -> ArtifactSet {
        let mut artifacts = ArtifactSet::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(self.root.as_path()).to_path_buf();
                    let err = DeployError::Scan {
                        path,
                        source: e.into(),
                    };
                    warn!(error = %err, "Skipping unreadable entry");
                    continue;
                },
            };

            if !entry.file_type().is_file() || !self.is_artifact(entry.file_name()) {
                continue;
            }

            let path = entry.path();
            let modified = entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| m.modified());
            let last_modified = match modified {
                Ok(t) => t,
                Err(e) => {
                    // Usually the file vanished between listing and stat.
                    let err = DeployError::Scan {
                        path: path.to_path_buf(),
                        source: e,
                    };
                    warn!(error = %err, "Skipping artifact without modification time");
                    continue;
                },
            };

            let Ok(url) = Url::from_file_path(path) else {
                warn!(path = %path.display(), "Cannot express artifact path as a file URI");
                continue;
            };

            let location = url.to_string();
            artifacts.insert(
                location.clone(),
                Artifact {
                    location,
                    path: path.to_path_buf(),
                    last_modified,
                },
            );
        }

        debug!(
            root = %self.root.display(),
            count = artifacts.len(),
            "Scanned install root"
        );
        artifacts
    }

    /// Scan on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Join`] if the scan task panicked.
    pub async fn scan_blocking(&self) -> DeployResult<ArtifactSet> {
        let scanner = self.clone();
        Ok(tokio::task::spawn_blocking(move || scanner.scan()).await?)
    }

    fn is_artifact(&self, name: &std::ffi::OsStr) -> bool {
        name.to_str().is_some_and(|n| {
            n.len() > self.suffix.len() && n.ends_with(self.suffix.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"module").unwrap();
    }

    #[test]
    fn test_scan_recurses_and_filters_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("a.pkg"));
        touch(&root.join("10/b.pkg"));
        touch(&root.join("10/deep/c.pkg"));
        touch(&root.join("notes.txt"));
        touch(&root.join(".pkg"));

        let artifacts = ArtifactScanner::new(&root, ".pkg").scan();

        assert_eq!(artifacts.len(), 3);
        for artifact in artifacts.values() {
            assert!(artifact.location.starts_with("file://"));
            assert!(artifact.location.ends_with(".pkg"));
            assert!(artifact.path.starts_with(&root));
        }
        let expected = Url::from_file_path(root.join("10/b.pkg")).unwrap().to_string();
        assert!(artifacts.contains_key(&expected));
    }

    #[test]
    fn test_missing_root_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactScanner::new(dir.path().join("absent"), ".pkg").scan();
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("z.pkg"));
        touch(&root.join("a.pkg"));

        let scanner = ArtifactScanner::new(&root, ".pkg");
        let first: Vec<_> = scanner.scan().into_keys().collect();
        let second: Vec<_> = scanner.scan().into_keys().collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scan_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        touch(&root.join("a.pkg"));

        let artifacts = ArtifactScanner::new(&root, ".pkg")
            .scan_blocking()
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);
    }
}
