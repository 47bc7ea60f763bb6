//! Artifact trees on disk.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use dropzone_deploy::{DeployConfig, InstallRoot};
use tempfile::TempDir;
use url::Url;

/// A temporary install root with helpers to add, rewrite, and remove
/// artifacts with controlled modification times.
#[derive(Debug)]
pub struct ArtifactTree {
    _dir: TempDir,
    root: PathBuf,
}

impl ArtifactTree {
    /// Create an empty tree.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir
            .path()
            .canonicalize()
            .expect("failed to canonicalize temp dir");
        Self { _dir: dir, root }
    }

    /// The install root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `relative`.
    #[must_use]
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Location URI the scanner assigns to `relative`.
    ///
    /// # Panics
    ///
    /// Panics if the path cannot be expressed as a file URI.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn location(&self, relative: &str) -> String {
        Url::from_file_path(self.path(relative))
            .expect("absolute path")
            .to_string()
    }

    /// Write an artifact, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics on I/O errors.
    #[allow(clippy::expect_used)]
    pub fn add(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create artifact directory");
        }
        fs::write(&path, relative.as_bytes()).expect("failed to write artifact");
        path
    }

    /// Create an empty directory.
    ///
    /// # Panics
    ///
    /// Panics on I/O errors.
    #[allow(clippy::expect_used)]
    pub fn add_dir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).expect("failed to create directory");
        path
    }

    /// Write an artifact with an explicit modification time.
    ///
    /// # Panics
    ///
    /// Panics on I/O errors.
    pub fn add_with_mtime(&self, relative: &str, mtime: SystemTime) -> PathBuf {
        let path = self.add(relative);
        self.set_mtime(relative, mtime);
        path
    }

    /// Rewrite an artifact so it looks `ahead` newer than now.
    ///
    /// Modules loaded by the in-memory runtime carry the load time, so a
    /// rewrite must be dated after the load to count as an update.
    pub fn rewrite_newer(&self, relative: &str, ahead: Duration) -> PathBuf {
        let path = self.add(relative);
        #[allow(clippy::arithmetic_side_effects)]
        let mtime = SystemTime::now() + ahead;
        self.set_mtime(relative, mtime);
        path
    }

    /// Set the modification time of an existing file.
    ///
    /// # Panics
    ///
    /// Panics on I/O errors.
    #[allow(clippy::expect_used)]
    pub fn set_mtime(&self, relative: &str, mtime: SystemTime) {
        File::options()
            .write(true)
            .open(self.path(relative))
            .and_then(|f| f.set_modified(mtime))
            .expect("failed to set modification time");
    }

    /// Remove an artifact.
    ///
    /// # Panics
    ///
    /// Panics on I/O errors.
    #[allow(clippy::expect_used)]
    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.path(relative)).expect("failed to remove artifact");
    }

    /// The tree as an install root.
    ///
    /// # Panics
    ///
    /// Panics if the root cannot be resolved.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn install_root(&self) -> InstallRoot {
        InstallRoot::from_path(&self.root).expect("temp dir is a valid install root")
    }

    /// Default engine settings for this tree.
    #[must_use]
    pub fn config(&self) -> DeployConfig {
        DeployConfig::new(self.install_root())
    }
}

impl Default for ArtifactTree {
    fn default() -> Self {
        Self::new()
    }
}
