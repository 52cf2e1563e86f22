use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde_json::Value;
use tracing::warn;

use crate::error::LocatorError;

/// On-disk layout shared by every request of the process.
///
/// ```text
/// <root>/artifacts/   rasterized images, named after the remote file
/// <root>/staging/     manifests handed to the rasterizer
/// <root>/deliveries/  archives built for multi-image deliveries
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self, LocatorError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.cache_dir().join("plan-locator")).ok()
            })
            .ok_or_else(|| {
                LocatorError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> Utf8PathBuf {
        self.root.join("artifacts")
    }

    pub fn staging_dir(&self) -> Utf8PathBuf {
        self.root.join("staging")
    }

    pub fn deliveries_dir(&self) -> Utf8PathBuf {
        self.root.join("deliveries")
    }

    pub fn artifact_path(&self, name: &str) -> Utf8PathBuf {
        self.artifacts_dir().join(name)
    }

    pub fn ensure_dirs(&self) -> Result<(), LocatorError> {
        for dir in [
            self.artifacts_dir(),
            self.staging_dir(),
            self.deliveries_dir(),
        ] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| LocatorError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// Writes `manifest` under a fresh name in the staging dir and keeps it.
    pub fn stage_manifest(&self, manifest: &Value) -> Result<PathBuf, LocatorError> {
        let staging = self.staging_dir();
        fs::create_dir_all(staging.as_std_path())
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        let mut file = tempfile::Builder::new()
            .prefix("manifest-")
            .suffix(".json")
            .tempfile_in(staging.as_std_path())
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(manifest)
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        file.write_all(&content)
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        let (_, path) = file
            .keep()
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        Ok(path)
    }

    /// Creates an empty, uniquely named archive file in the deliveries dir.
    pub fn new_delivery_file(&self, suffix: &str) -> Result<(fs::File, PathBuf), LocatorError> {
        let dir = self.deliveries_dir();
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
        tempfile::Builder::new()
            .prefix("delivery-")
            .suffix(suffix)
            .tempfile_in(dir.as_std_path())
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?
            .keep()
            .map_err(|err| LocatorError::Filesystem(err.to_string()))
    }
}

/// Deletes `path`; an already missing file is fine, anything else is logged.
pub fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "cleanup failed"),
    }
}
