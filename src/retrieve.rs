use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info};

use crate::domain::Artifact;
use crate::error::LocatorError;
use crate::rasterizer::Rasterizer;
use crate::store::{self, Workspace};

/// Counts the pending deliveries holding each artifact file. The file is
/// deleted when its last holder releases it, so a reused artifact outlives
/// the delivery that first produced it.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLeases {
    held: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl ArtifactLeases {
    pub fn acquire(&self, path: &Path) {
        *self.lock().entry(path.to_path_buf()).or_insert(0) += 1;
    }

    /// Gives up one hold on `path`. A path nobody acquired counts as held once.
    pub fn release(&self, path: &Path) {
        let mut held = self.lock();
        if let Some(count) = held.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count > 0 {
                return;
            }
        }
        held.remove(path);
        // deleted under the lock so no acquire can slip in between
        store::remove_if_present(path);
    }

    pub fn holders(&self, path: &Path) -> usize {
        self.lock().get(path).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turns manifests into artifacts in the workspace.
///
/// An artifact is identified by its file name only. If it already exists the
/// rasterizer is not invoked again, and concurrent calls for the same name are
/// serialized so at most one of them runs the rasterizer. Every returned
/// artifact carries one lease in `leases()` until its delivery releases it.
pub struct Orchestrator<R: Rasterizer> {
    workspace: Workspace,
    rasterizer: R,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    leases: ArtifactLeases,
}

impl<R: Rasterizer> Orchestrator<R> {
    pub fn new(workspace: Workspace, rasterizer: R) -> Self {
        Self {
            workspace,
            rasterizer,
            locks: Mutex::new(HashMap::new()),
            leases: ArtifactLeases::default(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }

    pub fn leases(&self) -> &ArtifactLeases {
        &self.leases
    }

    pub fn materialize(&self, manifest: &Value, desired_name: &str) -> Result<Artifact, LocatorError> {
        let manifest_path = self.workspace.stage_manifest(manifest)?;
        let artifact_path = self.workspace.artifact_path(desired_name);

        let lock = self.lock_for(desired_name)?;
        let result = match lock.lock() {
            Ok(_guard) => {
                // leased before the existence check so a concurrent release
                // cannot delete the file this call is about to reuse
                self.leases.acquire(artifact_path.as_std_path());
                let produced = if artifact_path.as_std_path().exists() {
                    debug!(artifact = %artifact_path, "reusing existing artifact");
                    Ok(())
                } else {
                    self.rasterize_into(&manifest_path, desired_name)
                };
                if produced.is_err() {
                    self.leases.release(artifact_path.as_std_path());
                }
                produced
            }
            Err(_) => Err(LocatorError::Filesystem(format!(
                "lock for {desired_name} poisoned"
            ))),
        };
        self.release(desired_name, lock);

        if let Err(err) = result {
            // the staged manifest is only handed to the delivery on success
            store::remove_if_present(&manifest_path);
            return Err(err);
        }
        Ok(Artifact {
            path: artifact_path.into_std_path_buf(),
            source_manifest_path: manifest_path,
        })
    }

    /// Rasterizes into the staging dir first, then moves the finished file into
    /// place so a failed run never leaves a partial artifact behind.
    fn rasterize_into(&self, manifest_path: &std::path::Path, desired_name: &str) -> Result<(), LocatorError> {
        let staging = self.workspace.staging_dir();
        let temp_output = staging
            .join(format!("{}-{desired_name}", uuid::Uuid::new_v4().simple()))
            .into_std_path_buf();
        let artifact_path = self.workspace.artifact_path(desired_name);
        fs::create_dir_all(self.workspace.artifacts_dir().as_std_path())
            .map_err(|err| LocatorError::Filesystem(err.to_string()))?;

        let started = std::time::Instant::now();
        if let Err(err) = self.rasterizer.rasterize(manifest_path, &temp_output) {
            let _ = fs::remove_file(&temp_output);
            return Err(err);
        }
        fs::rename(&temp_output, artifact_path.as_std_path())
            .map_err(|err| LocatorError::Filesystem(format!("move {artifact_path}: {err}")))?;
        info!(
            artifact = %artifact_path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "artifact rasterized"
        );
        Ok(())
    }

    fn lock_for(&self, name: &str) -> Result<Arc<Mutex<()>>, LocatorError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LocatorError::Filesystem("artifact lock table poisoned".to_string()))?;
        Ok(locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn release(&self, name: &str, lock: Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // the table and `lock` are the last two holders
            if Arc::strong_count(&lock) == 2 {
                locks.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn rasterize(&self, _manifest: &Path, output: &Path) -> Result<(), LocatorError> {
            fs::write(output, b"partial").unwrap();
            Err(LocatorError::RasterizationFailed("tile 3 failed".to_string()))
        }
    }

    struct SlowRasterizer {
        calls: AtomicUsize,
    }

    impl Rasterizer for SlowRasterizer {
        fn rasterize(&self, _manifest: &Path, output: &Path) -> Result<(), LocatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            fs::write(output, b"jpeg").unwrap();
            Ok(())
        }
    }

    fn workspace(temp: &tempfile::TempDir) -> Workspace {
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let workspace = Workspace::new_with_root(root);
        workspace.ensure_dirs().unwrap();
        workspace
    }

    #[test]
    fn failure_leaves_no_artifact_or_manifest() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(workspace(&temp), FailingRasterizer);
        let err = orchestrator
            .materialize(&serde_json::json!({}), "a.jpg")
            .unwrap_err();
        assert_matches!(err, LocatorError::RasterizationFailed(message) if message == "tile 3 failed");
        assert!(!orchestrator.workspace().artifact_path("a.jpg").exists());
        let staged = fs::read_dir(orchestrator.workspace().staging_dir()).unwrap().count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn concurrent_requests_rasterize_once() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            workspace(&temp),
            SlowRasterizer {
                calls: AtomicUsize::new(0),
            },
        );
        let manifest = serde_json::json!({"width": 1});
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| orchestrator.materialize(&manifest, "same.jpg").unwrap());
            }
        });
        assert_eq!(orchestrator.rasterizer.calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.locks.lock().unwrap().is_empty());
        let path = orchestrator.workspace().artifact_path("same.jpg");
        assert_eq!(orchestrator.leases().holders(path.as_std_path()), 8);
    }

    #[test]
    fn last_release_deletes_the_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("shared.jpg");
        fs::write(&path, b"jpeg").unwrap();
        let leases = ArtifactLeases::default();
        leases.acquire(&path);
        leases.acquire(&path);

        leases.release(&path);
        assert!(path.exists());
        assert_eq!(leases.holders(&path), 1);
        leases.release(&path);
        assert!(!path.exists());
        assert_eq!(leases.holders(&path), 0);
    }

    #[test]
    fn failed_run_holds_no_lease() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(workspace(&temp), FailingRasterizer);
        let _ = orchestrator.materialize(&serde_json::json!({}), "a.jpg");
        let path = orchestrator.workspace().artifact_path("a.jpg");
        assert_eq!(orchestrator.leases().holders(path.as_std_path()), 0);
    }
}
