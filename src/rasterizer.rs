use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::LocatorError;

pub const DEFAULT_PROGRAM: &str = "dezoomify-rs";

pub trait Rasterizer: Send + Sync {
    /// Produces a raster image at `output` from the manifest at `manifest`.
    fn rasterize(&self, manifest: &Path, output: &Path) -> Result<(), LocatorError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub program: String,
    pub resolved: Option<String>,
}

/// Runs `dezoomify-rs -l <manifest> <output>` and waits at most `timeout`.
#[derive(Debug, Clone)]
pub struct DezoomifyRasterizer {
    program: PathBuf,
    timeout: Duration,
}

impl DezoomifyRasterizer {
    pub fn new(program: &str, timeout: Duration) -> Self {
        let program = if Path::new(program).components().count() > 1 {
            PathBuf::from(program)
        } else {
            find_in_path(program).unwrap_or_else(|| PathBuf::from(program))
        };
        Self { program, timeout }
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            program: self.program.display().to_string(),
            resolved: self
                .program
                .exists()
                .then(|| self.program.display().to_string()),
        }
    }

    fn run_cmd(&self, args: &[String]) -> Result<(), LocatorError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    LocatorError::MissingTool(self.program.display().to_string())
                }
                _ => LocatorError::RasterizationFailed(err.to_string()),
            })?;

        // Drain stderr on its own thread so a chatty child cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(LocatorError::RasterizationFailed(format!(
                        "{} timed out after {}s",
                        self.program.display(),
                        self.timeout.as_secs()
                    )));
                }
                Ok(None) => thread::sleep(Duration::from_millis(100)),
                Err(err) => return Err(LocatorError::RasterizationFailed(err.to_string())),
            }
        };

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        debug!(program = %self.program.display(), code = ?status.code(), "rasterizer exited");
        if status.success() {
            return Ok(());
        }
        let stderr = stderr.trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({status})", self.program.display())
        } else {
            stderr
        };
        Err(LocatorError::RasterizationFailed(message))
    }
}

impl Rasterizer for DezoomifyRasterizer {
    fn rasterize(&self, manifest: &Path, output: &Path) -> Result<(), LocatorError> {
        let args = vec![
            "-l".to_string(),
            manifest.to_string_lossy().to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run_cmd(&args)?;
        if !output.exists() {
            return Err(LocatorError::RasterizationFailed(format!(
                "{} exited successfully but produced no file at {}",
                self.program.display(),
                output.display()
            )));
        }
        Ok(())
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
