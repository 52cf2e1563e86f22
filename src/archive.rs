use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::Artifact;
use crate::error::LocatorError;
use crate::retrieve::ArtifactLeases;
use crate::store::{self, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Single,
    Archive,
}

/// Files removed when dropped, whatever the exit path. Artifacts go through
/// their leases and survive while another delivery still holds them.
#[derive(Debug)]
struct Cleanup {
    files: Vec<PathBuf>,
    leased: Vec<PathBuf>,
    leases: ArtifactLeases,
}

impl Cleanup {
    fn new(leases: ArtifactLeases) -> Self {
        Self {
            files: Vec::new(),
            leased: Vec::new(),
            leases,
        }
    }

    fn push(&mut self, path: &Path) {
        if !self.files.iter().any(|known| known == path) {
            self.files.push(path.to_path_buf());
        }
    }

    // one entry per lease taken, repeats included
    fn track(&mut self, artifact: &Artifact) {
        self.leased.push(artifact.path.clone());
        self.push(&artifact.source_manifest_path);
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        for path in &self.files {
            store::remove_if_present(path);
        }
        for path in &self.leased {
            self.leases.release(path);
        }
    }
}

/// A readable deliverable. Dropping it deletes the delivered file and every
/// file it was built from.
#[derive(Debug)]
pub struct Delivery {
    // declared before `cleanup` so the handle is closed before deletion
    reader: File,
    kind: DeliveryKind,
    file_name: String,
    path: PathBuf,
    len: u64,
    cleanup: Cleanup,
}

impl Delivery {
    pub fn kind(&self) -> DeliveryKind {
        self.kind
    }

    /// Name suggested to the receiver.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> &'static str {
        match self.kind {
            DeliveryKind::Archive => "application/zip",
            DeliveryKind::Single => match Path::new(&self.file_name)
                .extension()
                .and_then(|ext| ext.to_str())
            {
                Some("png") => "image/png",
                _ => "image/jpeg",
            },
        }
    }

    /// Streams the whole deliverable into `writer`, then cleans up.
    pub fn copy_to<W: Write>(mut self, writer: &mut W) -> Result<u64, LocatorError> {
        io::copy(&mut self, writer).map_err(|err| LocatorError::Filesystem(err.to_string()))
    }
}

impl Read for Delivery {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

pub struct ArchiveBuilder {
    workspace: Workspace,
    leases: ArtifactLeases,
}

impl ArchiveBuilder {
    pub fn new(workspace: Workspace) -> Self {
        Self::with_leases(workspace, ArtifactLeases::default())
    }

    /// Shares the lease table of the orchestrator that produced the artifacts.
    pub fn with_leases(workspace: Workspace, leases: ArtifactLeases) -> Self {
        Self { workspace, leases }
    }

    pub fn deliver(&self, artifacts: &[Artifact]) -> Result<Delivery, LocatorError> {
        let mut cleanup = Cleanup::new(self.leases.clone());
        for artifact in artifacts {
            cleanup.track(artifact);
        }

        match artifacts {
            [] => Err(LocatorError::NoArtifactsProduced),
            [artifact] => {
                let reader = File::open(&artifact.path).map_err(|err| {
                    LocatorError::Filesystem(format!("open {}: {err}", artifact.path.display()))
                })?;
                let len = file_len(&reader)?;
                info!(artifact = %artifact.path.display(), bytes = len, "delivering single image");
                Ok(Delivery {
                    reader,
                    kind: DeliveryKind::Single,
                    file_name: artifact.file_name(),
                    path: artifact.path.clone(),
                    len,
                    cleanup,
                })
            }
            _ => {
                let (file, archive_path) = self.workspace.new_delivery_file(".zip")?;
                cleanup.push(&archive_path);
                let entries = write_archive(file, artifacts)?;
                let reader = File::open(&archive_path)
                    .map_err(|err| LocatorError::Filesystem(err.to_string()))?;
                let len = file_len(&reader)?;
                info!(entries, bytes = len, archive = %archive_path.display(), "delivering archive");
                Ok(Delivery {
                    reader,
                    kind: DeliveryKind::Archive,
                    file_name: format!("plans-{}.zip", Utc::now().format("%Y%m%dT%H%M%S")),
                    path: archive_path,
                    len,
                    cleanup,
                })
            }
        }
    }
}

/// Entries are stored by base name; a name seen twice is the same artifact.
fn write_archive(file: File, artifacts: &[Artifact]) -> Result<usize, LocatorError> {
    let mut writer = ZipWriter::new(file);
    let mut names = BTreeSet::new();
    for artifact in artifacts {
        let name = artifact.file_name();
        if !names.insert(name.clone()) {
            continue;
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(name.as_str(), options)
            .map_err(|err| LocatorError::Archive(err.to_string()))?;
        let mut source = File::open(&artifact.path).map_err(|err| {
            LocatorError::Filesystem(format!("open {}: {err}", artifact.path.display()))
        })?;
        io::copy(&mut source, &mut writer).map_err(|err| LocatorError::Archive(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| LocatorError::Archive(err.to_string()))?;
    Ok(names.len())
}

fn file_len(file: &File) -> Result<u64, LocatorError> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|err| LocatorError::Filesystem(err.to_string()))
}
