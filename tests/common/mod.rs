#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;

use plan_locator::catalog::{CatalogClient, ProbeResponse, SearchQuery};
use plan_locator::domain::{FilenameStem, ImageRef, ProbeCandidate, SearchResultSet};
use plan_locator::error::LocatorError;
use plan_locator::rasterizer::Rasterizer;
use plan_locator::store::Workspace;
use plan_locator::tables::{AliasEntry, MappingTables};

pub const LEVEL2_DESCRIPTOR: &str = r#"{
    "@id": "https://stub/iiif/2/image",
    "width": 4000,
    "height": 3000,
    "profile": ["http://iiif.io/api/image/2/level2.json", {"formats": ["jpg", "png"]}]
}"#;

pub enum Reply {
    Ok(String),
    Status(u16),
    Transport,
}

/// Catalog whose probe replies are keyed by candidate id and whose descriptor
/// replies are keyed by image file name. Anything unlisted is a 404.
#[derive(Default)]
pub struct StubCatalog {
    pub probes: BTreeMap<u64, Reply>,
    pub descriptors: BTreeMap<String, Reply>,
    pub search_results: Option<SearchResultSet>,
    pub jitter: bool,
    pub probe_calls: AtomicUsize,
    pub seen: Mutex<Vec<(String, String, String)>>,
}

impl StubCatalog {
    pub fn with_hits(ids: &[u64], body: &str) -> Self {
        let mut catalog = Self::default();
        for id in ids {
            catalog.probes.insert(*id, Reply::Ok(body.to_string()));
        }
        catalog
    }

    fn answer(reply: Option<&Reply>, url: String) -> Result<ProbeResponse, LocatorError> {
        match reply {
            Some(Reply::Ok(body)) => Ok(ProbeResponse {
                status: 200,
                url,
                body: body.clone(),
            }),
            Some(Reply::Status(status)) => Ok(ProbeResponse {
                status: *status,
                url,
                body: String::new(),
            }),
            Some(Reply::Transport) => Err(LocatorError::TransportFailure(format!("{url}: reset"))),
            None => Ok(ProbeResponse {
                status: 404,
                url,
                body: "not found".to_string(),
            }),
        }
    }
}

impl CatalogClient for StubCatalog {
    fn probe(
        &self,
        source: &str,
        stem: &FilenameStem,
        candidate: &ProbeCandidate,
    ) -> Result<ProbeResponse, LocatorError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.jitter {
            // higher ids tend to answer first
            std::thread::sleep(Duration::from_millis(20u64.saturating_sub(candidate.id % 20)));
        }
        self.seen.lock().unwrap().push((
            source.to_string(),
            candidate.range_bucket.clone(),
            stem.to_string(),
        ));
        let url = format!("stub://{source}/{}/{}/{stem}", candidate.range_bucket, candidate.id);
        Self::answer(self.probes.get(&candidate.id), url)
    }

    fn fetch_descriptor(&self, image: &ImageRef) -> Result<ProbeResponse, LocatorError> {
        let url = format!("stub://{}", image.identifier());
        Self::answer(self.descriptors.get(&image.file_name), url)
    }

    fn search(&self, _query: &SearchQuery) -> Result<SearchResultSet, LocatorError> {
        self.search_results
            .clone()
            .ok_or_else(|| LocatorError::TransportFailure("no search stub".to_string()))
    }
}

/// Writes the manifest bytes as the "image" so tests can check what was staged.
#[derive(Default)]
pub struct CopyRasterizer {
    pub calls: AtomicUsize,
    pub fail_for: Vec<String>,
}

impl Rasterizer for CopyRasterizer {
    fn rasterize(&self, manifest: &Path, output: &Path) -> Result<(), LocatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let manifest_text = fs::read_to_string(manifest).unwrap();
        if self
            .fail_for
            .iter()
            .any(|marker| manifest_text.contains(marker.as_str()))
        {
            return Err(LocatorError::RasterizationFailed("tile download failed".to_string()));
        }
        fs::write(output, manifest_text).unwrap();
        Ok(())
    }
}

pub fn workspace(temp: &tempfile::TempDir) -> Workspace {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let workspace = Workspace::new_with_root(root);
    workspace.ensure_dirs().unwrap();
    workspace
}

pub fn tables() -> MappingTables {
    let mut aliases = BTreeMap::new();
    aliases.insert(
        "Sy".to_string(),
        AliasEntry {
            number: 3000,
            name: "Sydney".to_string(),
        },
    );
    aliases.insert(
        "Ay".to_string(),
        AliasEntry {
            number: 3005,
            name: "Abury".to_string(),
        },
    );
    let mut collections = BTreeMap::new();
    collections.insert("7".to_string(), "Crown Plans".to_string());
    MappingTables::new(aliases, collections)
}

pub fn dir_entries(path: impl AsRef<Path>) -> usize {
    fs::read_dir(path).map(|entries| entries.count()).unwrap_or(0)
}
