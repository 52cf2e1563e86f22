use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::archive::{ArchiveBuilder, Delivery};
use crate::cache::ResultCache;
use crate::catalog::{self, CatalogClient, SearchQuery};
use crate::domain::{
    Artifact, CacheToken, Identity, ImageDescriptor, ImageRef, RasterFormat, artifact_name,
};
use crate::error::LocatorError;
use crate::identity;
use crate::manifest;
use crate::probe::Prober;
use crate::rasterizer::Rasterizer;
use crate::retrieve::Orchestrator;
use crate::store::Workspace;
use crate::tables::MappingTables;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

/// Widest id range a single locate request may scan.
pub const DEFAULT_MAX_SPAN: u64 = 5_000;

/// Half-open id range `[start, end)`, ids starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRange {
    pub start: u64,
    pub end: u64,
}

impl ScanRange {
    pub fn new(start: u64, end: u64) -> Result<Self, LocatorError> {
        Self::bounded(start, end, DEFAULT_MAX_SPAN)
    }

    /// Like `new`, but rejects ranges covering more than `max_span` ids.
    pub fn bounded(start: u64, end: u64, max_span: u64) -> Result<Self, LocatorError> {
        if start == 0 {
            return Err(LocatorError::InvalidRange("ids start at 1".to_string()));
        }
        if start >= end {
            return Err(LocatorError::InvalidRange(format!(
                "start {start} must be below end {end}"
            )));
        }
        if end - start > max_span {
            return Err(LocatorError::InvalidRange(format!(
                "[{start}, {end}) spans {} ids, at most {max_span} allowed",
                end - start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, LocatorError> {
        Self::parse_bounded(start, end, DEFAULT_MAX_SPAN)
    }

    pub fn parse_bounded(start: &str, end: &str, max_span: u64) -> Result<Self, LocatorError> {
        Self::bounded(
            parse_bound("start", start)?,
            parse_bound("end", end)?,
            max_span,
        )
    }

    pub fn span(&self) -> u64 {
        self.end - self.start
    }
}

fn parse_bound(label: &str, value: &str) -> Result<u64, LocatorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LocatorError::InvalidRange(format!("{label} is empty")));
    }
    trimmed
        .parse()
        .map_err(|_| LocatorError::InvalidRange(format!("{label} is not a number: {trimmed}")))
}

#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub identity: Identity,
    pub range: ScanRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateResult {
    pub stem: String,
    pub match_id: u64,
    pub url: String,
    pub preview_url: String,
    pub width: u64,
    pub height: u64,
    pub megapixels: f64,
    pub artifact: String,
    pub probed: usize,
    pub diagnostics: Vec<String>,
}

impl LocateResult {
    /// Human readable status lines.
    pub fn status_text(&self) -> String {
        format!(
            "Found image at {}\nImage is {}x{} = {:.1}MP\nSaved as {}",
            self.url, self.width, self.height, self.megapixels, self.artifact
        )
    }
}

pub struct LocateOutcome {
    pub result: LocateResult,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRow {
    pub id: String,
    pub title: Option<String>,
    pub collection: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub token: CacheToken,
    pub documents: Vec<SearchRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFailure {
    pub document_id: String,
    pub file_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub delivered: Vec<String>,
    pub failures: Vec<ImageFailure>,
    pub diagnostics: Vec<String>,
}

pub struct BulkOutcome {
    pub result: BulkResult,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    pub workers: usize,
    pub format: RasterFormat,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            workers: crate::probe::DEFAULT_WORKERS,
            format: RasterFormat::Jpg,
        }
    }
}

pub struct App<C: CatalogClient, R: Rasterizer> {
    catalog: C,
    orchestrator: Orchestrator<R>,
    archive: ArchiveBuilder,
    cache: Arc<ResultCache>,
    tables: MappingTables,
    options: AppOptions,
}

impl<C: CatalogClient, R: Rasterizer> App<C, R> {
    pub fn new(
        workspace: Workspace,
        catalog: C,
        rasterizer: R,
        tables: MappingTables,
        cache: Arc<ResultCache>,
        options: AppOptions,
    ) -> Self {
        let orchestrator = Orchestrator::new(workspace.clone(), rasterizer);
        let archive = ArchiveBuilder::with_leases(workspace, orchestrator.leases().clone());
        Self {
            catalog,
            orchestrator,
            archive,
            cache,
            tables,
            options,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn locate(
        &self,
        request: &LocateRequest,
        sink: &dyn ProgressSink,
    ) -> Result<LocateOutcome, LocatorError> {
        let resolved = identity::resolve(&request.identity, &self.tables)?;
        let ScanRange { start, end } = request.range;
        emit(
            sink,
            format!("phase=Resolve; stem {} range [{start}, {end})", resolved.stem),
        );

        let started = Instant::now();
        let report = Prober::new(&self.catalog, self.options.workers).probe(
            &resolved.source,
            &resolved.stem,
            start,
            end,
        );
        sink.event(ProgressEvent {
            message: format!("phase=Probe; {} candidates probed", report.probed),
            elapsed: Some(started.elapsed()),
        });

        let mut diagnostics = report.diagnostics;
        let Some(found) = report.matched else {
            let misses = diagnostics.len().saturating_sub(1);
            return Err(LocatorError::NoMatchInRange {
                stem: resolved.stem.to_string(),
                start,
                end,
                message: format!("{} ({misses} candidates missed)", crate::probe::NO_MATCH_MESSAGE),
            });
        };
        emit(sink, format!("phase=Match; id {} at {}", found.id, found.url));

        let name = artifact_name(&format!("{}.jp2", resolved.stem), self.options.format);
        let artifact = self.materialize_body(&found.raw_body, &name, &mut diagnostics, sink)?;
        let delivery = self.archive.deliver(std::slice::from_ref(&artifact))?;

        Ok(LocateOutcome {
            result: LocateResult {
                stem: resolved.stem.to_string(),
                match_id: found.id,
                preview_url: catalog::preview_url(&found.url),
                url: found.url,
                width: found.descriptor.width,
                height: found.descriptor.height,
                megapixels: found.descriptor.megapixels(),
                artifact: artifact.file_name(),
                probed: report.probed,
                diagnostics,
            },
            delivery,
        })
    }

    pub fn search(
        &self,
        query: &SearchQuery,
        session: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, LocatorError> {
        emit(sink, format!("phase=Search; {:?}", query.text));
        let results = match session {
            // session id doubles as the shard preference
            Some(session) => {
                let mut query = query.clone();
                query.preference = session.to_string();
                self.catalog.search(&query)?
            }
            None => self.catalog.search(query)?,
        };
        let documents = results
            .documents
            .iter()
            .map(|doc| SearchRow {
                id: doc.id.clone(),
                title: doc.title.clone(),
                collection: doc
                    .collection_id
                    .as_deref()
                    .map(|id| self.tables.collection_label(id))
                    .unwrap_or("unknown")
                    .to_string(),
                images: doc.images.iter().map(|image| image.file_name.clone()).collect(),
            })
            .collect();
        let token = match session {
            Some(session) => self.cache.put_for_session(session, results),
            None => self.cache.put(results),
        };
        emit(sink, format!("phase=Cache; token {token}"));
        Ok(SearchResult { token, documents })
    }

    /// Bulk download of previously searched documents. An empty selection
    /// takes every cached document. Per-image failures are reported, not fatal.
    pub fn fetch_selection(
        &self,
        token: &CacheToken,
        selected: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<BulkOutcome, LocatorError> {
        let results = self.cache.get(token)?;
        let selected: Vec<String> = if selected.is_empty() {
            results.documents.iter().map(|doc| doc.id.clone()).collect()
        } else {
            selected.to_vec()
        };

        let mut artifacts: Vec<Artifact> = Vec::new();
        let mut failures = Vec::new();
        let mut diagnostics = Vec::new();
        for id in &selected {
            let Some(document) = results.find(id) else {
                failures.push(ImageFailure {
                    document_id: id.clone(),
                    file_name: None,
                    reason: LocatorError::UnknownDocument(id.clone()).to_string(),
                });
                continue;
            };
            for image in &document.images {
                emit(sink, format!("phase=Retrieve; {} {}", document.id, image.file_name));
                match self.retrieve_image(image, &mut diagnostics, sink) {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(err) => {
                        warn!(document = %document.id, file = %image.file_name, error = %err, "image failed");
                        failures.push(ImageFailure {
                            document_id: document.id.clone(),
                            file_name: Some(image.file_name.clone()),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        for failure in &failures {
            emit(
                sink,
                format!("phase=Failed; {} {}", failure.document_id, failure.reason),
            );
        }
        let delivered = artifacts.iter().map(Artifact::file_name).collect();
        let delivery = self.archive.deliver(&artifacts)?;
        Ok(BulkOutcome {
            result: BulkResult {
                delivered,
                failures,
                diagnostics,
            },
            delivery,
        })
    }

    fn retrieve_image(
        &self,
        image: &ImageRef,
        diagnostics: &mut Vec<String>,
        sink: &dyn ProgressSink,
    ) -> Result<Artifact, LocatorError> {
        let response = self.catalog.fetch_descriptor(image)?;
        if !response.is_success() {
            return Err(LocatorError::CatalogStatus {
                status: response.status,
                message: response.url,
            });
        }
        ImageDescriptor::parse(&response.body)?;
        let name = artifact_name(&image.file_name, self.options.format);
        self.materialize_body(&response.body, &name, diagnostics, sink)
    }

    fn materialize_body(
        &self,
        body: &str,
        name: &str,
        diagnostics: &mut Vec<String>,
        sink: &dyn ProgressSink,
    ) -> Result<Artifact, LocatorError> {
        let descriptor: Value = serde_json::from_str(body)
            .map_err(|err| LocatorError::MalformedDescriptor(err.to_string()))?;
        let transformed = manifest::force_encoding(&descriptor, self.options.format);
        if !transformed.applied {
            warn!(artifact = name, "descriptor profile not rewritten; passing through");
            diagnostics.push(format!(
                "{name}: descriptor profile has an unexpected shape, encoding not forced"
            ));
        }
        let started = Instant::now();
        let artifact = self.orchestrator.materialize(&transformed.manifest, name)?;
        sink.event(ProgressEvent {
            message: format!("phase=Rasterize; {name}"),
            elapsed: Some(started.elapsed()),
        });
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn range_parsing() {
        assert_eq!(ScanRange::parse("1", " 5 ").unwrap(), ScanRange { start: 1, end: 5 });
        assert_matches!(ScanRange::parse("", "5"), Err(LocatorError::InvalidRange(_)));
        assert_matches!(ScanRange::parse("a", "5"), Err(LocatorError::InvalidRange(_)));
        assert_matches!(ScanRange::parse("5", "5"), Err(LocatorError::InvalidRange(_)));
        assert_matches!(ScanRange::parse("0", "5"), Err(LocatorError::InvalidRange(_)));
    }

    #[test]
    fn range_span_is_capped() {
        assert_eq!(ScanRange::new(1, 5_001).unwrap().span(), 5_000);
        assert_matches!(ScanRange::new(1, 5_002), Err(LocatorError::InvalidRange(_)));
        assert_matches!(
            ScanRange::parse("1", "18446744073709551615"),
            Err(LocatorError::InvalidRange(message)) if message.contains("at most 5000")
        );
        assert_matches!(ScanRange::bounded(1, 12, 10), Err(LocatorError::InvalidRange(_)));
        assert!(ScanRange::bounded(1, 11, 10).is_ok());
    }
}
