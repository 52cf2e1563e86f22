use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::CatalogClient;
use crate::domain::{FilenameStem, ImageDescriptor, ProbeCandidate};

pub const DEFAULT_WORKERS: usize = 10;
pub const NO_MATCH_MESSAGE: &str = "no image found for the given parameters and range";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeMatch {
    pub id: u64,
    pub url: String,
    pub descriptor: ImageDescriptor,
    #[serde(skip)]
    pub raw_body: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeReport {
    pub matched: Option<ProbeMatch>,
    pub diagnostics: Vec<String>,
    pub probed: usize,
}

impl ProbeReport {
    pub fn found(&self) -> bool {
        self.matched.is_some()
    }
}

enum Outcome {
    Match(ProbeMatch),
    Miss(String),
}

/// Scans a numeric id range against the catalog with a fixed-size worker pool.
///
/// Workers pull offsets from a shared ascending cursor. Outcomes are keyed by
/// offset and inspected in ascending order once every worker has returned, so
/// the lowest matching id wins no matter which response arrived first. Once a
/// match is known, workers stop dispatching ids above it.
pub struct Prober<'a, C: CatalogClient> {
    catalog: &'a C,
    workers: usize,
}

impl<'a, C: CatalogClient> Prober<'a, C> {
    pub fn new(catalog: &'a C, workers: usize) -> Self {
        Self {
            catalog,
            workers: workers.max(1),
        }
    }

    pub fn probe(&self, source: &str, stem: &FilenameStem, start: u64, end: u64) -> ProbeReport {
        let total = end.saturating_sub(start);
        if total == 0 {
            return ProbeReport {
                matched: None,
                diagnostics: vec![NO_MATCH_MESSAGE.to_string()],
                probed: 0,
            };
        }

        // only offsets actually probed get an entry
        let outcomes: Mutex<BTreeMap<u64, Outcome>> = Mutex::new(BTreeMap::new());
        let cursor = AtomicU64::new(0);
        let lowest_match = AtomicU64::new(u64::MAX);
        let probed = AtomicUsize::new(0);
        let workers = usize::try_from(total).map_or(self.workers, |total| self.workers.min(total));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let offset = cursor.fetch_add(1, Ordering::SeqCst);
                        if offset >= total || offset > lowest_match.load(Ordering::SeqCst) {
                            break;
                        }
                        let outcome = self.probe_one(source, stem, start + offset);
                        probed.fetch_add(1, Ordering::Relaxed);
                        if matches!(outcome, Outcome::Match(_)) {
                            lowest_match.fetch_min(offset, Ordering::SeqCst);
                        }
                        if let Ok(mut outcomes) = outcomes.lock() {
                            outcomes.insert(offset, outcome);
                        }
                    }
                });
            }
        });

        let mut diagnostics = Vec::new();
        let mut matched = None;
        let outcomes = outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for outcome in outcomes.into_values() {
            match outcome {
                Outcome::Match(found) => {
                    matched = Some(found);
                    break;
                }
                Outcome::Miss(reason) => diagnostics.push(reason),
            }
        }

        match &matched {
            Some(found) => info!(
                stem = %stem,
                id = found.id,
                width = found.descriptor.width,
                height = found.descriptor.height,
                "image located"
            ),
            None => diagnostics.push(NO_MATCH_MESSAGE.to_string()),
        }

        ProbeReport {
            matched,
            diagnostics,
            probed: probed.into_inner(),
        }
    }

    fn probe_one(&self, source: &str, stem: &FilenameStem, id: u64) -> Outcome {
        let candidate = ProbeCandidate::new(id);
        let response = match self.catalog.probe(source, stem, &candidate) {
            Ok(response) => response,
            Err(err) => {
                debug!(id, error = %err, "probe transport failure");
                return Outcome::Miss(format!("id {id}: {err}"));
            }
        };
        debug!(id, status = response.status, "probe response");
        if !response.is_success() {
            return Outcome::Miss(format!("id {id}: status {} at {}", response.status, response.url));
        }
        match ImageDescriptor::parse(&response.body) {
            Ok(descriptor) => Outcome::Match(ProbeMatch {
                id,
                url: response.url,
                descriptor,
                raw_body: response.body,
            }),
            Err(err) => Outcome::Miss(format!("id {id}: {err} at {}", response.url)),
        }
    }
}
