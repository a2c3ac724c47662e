//! Bulk loader for the initial registry population.
//!
//! ```text
//! DISCOVER → PARSE → UPSERT
//!    │         │        │
//!    ▼         ▼        ▼
//! [paths]  [documents] Registry
//! ```
//!
//! Discovery walks on the calling thread and feeds a bounded channel. Parsing
//! runs on a rayon pool of `indexing.parallel_threads` workers, each read
//! bounded by `indexing.read_timeout_ms`. Upserts run on one collector thread
//! and are serialized by the registry lock. A failure for one path never
//! affects another.
//!
//! Arrival order is arbitrary, so orphan and cycle warnings are computed once
//! over everything loaded after the last root is done.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::IndexingConfig;
use crate::documents::{Discovery, DiscoveryError, Document, DocumentError, DocumentParser};
use crate::registry::{Registry, RegistryWarning};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to build parse thread pool: {0}")]
    ThreadPool(String),

    #[error("{stage} thread panicked")]
    StagePanicked { stage: &'static str },
}

/// Outcome of a bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Paths produced by discovery.
    pub discovered: usize,
    /// Documents upserted into the registry.
    pub loaded: usize,
    /// Paths that could not be read or parsed, sorted by path.
    pub failures: Vec<(PathBuf, DocumentError)>,
    /// Orphan and cycle warnings for the loaded documents once the load
    /// completed, sorted by id.
    pub warnings: Vec<RegistryWarning>,
    /// Ids defined by more than one file; the later upsert won.
    pub duplicate_ids: Vec<(String, PathBuf)>,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.warnings.is_empty() && self.duplicate_ids.is_empty()
    }

    fn merge(&mut self, other: LoadReport) {
        self.discovered += other.discovered;
        self.loaded += other.loaded;
        self.failures.extend(other.failures);
        self.warnings.extend(other.warnings);
        self.duplicate_ids.extend(other.duplicate_ids);
    }
}

/// Populates a registry from one or more roots.
pub struct BulkLoader {
    discovery: Discovery,
    parser: Arc<DocumentParser>,
    config: IndexingConfig,
}

impl BulkLoader {
    pub fn new(discovery: Discovery, parser: DocumentParser, config: IndexingConfig) -> Self {
        Self {
            discovery,
            parser: Arc::new(parser),
            config,
        }
    }

    pub fn parser(&self) -> &DocumentParser {
        &self.parser
    }

    /// Load every root in order. An unreadable root aborts the load.
    pub fn load_all(&self, roots: &[PathBuf], registry: &Registry) -> Result<LoadReport, LoadError> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_threads.max(1))
            .thread_name(|i| format!("specdex-parse-{i}"))
            .build()
            .map_err(|e| LoadError::ThreadPool(e.to_string()))?;

        let mut report = LoadReport::default();
        let mut loaded_ids = BTreeSet::new();
        for root in roots {
            let (root_report, ids) = self.load_root(root, registry, &pool)?;
            report.merge(root_report);
            loaded_ids.extend(ids);
        }

        report.failures.sort_by(|a, b| a.0.cmp(&b.0));
        report.warnings = registry.diagnostics_for(loaded_ids.iter().map(String::as_str));
        for warning in &report.warnings {
            tracing::warn!(target: "loader", "{warning}");
        }
        report.elapsed = start.elapsed();

        crate::log_event!(
            "loader",
            "complete",
            "{} discovered, {} loaded, {} failed, {} warnings in {:?}",
            report.discovered,
            report.loaded,
            report.failures.len(),
            report.warnings.len(),
            report.elapsed
        );

        Ok(report)
    }

    /// Discover, parse and upsert every document under `root`.
    pub fn load(&self, root: &Path, registry: &Registry) -> Result<LoadReport, LoadError> {
        self.load_all(&[root.to_path_buf()], registry)
    }

    fn load_root(
        &self,
        root: &Path,
        registry: &Registry,
        pool: &rayon::ThreadPool,
    ) -> Result<(LoadReport, BTreeSet<String>), LoadError> {
        let paths = self.discovery.discover(root)?;

        let capacity = self.config.channel_capacity.max(1);
        let timeout = self.config.read_timeout();
        let (path_tx, path_rx) = bounded::<PathBuf>(capacity);
        let (parsed_tx, parsed_rx) = bounded::<(PathBuf, Result<Document, DocumentError>)>(capacity);

        let parser = Arc::clone(&self.parser);
        thread::scope(|scope| {
            // Stage 2: PARSE
            let parse_handle = scope.spawn(move || {
                pool.install(|| {
                    path_rx
                        .into_iter()
                        .par_bridge()
                        .for_each_with(parsed_tx, |tx, path| {
                            let result = parser.parse_file_within(&path, timeout);
                            let _ = tx.send((path, result));
                        });
                });
            });

            // Stage 3: UPSERT, serialized by the registry lock
            let upsert_handle = scope.spawn(move || collect(parsed_rx, registry));

            // Stage 1: DISCOVER, on this thread
            let mut discovered = 0;
            for path in paths {
                discovered += 1;
                if path_tx.send(path).is_err() {
                    break; // Parse stage gone
                }
            }
            drop(path_tx);

            parse_handle
                .join()
                .map_err(|_| LoadError::StagePanicked { stage: "PARSE" })?;
            let (mut report, ids) = upsert_handle
                .join()
                .map_err(|_| LoadError::StagePanicked { stage: "UPSERT" })?;
            report.discovered = discovered;

            crate::debug_event!(
                "loader",
                "root loaded",
                "{}: {} of {} documents",
                root.display(),
                report.loaded,
                discovered
            );
            Ok((report, ids))
        })
    }
}

/// Upsert parse results as they arrive and tally the outcome.
///
/// Returns the ids that were upserted. Warnings are left to the caller.
fn collect(
    parsed: Receiver<(PathBuf, Result<Document, DocumentError>)>,
    registry: &Registry,
) -> (LoadReport, BTreeSet<String>) {
    let mut report = LoadReport::default();
    let mut ids = BTreeSet::new();
    for (path, result) in parsed {
        match result {
            Ok(doc) => {
                let outcome = registry.upsert(doc);
                if let Some(previous) = &outcome.previous {
                    if previous.source_path() != Some(path.as_path()) {
                        tracing::warn!(
                            target: "loader",
                            "duplicate id {} in {}",
                            outcome.document.id(),
                            path.display()
                        );
                        report
                            .duplicate_ids
                            .push((outcome.document.id().to_string(), path.clone()));
                    }
                }
                ids.insert(outcome.document.id().to_string());
                report.loaded += 1;
            }
            Err(e) => {
                tracing::warn!(target: "loader", "{e}");
                report.failures.push((path, e));
            }
        }
    }
    (report, ids)
}
