//! The run coordinator: drives the per-source, per-file pipeline.
//!
//! For every configured source and every file kind in policy, the
//! coordinator lists the advertised files, applies the kind policy and the
//! per-source file cap, and processes the selected files through
//! resolve → fetch → decode → normalize → merge on a bounded worker pool
//! (`buffer_unordered`, per-source limit). Any component failure is
//! classified into a [`RunReport`] entry and processing continues; one bad
//! feed never aborts the run.
//!
//! Decoding and normalization are pure and run on the worker that fetched
//! the bytes. The shared catalog is the only state touched by more than one
//! worker, behind the merger's synchronized insert.
//!
//! Cancellation is run-scoped: once the token fires, files not yet started
//! are recorded as skipped and in-flight files run to completion.

use crate::catalog::{Catalog, SharedCatalog};
use crate::decode::decode;
use crate::directory::{list_files, resolve_download};
use crate::error::PipelineError;
use crate::fetch::{Fetch, RetryFetch};
use crate::models::{FileDescriptor, FileKind};
use crate::normalize::normalize;
use crate::sources::FeedSource;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Run-scoped policy knobs. These are policy, not correctness: they bound
/// cost, they do not change merge semantics.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// File kinds to ingest, in order.
    pub kinds: Vec<FileKind>,
    /// Overrides every source's own file cap when set.
    pub max_files: Option<usize>,
    /// Overrides every source's own concurrency bound when set.
    pub concurrency: Option<usize>,
    /// Retries per network call, applied by the coordinator's fetch wrapper.
    pub retries: usize,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            kinds: vec![FileKind::PriceFull, FileKind::Stores],
            max_files: None,
            concurrency: None,
            retries: 2,
        }
    }
}

/// Outcome of one file (or of a source's listing call, recorded under a
/// synthetic file name).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileOutcome {
    pub chain: String,
    pub kind: FileKind,
    pub file: String,
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success {
        products: usize,
        stores: usize,
        skipped_entries: usize,
        bad_prices: usize,
    },
    Failed {
        class: String,
        reason: String,
    },
    Skipped,
}

/// Per-source subtotals in the finalized report.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct SourceTotals {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub products: usize,
    pub stores: usize,
}

/// The finalized run report: always producible, even if every file failed.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub files: Vec<FileOutcome>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub products_merged: usize,
    pub stores_merged: usize,
    pub per_source: BTreeMap<String, SourceTotals>,
}

impl RunReport {
    /// Fold per-file outcomes into totals and sort entries by chain and file
    /// name; completion order is not meaningful.
    fn finalize(mut outcomes: Vec<FileOutcome>) -> Self {
        outcomes.sort_by(|a, b| (&a.chain, &a.file).cmp(&(&b.chain, &b.file)));

        let mut report = RunReport::default();
        for outcome in &outcomes {
            let totals = report.per_source.entry(outcome.chain.clone()).or_default();
            match &outcome.status {
                OutcomeStatus::Success {
                    products, stores, ..
                } => {
                    report.attempted += 1;
                    report.succeeded += 1;
                    report.products_merged += products;
                    report.stores_merged += stores;
                    totals.attempted += 1;
                    totals.succeeded += 1;
                    totals.products += products;
                    totals.stores += stores;
                }
                OutcomeStatus::Failed { .. } => {
                    report.attempted += 1;
                    report.failed += 1;
                    totals.attempted += 1;
                    totals.failed += 1;
                }
                OutcomeStatus::Skipped => {
                    report.skipped += 1;
                    totals.skipped += 1;
                }
            }
        }
        report.files = outcomes;
        report
    }
}

/// A finished run: the merged catalog plus its report.
#[derive(Debug)]
pub struct RunOutcome {
    pub catalog: Catalog,
    pub report: RunReport,
}

/// Drive the full pipeline across all sources.
///
/// Sources run concurrently with each other; within a source, file downloads
/// are bounded by the source's concurrency limit.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn run<F: Fetch>(
    fetcher: F,
    sources: &[FeedSource],
    policy: &RunPolicy,
    cancel: CancellationToken,
) -> RunOutcome {
    // Retry policy lives here, not in the transport.
    let fetcher = RetryFetch::new(fetcher, policy.retries, Duration::from_secs(1));
    let catalog = SharedCatalog::new();

    let per_source = sources.iter().map(|source| {
        process_source(&fetcher, source, policy, &catalog, cancel.clone())
    });
    let outcomes: Vec<FileOutcome> = futures::future::join_all(per_source)
        .await
        .into_iter()
        .flatten()
        .collect();

    let report = RunReport::finalize(outcomes);
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        products = report.products_merged,
        stores = report.stores_merged,
        "Run complete"
    );
    RunOutcome {
        catalog: catalog.into_catalog(),
        report,
    }
}

#[instrument(level = "info", skip_all, fields(chain = %source.chain))]
async fn process_source<F: Fetch>(
    fetcher: &F,
    source: &FeedSource,
    policy: &RunPolicy,
    catalog: &SharedCatalog,
    cancel: CancellationToken,
) -> Vec<FileOutcome> {
    let mut outcomes = Vec::new();

    for &kind in &policy.kinds {
        if cancel.is_cancelled() {
            warn!(%kind, "cancelled before listing; skipping remaining kinds");
            break;
        }

        let files = match list_files(fetcher, source, kind).await {
            Ok(files) => files,
            Err(e) => {
                warn!(%kind, error = %e, "listing failed");
                outcomes.push(FileOutcome {
                    chain: source.chain.clone(),
                    kind,
                    file: format!("<{kind} listing>"),
                    status: OutcomeStatus::Failed {
                        class: e.class().to_string(),
                        reason: e.to_string(),
                    },
                });
                continue;
            }
        };

        let selected = select_files(files, kind, source, policy);
        info!(%kind, count = selected.len(), "Processing files");

        let concurrency = policy.concurrency.unwrap_or(source.concurrency).max(1);
        let kind_outcomes: Vec<FileOutcome> = stream::iter(selected)
            .map(|file| process_file(fetcher, source, file, catalog, cancel.clone()))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.extend(kind_outcomes);
    }

    outcomes
}

/// Apply kind policy and the file cap: every matching PriceFull file up to
/// the cap, first Stores file only (a chain has one store directory; the
/// rest are republications).
fn select_files(
    mut files: Vec<FileDescriptor>,
    kind: FileKind,
    source: &FeedSource,
    policy: &RunPolicy,
) -> Vec<FileDescriptor> {
    let cap = match kind {
        FileKind::PriceFull => policy.max_files.unwrap_or(source.max_files),
        FileKind::Stores => 1,
    };
    files.truncate(cap);
    files
}

async fn process_file<F: Fetch>(
    fetcher: &F,
    source: &FeedSource,
    file: FileDescriptor,
    catalog: &SharedCatalog,
    cancel: CancellationToken,
) -> FileOutcome {
    if cancel.is_cancelled() {
        return FileOutcome {
            chain: file.chain,
            kind: file.kind,
            file: file.name,
            status: OutcomeStatus::Skipped,
        };
    }

    let status = match ingest_file(fetcher, source, &file, catalog).await {
        Ok(status) => status,
        Err(e) => {
            warn!(file = %file.name, error = %e, class = e.class(), "file failed");
            OutcomeStatus::Failed {
                class: e.class().to_string(),
                reason: e.to_string(),
            }
        }
    };

    FileOutcome {
        chain: file.chain,
        kind: file.kind,
        file: file.name,
        status,
    }
}

/// One file's pipeline: resolve, fetch (first location that answers),
/// decode, normalize, merge.
async fn ingest_file<F: Fetch>(
    fetcher: &F,
    source: &FeedSource,
    file: &FileDescriptor,
    catalog: &SharedCatalog,
) -> Result<OutcomeStatus, PipelineError> {
    let locations = resolve_download(fetcher, source, file).await?;

    let mut payload = None;
    let mut last_err = None;
    for url in &locations {
        match fetcher.get_bytes(url).await {
            Ok(p) => {
                payload = Some(p);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let payload = match payload {
        Some(p) => p,
        None => {
            return Err(last_err.unwrap_or_else(|| PipelineError::DownloadResolutionFailed {
                file: file.name.clone(),
                reason: "no download locations".to_string(),
            }));
        }
    };

    let document = decode(&payload)?;
    let batch = normalize(&document, source, file.kind)?;
    let counts = catalog.merge(batch.records, &file.name);

    info!(
        file = %file.name,
        products = counts.products,
        stores = counts.stores,
        skipped = batch.skipped,
        bad_prices = batch.bad_prices,
        "Ingested file"
    );
    Ok(OutcomeStatus::Success {
        products: counts.products,
        stores: counts.stores,
        skipped_entries: batch.skipped,
        bad_prices: batch.bad_prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::RawPayload;
    use crate::sources::{builtin_sources, FeedSource, ListingEndpoint};
    use std::collections::HashMap;

    /// In-memory fetcher serving a PublishedPrices-style source.
    struct DirFetch {
        listing: String,
        files: HashMap<String, Vec<u8>>,
    }

    impl Fetch for DirFetch {
        async fn get_text(&self, url: &str) -> Result<String> {
            if url.ends_with("/file/json/dir") {
                Ok(self.listing.clone())
            } else {
                Err(PipelineError::FetchFailed {
                    url: url.to_string(),
                    cause: "status 404".to_string(),
                })
            }
        }

        async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
            let name = url.rsplit('/').next().unwrap_or_default();
            let name = urlencoding::decode(name).unwrap_or_default().into_owned();
            match self.files.get(&name) {
                Some(bytes) if !bytes.is_empty() => Ok(RawPayload::new(bytes.clone(), url)),
                Some(_) => Err(PipelineError::FetchFailed {
                    url: url.to_string(),
                    cause: "empty body".to_string(),
                }),
                None => Err(PipelineError::FetchFailed {
                    url: url.to_string(),
                    cause: "status 404".to_string(),
                }),
            }
        }
    }

    fn test_source() -> FeedSource {
        let mut source = builtin_sources()
            .into_iter()
            .find(|s| s.chain == "rami_levy")
            .unwrap();
        source.listing = ListingEndpoint::PublishedPrices {
            base: "https://feeds.test".to_string(),
        };
        source
    }

    fn price_xml(barcode: &str, name: &str, price: &str) -> Vec<u8> {
        format!(
            "<Items><Item><ItemCode>{barcode}</ItemCode><ItemNm>{name}</ItemNm><ItemPrice>{price}</ItemPrice></Item></Items>"
        )
        .into_bytes()
    }

    fn listing(names: &[&str]) -> String {
        let entries: Vec<String> = names
            .iter()
            .map(|n| format!(r#"{{"name":"{n}"}}"#))
            .collect();
        format!("[{}]", entries.join(","))
    }

    #[tokio::test]
    async fn test_run_merges_across_files() {
        let fetch = DirFetch {
            listing: listing(&["PriceFull-001-202501010000.xml", "PriceFull-002-202501010000.xml"]),
            files: HashMap::from([
                (
                    "PriceFull-001-202501010000.xml".to_string(),
                    price_xml("1", "Milk", "6.90"),
                ),
                (
                    "PriceFull-002-202501010000.xml".to_string(),
                    price_xml("2", "Bread", "8.00"),
                ),
            ]),
        };
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, CancellationToken::new()).await;
        assert_eq!(outcome.report.succeeded, 2);
        assert_eq!(outcome.report.failed, 0);
        assert_eq!(outcome.catalog.product_count(), 2);
        assert_eq!(outcome.report.products_merged, 2);
    }

    #[tokio::test]
    async fn test_one_bad_file_does_not_stop_the_rest() {
        let fetch = DirFetch {
            listing: listing(&[
                "PriceFull-001-202501010000.xml",
                "PriceFull-002-202501010000.xml",
                "PriceFull-003-202501010000.xml",
            ]),
            files: HashMap::from([
                (
                    "PriceFull-001-202501010000.xml".to_string(),
                    price_xml("1", "Milk", "6.90"),
                ),
                // gzip magic followed by garbage: decode failure
                (
                    "PriceFull-002-202501010000.xml".to_string(),
                    vec![0x1f, 0x8b, 0x00, 0x00],
                ),
                (
                    "PriceFull-003-202501010000.xml".to_string(),
                    price_xml("3", "Eggs", "14.00"),
                ),
            ]),
        };
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, CancellationToken::new()).await;
        assert_eq!(outcome.report.succeeded, 2);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.catalog.product_count(), 2);

        let failed: Vec<&FileOutcome> = outcome
            .report
            .files
            .iter()
            .filter(|f| matches!(f.status, OutcomeStatus::Failed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        let OutcomeStatus::Failed { class, .. } = &failed[0].status else {
            unreachable!();
        };
        assert_eq!(class, "DecodeFailed");
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported_and_isolated() {
        // First source's listing 404s; second source still ingests.
        struct TwoSourceFetch {
            good: DirFetch,
        }
        impl Fetch for TwoSourceFetch {
            async fn get_text(&self, url: &str) -> Result<String> {
                if url.starts_with("https://down.test") {
                    Err(PipelineError::FetchFailed {
                        url: url.to_string(),
                        cause: "status 503".to_string(),
                    })
                } else {
                    self.good.get_text(url).await
                }
            }
            async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
                self.good.get_bytes(url).await
            }
        }

        let fetch = TwoSourceFetch {
            good: DirFetch {
                listing: listing(&["PriceFull-001-202501010000.xml"]),
                files: HashMap::from([(
                    "PriceFull-001-202501010000.xml".to_string(),
                    price_xml("1", "Milk", "6.90"),
                )]),
            },
        };

        let mut down = test_source();
        down.chain = "down_chain".to_string();
        down.listing = ListingEndpoint::PublishedPrices {
            base: "https://down.test".to_string(),
        };

        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            retries: 0,
            ..Default::default()
        };
        let outcome = run(
            fetch,
            &[down, test_source()],
            &policy,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.report.succeeded, 1);
        assert_eq!(outcome.report.failed, 1);
        let down_totals = outcome.report.per_source.get("down_chain").unwrap();
        assert_eq!(down_totals.failed, 1);
        let OutcomeStatus::Failed { class, .. } = &outcome
            .report
            .files
            .iter()
            .find(|f| f.chain == "down_chain")
            .unwrap()
            .status
        else {
            panic!("expected failure entry");
        };
        assert_eq!(class, "DirectoryUnavailable");
    }

    #[tokio::test]
    async fn test_file_cap_bounds_processing() {
        let names: Vec<String> = (0..6)
            .map(|i| format!("PriceFull-00{i}-202501010000.xml"))
            .collect();
        let fetch = DirFetch {
            listing: listing(&names.iter().map(String::as_str).collect::<Vec<_>>()),
            files: names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.clone(), price_xml(&i.to_string(), "P", "1.0")))
                .collect(),
        };
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            max_files: Some(2),
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, CancellationToken::new()).await;
        assert_eq!(outcome.report.attempted, 2);
        assert_eq!(outcome.catalog.product_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_records_skips_and_still_reports() {
        let fetch = DirFetch {
            listing: listing(&["PriceFull-001-202501010000.xml", "PriceFull-002-202501010000.xml"]),
            files: HashMap::new(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, cancel).await;
        // Cancelled before any listing: nothing attempted, report still valid.
        assert_eq!(outcome.report.attempted, 0);
        assert_eq!(outcome.catalog.product_count(), 0);
    }

    #[tokio::test]
    async fn test_files_not_started_at_cancellation_are_skipped() {
        /// Cancels the token as soon as the first download begins, so files
        /// queued behind it never start.
        struct CancelOnFirstDownload {
            inner: DirFetch,
            cancel: CancellationToken,
        }

        impl Fetch for CancelOnFirstDownload {
            async fn get_text(&self, url: &str) -> Result<String> {
                self.inner.get_text(url).await
            }

            async fn get_bytes(&self, url: &str) -> Result<RawPayload> {
                self.cancel.cancel();
                self.inner.get_bytes(url).await
            }
        }

        let cancel = CancellationToken::new();
        let fetch = CancelOnFirstDownload {
            inner: DirFetch {
                listing: listing(&[
                    "PriceFull-001-202501010000.xml",
                    "PriceFull-002-202501010000.xml",
                ]),
                files: HashMap::from([
                    (
                        "PriceFull-001-202501010000.xml".to_string(),
                        price_xml("1", "Milk", "6.90"),
                    ),
                    (
                        "PriceFull-002-202501010000.xml".to_string(),
                        price_xml("2", "Bread", "8.00"),
                    ),
                ]),
            },
            cancel: cancel.clone(),
        };
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            // One download at a time, so the second file has not started
            // when the token fires.
            concurrency: Some(1),
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, cancel).await;

        // In-flight file finishes; the queued one is recorded as skipped.
        assert_eq!(outcome.report.succeeded, 1);
        assert_eq!(outcome.report.skipped, 1);
        assert_eq!(outcome.catalog.product_count(), 1);

        let skipped: Vec<&FileOutcome> = outcome
            .report
            .files
            .iter()
            .filter(|f| f.status == OutcomeStatus::Skipped)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].file, "PriceFull-002-202501010000.xml");

        let totals = outcome.report.per_source.get("rami_levy").unwrap();
        assert_eq!(totals.succeeded, 1);
        assert_eq!(totals.skipped, 1);
    }

    #[tokio::test]
    async fn test_report_entries_sorted_by_file_name() {
        let fetch = DirFetch {
            listing: listing(&[
                "PriceFull-003-202501010000.xml",
                "PriceFull-001-202501010000.xml",
                "PriceFull-002-202501010000.xml",
            ]),
            files: HashMap::from([
                (
                    "PriceFull-003-202501010000.xml".to_string(),
                    price_xml("3", "C", "1.0"),
                ),
                (
                    "PriceFull-001-202501010000.xml".to_string(),
                    price_xml("1", "A", "1.0"),
                ),
                (
                    "PriceFull-002-202501010000.xml".to_string(),
                    price_xml("2", "B", "1.0"),
                ),
            ]),
        };
        let policy = RunPolicy {
            kinds: vec![FileKind::PriceFull],
            retries: 0,
            ..Default::default()
        };
        let outcome = run(fetch, &[test_source()], &policy, CancellationToken::new()).await;
        let names: Vec<&str> = outcome.report.files.iter().map(|f| f.file.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
