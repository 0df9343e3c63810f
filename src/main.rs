//! # price_atlas
//!
//! Ingests the product-price and store-location feeds that grocery chains
//! are required to publish, normalizes their heterogeneous XML vocabularies
//! into one canonical shape, and exports a deduplicated catalog of products
//! (keyed by barcode) and stores (keyed by chain + store id).
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture, per source and per file:
//! 1. **Listing**: discover the files each source currently advertises
//! 2. **Fetching**: resolve and download file content (bounded per source)
//! 3. **Decoding**: detect and unwrap the compression container
//! 4. **Normalizing**: map source vocabularies onto canonical records
//! 5. **Merging**: fold records into the shared catalog, last writer wins
//!
//! Every per-file failure is classified into the run report and the run
//! continues; the report is always produced, even if every file failed.
//!
//! ## Usage
//!
//! ```sh
//! price_atlas -o ./out --max-files 3
//! ```

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;

use cli::Cli;
use price_atlas::fetch::HttpFetcher;
use price_atlas::models::FileKind;
use price_atlas::run::{self, OutcomeStatus, RunPolicy};
use price_atlas::utils::ensure_writable_dir;
use price_atlas::{geocode, outputs, sources};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("price_atlas starting up");

    let args = Cli::parse();

    // --- Source configuration (the one fatal error path) ---
    let mut feed_sources = match &args.sources {
        Some(path) => sources::load_sources(path)?,
        None => sources::builtin_sources(),
    };
    if !args.chains.is_empty() {
        feed_sources.retain(|s| args.chains.contains(&s.chain));
        if feed_sources.is_empty() {
            error!(chains = ?args.chains, "no configured source matches the requested chains");
            return Err("no matching sources".into());
        }
    }
    sources::validate_sources(&feed_sources)?;
    info!(count = feed_sources.len(), "Sources configured");

    // Early check: ensure the output dir is writable before spending network time.
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(path = %args.output_dir, error = %e, "output directory is not writable");
        return Err(e);
    }

    // --- Run policy ---
    let kinds = if args.prices_only {
        vec![FileKind::PriceFull]
    } else if args.stores_only {
        vec![FileKind::Stores]
    } else {
        vec![FileKind::PriceFull, FileKind::Stores]
    };
    let policy = RunPolicy {
        kinds,
        max_files: args.max_files,
        concurrency: args.concurrency,
        retries: args.retries,
    };

    let fetcher = HttpFetcher::new(
        Duration::from_secs(args.listing_timeout),
        Duration::from_secs(args.content_timeout),
    )?;

    let cancel = CancellationToken::new();
    if let Some(secs) = args.run_timeout {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "run timeout reached; cancelling remaining files");
            deadline.cancel();
        });
    }

    // --- The run ---
    let outcome = run::run(fetcher.clone(), &feed_sources, &policy, cancel).await;
    let mut catalog = outcome.catalog;
    let report = outcome.report;

    // --- Post-merge store enrichment (best-effort, never fatal) ---
    geocode::enrich_stores(&mut catalog, &fetcher, args.geocode).await;

    // --- Export ---
    outputs::json::write_catalog(&catalog, &args.output_dir).await?;
    if let Err(e) = outputs::json::write_report(&report, &args.output_dir).await {
        error!(error = %e, "failed to write run report");
    }

    for file in &report.files {
        if let OutcomeStatus::Failed { class, reason } = &file.status {
            warn!(chain = %file.chain, file = %file.file, %class, %reason, "file failed");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        secs = elapsed.as_secs(),
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        products = catalog.product_count(),
        stores = catalog.store_count(),
        "Execution complete"
    );

    Ok(())
}
