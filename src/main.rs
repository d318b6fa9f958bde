//! CLI entry point for the mango tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mango_core::catalog::DEFAULT_CATALOG_CALLS_PER_MINUTE;
use mango_core::{
    BatchReport, Catalog, ChapterDownloader, Converter, HttpClient, MangadexCatalog,
    ManifestCatalog, Pipeline, RateLimitedCatalog, RateLimiter, RetryPolicy,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{Settings, Source};
use cli::Args;
use progress::BatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = app_config::load_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, loaded.config.as_ref())?;

    // Priority: RUST_LOG env var > CLI flags > config verbosity > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.verbosity.filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, verbosity = settings.verbosity.as_str(), "CLI arguments parsed");
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "configuration loaded");
    }
    info!("mango starting");

    let report = run(&settings).await?;
    print_summary(&report);

    if report.all_failed() {
        bail!("all {} selected chapters failed", report.selected);
    }
    if report.cancelled {
        bail!("interrupted");
    }
    Ok(())
}

async fn run(settings: &Settings) -> Result<BatchReport> {
    let limiter = match settings.catalog_rate_limit_ms {
        None => RateLimiter::per_minute(DEFAULT_CATALOG_CALLS_PER_MINUTE),
        Some(0) => {
            debug!("catalog rate limiting disabled");
            RateLimiter::disabled()
        }
        Some(ms) => {
            debug!(rate_limit_ms = ms, "catalog rate limiting enabled");
            RateLimiter::new(1, Duration::from_millis(ms))
        }
    };
    let limiter = Arc::new(limiter);

    match &settings.source {
        Source::Manifest(path) => {
            let catalog = ManifestCatalog::load(path)
                .await
                .with_context(|| format!("Failed to load manifest '{}'", path.display()))?;
            run_with(settings, RateLimitedCatalog::new(catalog, limiter)).await
        }
        Source::Mangadex(url) => {
            let catalog = MangadexCatalog::new(url, settings.language.clone())
                .with_context(|| format!("Failed to open MangaDex series '{url}'"))?;
            info!(manga_id = catalog.manga_id(), "using MangaDex catalog");
            run_with(settings, RateLimitedCatalog::new(catalog, limiter)).await
        }
    }
}

async fn run_with<C: Catalog>(settings: &Settings, catalog: C) -> Result<BatchReport> {
    let client = HttpClient::try_with_timeouts(
        settings.connect_timeout_secs,
        settings.request_timeout_secs,
    )
    .context("Failed to build HTTP client")?;
    let downloader = ChapterDownloader::new(Arc::new(client), settings.concurrency)?
        .with_retry_policy(RetryPolicy::with_max_retries(settings.max_retries));

    let cancel = CancellationToken::new();
    let interrupted = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight pages");
            interrupted.cancel();
        }
    });

    let mut pipeline = Pipeline::new(catalog, downloader, &settings.output_dir)
        .with_language(settings.language.clone())
        .with_bundle(settings.bundle)
        .with_cancellation(cancel);
    if let Some(format) = settings.format {
        let converter =
            Converter::new(&settings.output_dir).with_delete_source(!settings.keep_source);
        if !converter.is_available() {
            warn!("ebook-convert not found on PATH; conversions will fail");
        }
        pipeline = pipeline.with_conversion(converter, format);
    }

    let mut progress = BatchProgress::new(settings.verbosity == app_config::VerbositySetting::Quiet);
    let report = pipeline
        .run(&settings.selection, |event| progress.handle(event))
        .await;
    progress.finish();
    Ok(report?)
}

fn print_summary(report: &BatchReport) {
    info!(
        title = %report.title,
        selected = report.selected,
        archived = report.archived.len(),
        failed = report.failed.len(),
        "Download complete"
    );
    for path in report.containers() {
        info!(path = %path.display(), "written");
    }
    for failure in &report.failed {
        warn!(chapter = failure.number, language = %failure.language, error = %failure.error, "chapter failed");
    }
    for conversion in &report.conversions {
        if let Some(warning) = &conversion.warning {
            warn!(output = %conversion.output.display(), %warning, "conversion warning");
        }
    }
    for failure in &report.conversion_failures {
        warn!(input = %failure.input.display(), error = %failure.error, "conversion failed");
    }
}
