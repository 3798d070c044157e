//! CLI entry point for sift.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sift_core::acquisition::Acquisition;
use sift_core::download::DownloadStats;
use sift_core::screening::{self, LogLevel};
use sift_core::{AcquisitionOptions, HttpClient, RetryPolicy, ZoteroClient, load_config};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command, DownloadArgs, ScreenArgs, ZoteroArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    match &args.command {
        Command::Screen(screen) => {
            let config = load_config(&screen.config).with_context(|| {
                format!("failed to load screening config {}", screen.config.display())
            })?;
            init_tracing(&args, config.project.log_level);
            run_screen(screen, &config).await
        }
        Command::Download(download) => {
            init_tracing(&args, None);
            run_download(download, args.quiet).await
        }
        Command::Zotero(zotero) => {
            init_tracing(&args, None);
            run_zotero(zotero).await
        }
    }
}

/// Priority: `RUST_LOG` > `--quiet` > `-v` count > config `log_level` > info.
fn init_tracing(args: &Args, config_level: Option<LogLevel>) {
    let default_level = if args.quiet {
        "error"
    } else {
        match (args.verbose, config_level) {
            (0, Some(level)) => level.as_filter(),
            (0, None) => "info",
            (1, _) => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
}

async fn run_screen(args: &ScreenArgs, config: &screening::ScreeningConfig) -> Result<()> {
    info!(config = %args.config.display(), project = %config.project.name, "Screening starting");
    let client = HttpClient::new().context("failed to build HTTP client")?;
    let result = screening::run(config, client)
        .await
        .context("screening failed")?;

    println!(
        "Screened {} records: {} included, {} excluded",
        result.total(),
        result.included_count(),
        result.excluded_count()
    );
    for (key, value) in &result.statistics {
        println!("  {key}: {value}");
    }
    println!("Results written to {}", config.project.output_file.display());
    Ok(())
}

async fn run_download(args: &DownloadArgs, quiet: bool) -> Result<()> {
    if !args.input.is_file() {
        bail!("input file not found: {}", args.input.display());
    }
    info!(input = %args.input.display(), "Download starting");

    let options = AcquisitionOptions {
        output_dir: args.output_dir.clone(),
        concurrency: usize::from(args.concurrency),
        per_host: usize::from(args.per_host),
        retry_policy: RetryPolicy::from_max_retries(u32::from(args.max_retries)),
        mailto: args.mailto.clone(),
        rate_limit: Duration::from_millis(args.rate_limit),
        crossref_base_url: args.crossref_url.clone(),
        unpaywall_base_url: args.unpaywall_url.clone(),
        doi_resolver: args.doi_resolver.clone(),
    };
    let client = HttpClient::new().context("failed to build HTTP client")?;
    let acquisition = Acquisition::new(options, client).context("invalid download settings")?;

    let use_spinner = !quiet && io::stderr().is_terminal();
    let (spinner, stop) = spawn_progress_ui(use_spinner, acquisition.stats());
    let result = acquisition.run(&args.input).await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = spinner {
        let _ = handle.await;
    }
    let summary =
        result.with_context(|| format!("download run failed for {}", args.input.display()))?;

    let stats = acquisition.stats();
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        retried = stats.retried(),
        fallbacks = stats.fallbacks(),
        "Download complete"
    );
    println!(
        "Downloaded {}/{} ({} failed)",
        summary.downloaded, summary.total, summary.failed
    );
    println!("Report written to {}", summary.report_path.display());
    Ok(())
}

async fn run_zotero(args: &ZoteroArgs) -> Result<()> {
    let client = HttpClient::new().context("failed to build HTTP client")?;
    let zotero = match &args.api_url {
        Some(base) => ZoteroClient::with_base_url(client, &args.user, &args.api_key, base),
        None => ZoteroClient::new(client, &args.user, &args.api_key),
    };
    let summary = zotero
        .download_collection(&args.collection, &args.parent_dir)
        .await
        .with_context(|| format!("Zotero download failed for '{}'", args.collection))?;

    println!(
        "Downloaded {}/{} attachments ({} failed) to {}",
        summary.downloaded,
        summary.attachments,
        summary.failed,
        summary.output_dir.display()
    );
    Ok(())
}

/// Spawns the spinner when requested. Returns (handle, stop); set `stop`
/// and await the handle to clear it.
fn spawn_progress_ui(
    use_spinner: bool,
    stats: Arc<DownloadStats>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !flag.load(Ordering::SeqCst) {
            spinner.set_message(format!(
                "{} done, {} failed, {} active",
                stats.completed(),
                stats.failed(),
                stats.active()
            ));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    });
    (Some(handle), stop)
}
