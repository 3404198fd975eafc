//! CLI entry point for estat-harvest.

use anyhow::{Context, Result, bail};
use clap::Parser;
use estat_harvest::{
    Config, DatasetConfig, RunReport, SessionLauncher, Stage, cancel_on_shutdown_signal,
    convert_dataset, run_crawl,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    args.command.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let datasets = select_datasets(&config, &args.command.common().datasets)?;

    let cancel = CancellationToken::new();
    let signals = cancel_on_shutdown_signal(cancel.clone());

    let mut report = RunReport::default();
    let outcome = execute(&args.command, &config, &datasets, &cancel, &mut report).await;

    // Stop the signal listener
    cancel.cancel();
    signals.await.ok();

    // Whatever happened, keep the record of what was done
    if let Some(path) = &args.command.common().report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    outcome?;

    if !report.dataset_failures.is_empty() {
        bail!(
            "{} dataset stage(s) failed: {}",
            report.dataset_failures.len(),
            report
                .dataset_failures
                .iter()
                .map(|f| format!("{} ({:?})", f.dataset, f.stage))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let failures = report.failure_count();
    if failures > 0 {
        warn!(failures, "finished with failures; see the log or --report for details");
    } else {
        info!("finished");
    }
    Ok(())
}

async fn execute(
    command: &Command,
    config: &Config,
    datasets: &[DatasetConfig],
    cancel: &CancellationToken,
    report: &mut RunReport,
) -> Result<()> {
    match command {
        Command::Crawl(_) => {
            let launcher = launcher(config)?;
            crawl(launcher.as_ref(), config, datasets, cancel, report).await;
        }
        Command::Convert(_) => convert(config, datasets, report).await,
        Command::Run(_) => {
            let launcher = launcher(config)?;
            crawl(launcher.as_ref(), config, datasets, cancel, report).await;
            if cancel.is_cancelled() {
                warn!("interrupted, skipping conversion");
            } else {
                convert(config, datasets, report).await;
            }
        }
    }
    Ok(())
}

fn select_datasets(config: &Config, names: &[String]) -> Result<Vec<DatasetConfig>> {
    if names.is_empty() {
        return Ok(config.datasets.clone());
    }
    names
        .iter()
        .map(|name| {
            config.dataset(name).cloned().with_context(|| {
                let known: Vec<&str> = config.datasets.iter().map(|d| d.name.as_str()).collect();
                format!("unknown dataset {name:?} (known: {})", known.join(", "))
            })
        })
        .collect()
}

/// Crawl each dataset in turn; a dataset that fails outright is recorded and skipped
async fn crawl(
    launcher: &dyn SessionLauncher,
    config: &Config,
    datasets: &[DatasetConfig],
    cancel: &CancellationToken,
    report: &mut RunReport,
) {
    for dataset in datasets {
        if cancel.is_cancelled() {
            break;
        }
        match run_crawl(launcher, config, dataset, cancel).await {
            Ok(crawl) => report.crawls.push(crawl),
            Err(e) => {
                error!(dataset = %dataset.name, error = %e, "crawl failed, continuing with next dataset");
                report.record_dataset_failure(&dataset.name, Stage::Crawl, &e);
            }
        }
    }
}

/// Convert each downloaded dataset; a dataset that fails outright is recorded and skipped
async fn convert(config: &Config, datasets: &[DatasetConfig], report: &mut RunReport) {
    for dataset in datasets {
        let dataset_dir = config.dataset_dir(&dataset.name);
        if !dataset_dir.is_dir() {
            warn!(dataset = %dataset.name, dir = %dataset_dir.display(), "nothing downloaded, skipping");
            continue;
        }
        match convert_dataset(&dataset_dir, config).await {
            Ok(years) => report.conversions.extend(years),
            Err(e) => {
                error!(dataset = %dataset.name, error = %e, "conversion failed, continuing with next dataset");
                report.record_dataset_failure(&dataset.name, Stage::Convert, &e);
            }
        }
    }
}

#[cfg(feature = "chromium")]
fn launcher(config: &Config) -> Result<Box<dyn SessionLauncher>> {
    Ok(Box::new(estat_harvest::browser::ChromiumLauncher::new(
        config.browser.clone(),
    )))
}

#[cfg(not(feature = "chromium"))]
fn launcher(_config: &Config) -> Result<Box<dyn SessionLauncher>> {
    bail!("no browser backend compiled in; rebuild with `--features chromium` to crawl")
}
