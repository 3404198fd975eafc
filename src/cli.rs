//! CLI argument definitions using clap derive macros.

use clap::{Args as ClapArgs, Parser, Subcommand};
use estat_harvest::Config;
use std::path::PathBuf;

/// Download and normalize e-Stat statistical map tables.
///
/// `crawl` downloads every table archive of a dataset into
/// `<download-root>/<dataset>/<year>/zip`, `convert` turns those archives
/// into UTF-8 CSV under `<year>/csv`, and `run` does both.
#[derive(Parser, Debug)]
#[command(name = "estat-harvest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// JSON configuration file (defaults apply to anything it omits)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// What to do
    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stages
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download table archives from the catalog
    Crawl(CrawlArgs),
    /// Convert downloaded archives into UTF-8 CSV
    Convert(CommonArgs),
    /// Crawl, then convert
    Run(CrawlArgs),
}

/// Options shared by every stage
#[derive(ClapArgs, Debug, Default)]
pub struct CommonArgs {
    /// Dataset to process (repeatable; default: every configured dataset)
    #[arg(short, long = "dataset")]
    pub datasets: Vec<String>,

    /// Root of the output tree
    #[arg(long)]
    pub download_root: Option<PathBuf>,

    /// Size worker pools to available parallelism divided by this
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1024))]
    pub workers_divisor: Option<u16>,

    /// Write a JSON report of every processed unit to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Options of the crawl stage
#[derive(ClapArgs, Debug, Default)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Only crawl this year (repeatable; overrides the dataset's allow-list)
    #[arg(short, long = "year")]
    pub years: Vec<String>,

    /// Retries per download link after the first attempt (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: Option<u32>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,
}

impl Command {
    /// Options shared by every stage
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Crawl(crawl) | Command::Run(crawl) => &crawl.common,
            Command::Convert(common) => common,
        }
    }

    /// Fold command-line overrides into a loaded config
    pub fn apply(&self, config: &mut Config) {
        let common = self.common();
        if let Some(root) = &common.download_root {
            config.download_root = root.clone();
        }
        if let Some(divisor) = common.workers_divisor {
            config.worker_divisor = usize::from(divisor);
        }

        if let Command::Crawl(crawl) | Command::Run(crawl) = self {
            if let Some(retries) = crawl.max_retries {
                config.download.retry.max_retries = retries;
            }
            if crawl.headful {
                config.browser.headless = false;
            }
            if !crawl.years.is_empty() {
                for dataset in &mut config.datasets {
                    if common.datasets.is_empty() || common.datasets.contains(&dataset.name) {
                        dataset.years = Some(crawl.years.clone());
                    }
                }
            }
        }
    }
}
