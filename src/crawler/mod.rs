//! Catalog crawl driven through a browser session.
//!
//! The crawl is split into focused submodules:
//! - [`catalog`] - Individual UI steps (select year, follow category link, paginate)
//! - [`year`] - The per-year state machine tying the steps together
//!
//! [`run_crawl`] owns the run: it recreates the staging directory, starts the
//! browser session, crawls every wanted year, and always tears the session
//! down again.

pub mod catalog;
pub mod year;


pub use catalog::parse_year_label;
pub use year::YearState;

use crate::browser::{BrowserSession, SessionLauncher};
use crate::config::{Config, DatasetConfig};
use crate::downloader::StagingDirectory;
use crate::error::Result;
use crate::types::CrawlReport;
use chrono::Utc;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sequential crawler over one dataset's catalog
///
/// Holds the session handle every step operates on; navigation never
/// overlaps, only the per-page download batch fans out.
pub struct Crawler<'a> {
    session: &'a dyn BrowserSession,
    config: &'a Config,
    dataset: &'a DatasetConfig,
    staging: &'a StagingDirectory,
    dataset_dir: PathBuf,
    workers: usize,
    cancel: &'a CancellationToken,
}

impl<'a> Crawler<'a> {
    /// Crawler over `dataset`, downloading through `session` into `staging`
    pub fn new(
        session: &'a dyn BrowserSession,
        config: &'a Config,
        dataset: &'a DatasetConfig,
        staging: &'a StagingDirectory,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            session,
            config,
            dataset,
            staging,
            dataset_dir: config.dataset_dir(&dataset.name),
            workers: config.worker_count(),
            cancel,
        }
    }

    /// Override the download worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Crawl every wanted year in catalog order
    ///
    /// Fails only if the catalog root cannot be loaded or its years cannot be
    /// listed; per-year failures are recorded in the report.
    pub async fn crawl(&self) -> Result<CrawlReport> {
        let mut report = CrawlReport::new(&self.dataset.name);

        self.open_root().await?;
        let years = self.enumerate_years().await?;
        info!(
            dataset = %self.dataset.name,
            years = ?years.iter().map(|y| y.year.as_str()).collect::<Vec<_>>(),
            workers = self.workers,
            "starting crawl"
        );

        for year in &years {
            if self.cancel.is_cancelled() {
                warn!(year = %year.year, "interrupted, not starting year");
                break;
            }
            report.years.push(self.crawl_year(year).await);
        }

        report.finished_at = Some(Utc::now());
        Ok(report)
    }
}

/// Crawl one dataset end to end
///
/// Recreates the staging directory, launches a session downloading into it,
/// crawls, and tears the session down whether or not the crawl succeeded. The
/// staging directory is removed afterwards if it was fully drained.
pub async fn run_crawl(
    launcher: &dyn SessionLauncher,
    config: &Config,
    dataset: &DatasetConfig,
    cancel: &CancellationToken,
) -> Result<CrawlReport> {
    let staging = StagingDirectory::recreate(&config.staging_dir).await?;

    let session = match launcher.launch(staging.path()).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "failed to start browser session");
            if let Err(cleanup) = staging.finish().await {
                warn!(error = %cleanup, "failed to clear staging directory");
            }
            return Err(e);
        }
    };

    let result = Crawler::new(session.as_ref(), config, dataset, &staging, cancel)
        .crawl()
        .await;

    if let Err(e) = session.shutdown().await {
        warn!(error = %e, "browser session did not shut down cleanly");
    }
    if let Err(e) = staging.finish().await {
        warn!(error = %e, "failed to clear staging directory");
    }

    match &result {
        Ok(report) => info!(
            dataset = %report.dataset,
            years = report.years.len(),
            "crawl finished"
        ),
        Err(e) => error!(dataset = %dataset.name, error = %e, "crawl failed"),
    }
    result
}
