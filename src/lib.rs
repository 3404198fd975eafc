//! # estat-harvest
//!
//! Harvester for the e-Stat statistical map catalog: crawls the catalog's
//! year/category/page hierarchy through a browser session, downloads every
//! published table archive, and normalizes the downloaded tables from
//! Shift_JIS into BOM-prefixed UTF-8 CSV.
//!
//! ## Pipeline
//!
//! The two halves share nothing but the on-disk layout:
//!
//! ```text
//! downloads/<dataset>/<year>/zip/*.zip          crawl output
//! downloads/<dataset>/<year>/txt_origin/*.txt   conversion scratch
//! downloads/<dataset>/<year>/csv/*.csv          canonical tables
//! ```
//!
//! - [`crawler::run_crawl`] walks one dataset's catalog and fills `zip/`
//! - [`conversion::convert_dataset`] turns every `zip/` into `csv/`
//!
//! ## Quick Start
//!
//! ```no_run
//! use estat_harvest::{Config, conversion};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let dataset_dir = config.dataset_dir("population-census-mesh");
//!
//!     for year in conversion::convert_dataset(&dataset_dir, &config).await? {
//!         println!("{}: {} archives converted", year.year, year.succeeded().count());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Browser automation seam
pub mod browser;
/// Configuration types
pub mod config;
/// Archive conversion pipeline
pub mod conversion;
/// Catalog crawl state machine
pub mod crawler;
/// Download tasks, batches and the staging directory
pub mod downloader;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Polling detection of new files
pub mod folder_watcher;
/// Retry logic with configurable backoff
pub mod retry;
/// Text re-encoding
pub mod transcode;
/// Core types and reports
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use browser::{BrowserSession, ElementRef, Locator, SessionLauncher};
pub use config::{Config, DatasetConfig, FileCollisionAction};
pub use conversion::{convert_dataset, convert_year};
pub use crawler::{Crawler, run_crawl};
pub use error::{ConvertError, Error, Result};
pub use types::{
    CrawlReport, DatasetFailure, RunReport, Stage, YearConversionReport, YearDirectory, YearReport,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// Spawns a background task; in-flight watchers observe the token and stop
/// waiting, and the crawl stops after relocating what it already has.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use estat_harvest::cancel_on_shutdown_signal;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let cancel = CancellationToken::new();
///     let _signals = cancel_on_shutdown_signal(cancel.clone());
///     // pass `&cancel` to run_crawl
/// }
/// ```
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("Shutdown requested, finishing current step");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
