//! Core types for estat-harvest

use crate::browser::ElementRef;
use crate::error::ConvertError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Scratch subdirectory of a year directory holding extracted tables
pub const SCRATCH_DIR_NAME: &str = "txt_origin";
/// Subdirectory of a year directory holding downloaded archives
pub const ARCHIVE_DIR_NAME: &str = "zip";
/// Subdirectory of a year directory holding canonical tables
pub const OUTPUT_DIR_NAME: &str = "csv";

/// A year offered by the catalog's year selector
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogYear {
    /// Four-digit year ("2020")
    pub year: String,
    /// Label as shown on the page ("2020年")
    pub label: String,
}

impl fmt::Display for CatalogYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.year)
    }
}

/// One download link on a result page
#[derive(Clone, Debug)]
pub struct DownloadLink {
    /// 1-based position of the link on its page
    pub index: usize,
    /// Page the link was found on
    pub page: u32,
    /// Handle used to trigger the download
    pub element: ElementRef,
}

/// Why one download attempt did not produce a confirmed artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// Nothing qualifying appeared before the watcher timed out
    Timeout,
    /// A file appeared and was gone at the existence check
    Vanished {
        /// The file that disappeared
        file: String,
    },
    /// The download action itself could not be triggered
    TriggerFailed {
        /// The reason the action failed
        reason: String,
    },
    /// The run was interrupted
    Cancelled,
    /// The task panicked
    Panicked,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Timeout => f.write_str("timed out"),
            AttemptFailure::Vanished { file } => write!(f, "{file} vanished"),
            AttemptFailure::TriggerFailed { reason } => write!(f, "trigger failed: {reason}"),
            AttemptFailure::Cancelled => f.write_str("cancelled"),
            AttemptFailure::Panicked => f.write_str("panicked"),
        }
    }
}

/// Final state of one download task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadStatus {
    /// The artifact is present in the staging directory
    Success {
        /// Name of the downloaded file
        file: String,
    },
    /// Every attempt timed out, but an artifact arrived while the batch
    /// settled and was attributed to this link in link order
    LateArrival {
        /// Name of the downloaded file
        file: String,
    },
    /// Every attempt failed; `last` is the final attempt's failure
    ExhaustedRetries {
        /// Why the last attempt failed
        last: AttemptFailure,
    },
}

/// Outcome of one download task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// 1-based link position on its page
    pub link_index: usize,
    /// Page the link was on
    pub page: u32,
    /// Number of attempts made
    pub attempts: u32,
    /// Attempts whose click produced nothing before the watcher gave up
    ///
    /// Each of these downloads may still finish later.
    #[serde(default)]
    pub timed_out: u32,
    /// Final state
    pub status: DownloadStatus,
}

impl DownloadOutcome {
    /// Whether the artifact was downloaded
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Success { .. } | DownloadStatus::LateArrival { .. }
        )
    }

    /// Downloaded file name, if any
    pub fn file_name(&self) -> Option<&str> {
        match &self.status {
            DownloadStatus::Success { file } | DownloadStatus::LateArrival { file } => Some(file),
            DownloadStatus::ExhaustedRetries { .. } => None,
        }
    }
}

/// Outcomes of one page's download batch, in completion order
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// One outcome per submitted link
    pub outcomes: Vec<DownloadOutcome>,
    /// Late artifacts with no timed-out link left to attribute them to
    #[serde(default)]
    pub unattributed: Vec<String>,
}

impl BatchReport {
    /// link index → success
    pub fn by_index(&self) -> BTreeMap<usize, bool> {
        self.outcomes
            .iter()
            .map(|o| (o.link_index, o.is_success()))
            .collect()
    }

    /// Number of successful downloads
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Outcomes that exhausted their retries
    pub fn failures(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Result of moving files out of the staging directory
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationReport {
    /// Files moved into the year directory
    pub moved: Vec<String>,
    /// Files left in place because the destination already had them
    pub skipped: Vec<String>,
    /// Files that could not be moved, with the reason
    pub failed: Vec<(String, String)>,
}

impl RelocationReport {
    /// Fold another report into this one
    pub fn merge(&mut self, other: RelocationReport) {
        self.moved.extend(other.moved);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Whether nothing was touched
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// How one year's traversal ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum YearStatus {
    /// Every reachable page was visited
    Completed,
    /// The year was aborted; later years still ran
    Aborted {
        /// Why the year was aborted
        reason: String,
    },
    /// The run was interrupted during this year
    Interrupted,
}

/// Per-year crawl report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct YearReport {
    /// The year
    pub year: String,
    /// How the traversal ended
    pub status: YearStatus,
    /// Total pages reported by the catalog
    pub total_pages: u32,
    /// Pages whose batch ran
    pub pages_visited: Vec<u32>,
    /// Pages that could not be opened
    pub pages_skipped: Vec<u32>,
    /// Every download outcome of the year
    pub downloads: Vec<DownloadOutcome>,
    /// Late artifacts that could not be tied to a failed link
    #[serde(default)]
    pub unattributed: Vec<String>,
    /// Files moved into `{year}/zip`
    pub relocation: RelocationReport,
}

impl YearReport {
    /// Empty report for a year about to be crawled
    pub fn new(year: &str) -> Self {
        Self {
            year: year.to_string(),
            status: YearStatus::Completed,
            total_pages: 0,
            pages_visited: Vec::new(),
            pages_skipped: Vec::new(),
            downloads: Vec::new(),
            unattributed: Vec::new(),
            relocation: RelocationReport::default(),
        }
    }

    /// Number of failed downloads
    pub fn failed_downloads(&self) -> usize {
        self.downloads.iter().filter(|d| !d.is_success()).count()
    }
}

/// Crawl report for one dataset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlReport {
    /// Dataset name
    pub dataset: String,
    /// When the crawl started
    pub started_at: DateTime<Utc>,
    /// When the crawl finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Years in processing order
    pub years: Vec<YearReport>,
}

impl CrawlReport {
    /// Empty report for a dataset
    pub fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            years: Vec::new(),
        }
    }
}

/// Persistent output root of one year
///
/// `zip/` holds downloaded archives, `txt_origin/` is conversion scratch and
/// `csv/` holds the canonical tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct YearDirectory {
    root: PathBuf,
    year: String,
}

impl YearDirectory {
    /// Year directory under a dataset directory
    pub fn new(dataset_dir: &Path, year: &str) -> Self {
        Self {
            root: dataset_dir.join(year),
            year: year.to_string(),
        }
    }

    /// Year directory at an explicit path; the year is its final component
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let year = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { root, year }
    }

    /// The year this directory holds
    pub fn year(&self) -> &str {
        &self.year
    }

    /// `{year}`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{year}/zip`
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR_NAME)
    }

    /// `{year}/txt_origin`
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR_NAME)
    }

    /// `{year}/csv`
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR_NAME)
    }
}

/// Result of converting one archive
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    /// The archive
    pub archive: PathBuf,
    /// Canonical tables written
    pub tables: Vec<PathBuf>,
    /// Failures (a corrupt archive, or per-table decode errors)
    pub failures: Vec<ConvertError>,
}

impl ArchiveOutcome {
    /// Whether the archive converted without any failure
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Conversion report for one year
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct YearConversionReport {
    /// The year
    pub year: String,
    /// One outcome per archive, in completion order
    pub archives: Vec<ArchiveOutcome>,
    /// Whether the scratch and archive directories were removed
    pub cleaned: bool,
}

impl YearConversionReport {
    /// Archives that converted cleanly
    pub fn succeeded(&self) -> impl Iterator<Item = &ArchiveOutcome> {
        self.archives.iter().filter(|a| a.is_success())
    }

    /// Archives with at least one failure
    pub fn failed(&self) -> impl Iterator<Item = &ArchiveOutcome> {
        self.archives.iter().filter(|a| !a.is_success())
    }
}

/// Everything one invocation did, written as JSON with `--report`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Crawl report per dataset crawled
    pub crawls: Vec<CrawlReport>,
    /// Conversion report per year converted
    pub conversions: Vec<YearConversionReport>,
    /// Datasets whose stage failed as a whole
    #[serde(default)]
    pub dataset_failures: Vec<DatasetFailure>,
}

/// Pipeline stage of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Catalog crawl and download
    Crawl,
    /// Extraction and transcoding
    Convert,
}

/// A dataset stage that could not run at all (e.g. the catalog root never loaded)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFailure {
    /// Dataset name
    pub dataset: String,
    /// Stage that failed
    pub stage: Stage,
    /// Stable error code
    pub code: String,
    /// Error message
    pub reason: String,
}

impl RunReport {
    /// Record that `stage` of `dataset` failed outright
    pub fn record_dataset_failure(&mut self, dataset: &str, stage: Stage, error: &crate::error::Error) {
        self.dataset_failures.push(DatasetFailure {
            dataset: dataset.to_string(),
            stage,
            code: error.error_code().to_string(),
            reason: error.to_string(),
        });
    }

    /// Number of failed units (datasets, downloads, aborted years, archives with failures)
    pub fn failure_count(&self) -> usize {
        let crawl_failures: usize = self
            .crawls
            .iter()
            .flat_map(|c| &c.years)
            .map(|y| {
                y.failed_downloads()
                    + y.pages_skipped.len()
                    + usize::from(matches!(y.status, YearStatus::Aborted { .. }))
            })
            .sum();
        let conversion_failures: usize =
            self.conversions.iter().map(|c| c.failed().count()).sum();
        self.dataset_failures.len() + crawl_failures + conversion_failures
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> crate::error::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
