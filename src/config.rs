//! Configuration types for estat-harvest

use crate::error::{Error, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a harvest run
///
/// Every field has a default, so an empty JSON object is a valid config that
/// targets the two built-in datasets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root of the persistent output tree (default: "downloads")
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Scratch directory the browser downloads into (default: "tmp")
    ///
    /// Recreated empty at the start of every crawl run.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Worker pools are sized to available parallelism divided by this (default: 2)
    #[serde(default = "default_worker_divisor")]
    pub worker_divisor: usize,

    /// What to do when a relocated file already exists in the year directory
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Per-link download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Browser session behavior
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Extraction and transcoding behavior
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Catalog datasets known to this run
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            staging_dir: default_staging_dir(),
            worker_divisor: default_worker_divisor(),
            file_collision: FileCollisionAction::default(),
            download: DownloadConfig::default(),
            browser: BrowserConfig::default(),
            conversion: ConversionConfig::default(),
            datasets: default_datasets(),
        }
    }
}

impl Config {
    /// Load a config from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of concurrent workers for download and conversion batches
    ///
    /// Half of the available parallelism by default, never less than one.
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / self.worker_divisor.max(1)).max(1)
    }

    /// Look up a dataset by name
    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Output directory of one dataset (`{download_root}/{name}`)
    pub fn dataset_dir(&self, name: &str) -> PathBuf {
        self.download_root.join(name)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.worker_divisor == 0 {
            return Err(Error::config("worker_divisor", "must be at least 1"));
        }

        let watcher = &self.download.watcher;
        if watcher.poll_interval.is_zero() {
            return Err(Error::config("download.watcher.poll_interval", "must be > 0"));
        }
        if watcher.poll_interval >= watcher.timeout {
            return Err(Error::config(
                "download.watcher.poll_interval",
                "must be shorter than the watcher timeout",
            ));
        }
        if self.download.artifact_suffix.is_empty() {
            return Err(Error::config("download.artifact_suffix", "must not be empty"));
        }

        self.conversion.source_encoding()?;
        let destination = self.conversion.destination_encoding()?;
        if self.conversion.write_bom && destination != encoding_rs::UTF_8 {
            return Err(Error::config(
                "conversion.write_bom",
                format!("a byte-order mark is only written for UTF-8, not {}", destination.name()),
            ));
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if dataset.name.trim().is_empty() {
                return Err(Error::config("datasets.name", "must not be empty"));
            }
            if !names.insert(dataset.name.as_str()) {
                return Err(Error::config(
                    "datasets.name",
                    format!("duplicate dataset name {}", dataset.name),
                ));
            }
        }

        Ok(())
    }
}

/// Per-link download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Suffix of a completed artifact (default: ".zip")
    ///
    /// In-progress browser downloads (`.crdownload`) never match.
    #[serde(default = "default_artifact_suffix")]
    pub artifact_suffix: String,

    /// Retry policy for one link
    #[serde(default)]
    pub retry: RetryConfig,

    /// Staging directory polling
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            artifact_suffix: default_artifact_suffix(),
            retry: RetryConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl DownloadConfig {
    /// Whether a file name is a completed artifact
    pub fn is_artifact(&self, name: &str) -> bool {
        name.to_ascii_lowercase()
            .ends_with(&self.artifact_suffix.to_ascii_lowercase())
    }
}

/// Retry configuration for one download link
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3, so up to 4 attempts)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_backoff", with = "millis_serde")]
    pub backoff: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the delay (default: 60 seconds)
    #[serde(default = "default_max_backoff", with = "millis_serde")]
    pub max_backoff: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: default_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff: default_max_backoff(),
            jitter: false,
        }
    }
}

/// Staging directory polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Give up waiting for a new artifact after this long (default: 120 seconds)
    ///
    /// Must exceed the transfer time of the largest expected archive.
    #[serde(default = "default_watch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Delay between directory listings (default: 500 ms)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// Pause before confirming a detected artifact still exists (default: 500 ms)
    #[serde(default = "default_verify_delay", with = "millis_serde")]
    pub verify_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            timeout: default_watch_timeout(),
            poll_interval: default_poll_interval(),
            verify_delay: default_verify_delay(),
        }
    }
}

/// Browser session configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run the browser without a window (default: true)
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome/Chromium executable (auto-detected if None)
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    /// Wait this long for a page's structural marker (default: 30 seconds)
    #[serde(default = "default_page_load_timeout", with = "duration_serde")]
    pub page_load_timeout: Duration,

    /// Wait this long for an individual element (default: 15 seconds)
    #[serde(default = "default_element_timeout", with = "duration_serde")]
    pub element_timeout: Duration,

    /// Pause after clicking a page button before reading the listing (default: 3 seconds)
    #[serde(default = "default_page_settle", with = "millis_serde")]
    pub page_settle: Duration,

    /// Polling interval for element waits (default: 250 ms)
    #[serde(default = "default_wait_poll", with = "millis_serde")]
    pub wait_poll: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            page_load_timeout: default_page_load_timeout(),
            element_timeout: default_element_timeout(),
            page_settle: default_page_settle(),
            wait_poll: default_wait_poll(),
        }
    }
}

/// Extraction and transcoding configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Encoding label of the extracted tables (default: "shift_jis")
    #[serde(default = "default_source_encoding")]
    pub source_encoding: String,

    /// Encoding label of the canonical tables (default: "utf-8")
    #[serde(default = "default_destination_encoding")]
    pub destination_encoding: String,

    /// Prefix canonical tables with a byte-order mark (default: true)
    #[serde(default = "default_true")]
    pub write_bom: bool,

    /// Extension of extracted tables to transcode (default: "txt")
    #[serde(default = "default_table_extension")]
    pub table_extension: String,

    /// Extension of canonical tables (default: "csv")
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            source_encoding: default_source_encoding(),
            destination_encoding: default_destination_encoding(),
            write_bom: true,
            table_extension: default_table_extension(),
            output_extension: default_output_extension(),
        }
    }
}

impl ConversionConfig {
    /// Resolve the source encoding label
    pub fn source_encoding(&self) -> Result<&'static Encoding> {
        resolve_encoding("conversion.source_encoding", &self.source_encoding)
    }

    /// Resolve the destination encoding label
    ///
    /// Rejects encodings that encoding_rs can only decode (UTF-16, replacement).
    pub fn destination_encoding(&self) -> Result<&'static Encoding> {
        let encoding =
            resolve_encoding("conversion.destination_encoding", &self.destination_encoding)?;
        if encoding.output_encoding() != encoding {
            return Err(Error::config(
                "conversion.destination_encoding",
                format!("{} cannot be written", encoding.name()),
            ));
        }
        Ok(encoding)
    }
}

fn resolve_encoding(key: &str, label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::config(key, format!("unknown encoding label {label:?}")))
}

/// How to handle a relocation target that already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Replace the existing file (default)
    #[default]
    Overwrite,
    /// Append " (1)", " (2)", etc. to the file name
    Rename,
    /// Leave the source in place
    Skip,
}

/// One catalog dataset: where it lives and how to find its archives
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name, also the output directory under `download_root`
    pub name: String,

    /// Catalog root page
    pub catalog_url: String,

    /// Years to process (None = every year listed on the root page)
    #[serde(default)]
    pub years: Option<Vec<String>>,

    /// Suffix of year labels on the root page (default: "年")
    #[serde(default = "default_year_label_suffix")]
    pub year_label_suffix: String,

    /// Filter-expansion control to click after selecting a year
    #[serde(default)]
    pub mesh_filter: Option<String>,

    /// Year-dependent category link patterns
    pub category_links: CategoryLinkTable,

    /// Site markup locators
    #[serde(default)]
    pub selectors: CatalogSelectors,
}

impl DatasetConfig {
    /// Population and households, 500 m mesh, national census
    ///
    /// Only 2020 and 2015 publish this table under a recognizable title.
    pub fn population_census_mesh() -> Self {
        let anchor = |text: &str| LinkPattern {
            class_contains: Some("stat-title-anchor".into()),
            text_contains: text.into(),
            href_contains: Vec::new(),
        };
        let mut by_year = BTreeMap::new();
        by_year.insert("2020".to_string(), anchor("人口及び世帯　（JGD2011）"));
        by_year.insert("2015".to_string(), anchor("その１　人口等基本集計に関する事項"));

        Self {
            name: "population-census-mesh".into(),
            catalog_url:
                "https://www.e-stat.go.jp/gis/statmap-search?page=1&type=1&toukeiCode=00200521"
                    .into(),
            years: Some(vec!["2020".into(), "2015".into()]),
            year_label_suffix: default_year_label_suffix(),
            mesh_filter: Some(default_mesh_filter()),
            category_links: CategoryLinkTable {
                by_year,
                fallback: None,
            },
            selectors: CatalogSelectors::default(),
        }
    }

    /// Establishments and employees by industry, economic census
    pub fn economic_census_establishments() -> Self {
        let hrefs = vec!["toukeiYear={year}".to_string(), "aggregateUnit=H".to_string()];
        let mut by_year = BTreeMap::new();
        by_year.insert(
            "2012".to_string(),
            LinkPattern {
                class_contains: None,
                text_contains: "事業所数及び従業者数".into(),
                href_contains: hrefs.clone(),
            },
        );

        Self {
            name: "economic-census-establishments".into(),
            catalog_url:
                "https://www.e-stat.go.jp/gis/statmap-search?page=1&type=1&toukeiCode=00200553"
                    .into(),
            years: None,
            year_label_suffix: default_year_label_suffix(),
            mesh_filter: Some(default_mesh_filter()),
            category_links: CategoryLinkTable {
                by_year,
                fallback: Some(LinkPattern {
                    class_contains: None,
                    text_contains: "産業（大分類）別事業所数及び従業者数".into(),
                    href_contains: hrefs,
                }),
            },
            selectors: CatalogSelectors::default(),
        }
    }

    /// Whether a year is in the allow-list
    pub fn wants_year(&self, year: &str) -> bool {
        match &self.years {
            Some(years) => years.iter().any(|y| y == year),
            None => true,
        }
    }
}

/// Year → category link lookup table
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryLinkTable {
    /// Patterns for specific years
    #[serde(default)]
    pub by_year: BTreeMap<String, LinkPattern>,

    /// Pattern for years without an entry (None = those years are unsupported)
    #[serde(default)]
    pub fallback: Option<LinkPattern>,
}

impl CategoryLinkTable {
    /// Pattern to use for a year, if the year is supported
    pub fn pattern_for(&self, year: &str) -> Option<&LinkPattern> {
        self.by_year.get(year).or(self.fallback.as_ref())
    }
}

/// Match rule for a category link; `{year}` is substituted in every field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPattern {
    /// Substring of the anchor's class attribute
    #[serde(default)]
    pub class_contains: Option<String>,

    /// Substring of the anchor's visible text
    pub text_contains: String,

    /// Substrings the anchor's href must all contain
    #[serde(default)]
    pub href_contains: Vec<String>,
}

impl LinkPattern {
    /// Build the XPath selecting matching anchors for a year
    pub fn to_xpath(&self, year: &str) -> String {
        let fill = |s: &str| xpath_literal(&s.replace("{year}", year));
        let mut predicates = Vec::new();
        if let Some(class) = &self.class_contains {
            predicates.push(format!("contains(@class, {})", fill(class)));
        }
        predicates.push(format!("contains(text(), {})", fill(&self.text_contains)));
        for href in &self.href_contains {
            predicates.push(format!("contains(@href, {})", fill(href)));
        }
        format!("//a[{}]", predicates.join(" and "))
    }
}

/// Quote a string as an XPath 1.0 literal
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// XPath locators for catalog markup
///
/// Templates contain a `{label}`, `{value}` or `{page}` placeholder.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSelectors {
    /// Every year label on the root page
    pub year_labels: String,
    /// One year label, by its text
    pub year_option: String,
    /// Structural marker of a fully loaded page
    pub page_ready: String,
    /// Filter-expansion control, by its parameter value
    pub mesh_filter: String,
    /// Container of the result rows
    pub result_list: String,
    /// Download links inside the result rows
    pub download_links: String,
    /// Last-page indicator
    pub last_page: String,
    /// Attribute of the last-page indicator holding the page count
    pub page_count_attribute: String,
    /// Page button, by page number
    pub page_button: String,
}

impl Default for CatalogSelectors {
    fn default() -> Self {
        Self {
            year_labels: "//span[contains(text(),'年')]".into(),
            year_option: "//span[contains(text(),'{label}')]".into(),
            page_ready: "//body".into(),
            mesh_filter: "//span[@data-value2='{value}']".into(),
            result_list: "//div[@class='stat-resorce_list-body']".into(),
            download_links: "//div[@class='stat-resorce_list-body']//a[contains(@class, 'stat-dl_icon') and span[contains(text(), 'CSV')]]".into(),
            last_page: "//span[@class='stat-paginate-last js-gisdownload-tabindex']".into(),
            page_count_attribute: "data-page".into(),
            page_button: "//span[@data-page='{page}']".into(),
        }
    }
}

// Default value functions
fn default_download_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_worker_divisor() -> usize {
    2
}

fn default_artifact_suffix() -> String {
    ".zip".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_watch_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_verify_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_page_load_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_element_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_page_settle() -> Duration {
    Duration::from_secs(3)
}

fn default_wait_poll() -> Duration {
    Duration::from_millis(250)
}

fn default_source_encoding() -> String {
    "shift_jis".into()
}

fn default_destination_encoding() -> String {
    "utf-8".into()
}

fn default_table_extension() -> String {
    "txt".into()
}

fn default_output_extension() -> String {
    "csv".into()
}

fn default_year_label_suffix() -> String {
    "年".into()
}

fn default_mesh_filter() -> String {
    "4次メッシュ（500mメッシュ）".into()
}

fn default_true() -> bool {
    true
}

fn default_datasets() -> Vec<DatasetConfig> {
    vec![
        DatasetConfig::population_census_mesh(),
        DatasetConfig::economic_census_establishments(),
    ]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
