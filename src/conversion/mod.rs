//! Conversion of downloaded archives into canonical tables
//!
//! For one year directory: every archive in `zip/` is extracted into its own
//! subdirectory of `txt_origin/`, each extracted table is transcoded into
//! `csv/`, and once every archive has finished (successfully or not) the
//! `txt_origin/` and `zip/` directories are deleted.
//!
//! Archives are processed under a bounded pool; extraction and transcoding
//! run on the blocking thread pool.

mod cleanup;


use crate::config::{Config, ConversionConfig};
use crate::error::{ConvertError, Error, Result};
use crate::extraction::{self, ZipExtractor};
use crate::transcode::Transcoder;
use crate::types::{ArchiveOutcome, YearConversionReport, YearDirectory};
use crate::utils::has_extension;
use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Settings shared by every archive job of a year
#[derive(Clone, Debug)]
struct ArchiveJob {
    scratch_dir: PathBuf,
    output_dir: PathBuf,
    transcoder: Transcoder,
    table_extension: String,
    output_extension: String,
}

impl ArchiveJob {
    /// Extract one archive and transcode the tables it contained
    fn run(&self, archive: &Path) -> ArchiveOutcome {
        let mut outcome = ArchiveOutcome {
            archive: archive.to_path_buf(),
            tables: Vec::new(),
            failures: Vec::new(),
        };

        // Per-archive subdirectory so same-named entries never collide
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let extracted = match extraction::extract(archive, &self.scratch_dir.join(stem)) {
            Ok(files) => files,
            Err(e) => {
                warn!(?archive, error = %e, "extraction failed");
                outcome.failures.push(e);
                return outcome;
            }
        };

        for file in extracted {
            if !has_extension(&file, &self.table_extension) {
                debug!(?file, "not a table, leaving in scratch");
                continue;
            }
            let Some(name) = file.file_stem() else {
                continue;
            };
            let mut target = self.output_dir.join(name);
            target.set_extension(&self.output_extension);

            match self.transcoder.transcode(&file, &target) {
                Ok(written) => outcome.tables.push(written),
                Err(e) => {
                    warn!(?archive, ?file, error = %e, "transcoding failed");
                    outcome.failures.push(e);
                }
            }
        }

        debug!(
            ?archive,
            tables = outcome.tables.len(),
            failures = outcome.failures.len(),
            "archive converted"
        );
        outcome
    }
}

/// Convert every archive of one year directory, then remove the intermediates
///
/// Per-archive and per-table failures are collected in the report and never
/// stop the batch. Fails only on an invalid encoding configuration or when
/// the archive directory cannot be listed; a year without `zip/` converts
/// nothing and deletes nothing.
pub async fn convert_year(
    year_dir: &Path,
    config: &ConversionConfig,
    workers: usize,
) -> Result<YearConversionReport> {
    let year = YearDirectory::from_path(year_dir);
    let transcoder = Transcoder::new(
        config.source_encoding()?,
        config.destination_encoding()?,
        config.write_bom,
    );
    let mut report = YearConversionReport {
        year: year.year().to_string(),
        archives: Vec::new(),
        cleaned: false,
    };

    let archive_dir = year.archive_dir();
    if !tokio::fs::try_exists(&archive_dir).await? {
        info!(year = year.year(), ?archive_dir, "no archive directory, nothing to convert");
        return Ok(report);
    }

    let archives = ZipExtractor::detect_zip_files(&archive_dir)?;
    let job = ArchiveJob {
        scratch_dir: year.scratch_dir(),
        output_dir: year.output_dir(),
        transcoder,
        table_extension: config.table_extension.clone(),
        output_extension: config.output_extension.clone(),
    };
    tokio::fs::create_dir_all(&job.output_dir).await?;

    let workers = workers.max(1);
    info!(
        year = year.year(),
        archives = archives.len(),
        workers,
        "converting year"
    );

    report.archives = stream::iter(archives)
        .map(|archive| {
            let job = job.clone();
            async move {
                let path = archive.clone();
                match tokio::task::spawn_blocking(move || job.run(&archive)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(archive = ?path, error = %e, "conversion task panicked");
                        ArchiveOutcome {
                            failures: vec![ConvertError::Io {
                                path: path.clone(),
                                reason: format!("conversion task failed: {e}"),
                            }],
                            archive: path,
                            tables: Vec::new(),
                        }
                    }
                }
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    // Every job has finished; only now is deleting the inputs safe
    report.cleaned = cleanup::remove_intermediates(&year.scratch_dir(), &archive_dir).await;

    info!(
        year = year.year(),
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        cleaned = report.cleaned,
        "year converted"
    );
    Ok(report)
}

/// Convert every year directory of a dataset that has downloaded archives
///
/// Years are converted one after another, in ascending name order.
pub async fn convert_dataset(
    dataset_dir: &Path,
    config: &Config,
) -> Result<Vec<YearConversionReport>> {
    let mut years = Vec::new();
    let mut reader = match tokio::fs::read_dir(dataset_dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::Other(format!(
                "dataset directory {} does not exist",
                dataset_dir.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir()
            && tokio::fs::try_exists(YearDirectory::from_path(&path).archive_dir()).await?
        {
            years.push(path);
        }
    }
    years.sort();

    info!(?dataset_dir, years = years.len(), "converting dataset");

    let workers = config.worker_count();
    let mut reports = Vec::with_capacity(years.len());
    for year_dir in years {
        reports.push(convert_year(&year_dir, &config.conversion, workers).await?);
    }
    Ok(reports)
}
