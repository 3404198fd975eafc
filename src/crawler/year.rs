//! One year's traversal as an explicit state machine

use super::Crawler;
use crate::downloader::{ClaimSet, DownloadContext, download_all};
use crate::error::Error;
use crate::types::{CatalogYear, YearDirectory, YearReport, YearStatus};
use tracing::{debug, error, info, warn};

/// Position in a year's traversal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YearState {
    /// Click the year label and wait for the page
    SelectYear,
    /// Expand the mesh filter (non-fatal)
    ExpandMeshFilter,
    /// Follow the year's category link to the listing
    ResolveCategoryLink,
    /// Download page `page` of `total`
    Paginate {
        /// Current page (1-based)
        page: u32,
        /// Total pages
        total: u32,
    },
    /// Move everything staged into `{year}/zip`
    RelocateFiles,
    /// Navigate back to the catalog root
    ReturnToRoot,
    /// Traversal finished
    Done,
}

impl Crawler<'_> {
    /// Traverse one year; never fails, the outcome is in the report
    pub(crate) async fn crawl_year(&self, year: &CatalogYear) -> YearReport {
        let mut report = YearReport::new(&year.year);
        let year_dir = YearDirectory::new(&self.dataset_dir, &year.year);
        let mut state = YearState::SelectYear;

        info!(year = %year.year, "crawling year");

        while state != YearState::Done {
            debug!(year = %year.year, ?state, "year state");
            state = match state {
                YearState::SelectYear => match self.select_year(year).await {
                    Ok(()) => YearState::ExpandMeshFilter,
                    Err(e) => abort(&mut report, e),
                },
                YearState::ExpandMeshFilter => {
                    self.expand_mesh_filter(year).await;
                    YearState::ResolveCategoryLink
                }
                YearState::ResolveCategoryLink => match self.open_category(year).await {
                    Ok(()) => {
                        let total = self.read_total_pages().await;
                        report.total_pages = total;
                        info!(year = %year.year, total_pages = total, "opened result listing");
                        YearState::Paginate { page: 1, total }
                    }
                    Err(e) => abort(&mut report, e),
                },
                YearState::Paginate { page, total } => {
                    self.visit_page(page, &year_dir, &mut report).await;
                    if self.cancel.is_cancelled() {
                        warn!(year = %year.year, page, "interrupted, stopping pagination");
                        report.status = YearStatus::Interrupted;
                        YearState::RelocateFiles
                    } else if page < total {
                        YearState::Paginate {
                            page: page + 1,
                            total,
                        }
                    } else {
                        YearState::RelocateFiles
                    }
                }
                YearState::RelocateFiles => {
                    match self
                        .staging
                        .relocate_all(&year_dir.archive_dir(), self.config.file_collision)
                        .await
                    {
                        Ok(moved) => report.relocation.merge(moved),
                        Err(e) => error!(year = %year.year, error = %e, "relocation failed"),
                    }
                    YearState::ReturnToRoot
                }
                YearState::ReturnToRoot => {
                    if let Err(e) = self.open_root().await {
                        error!(year = %year.year, error = %e, "failed to return to catalog root");
                    }
                    YearState::Done
                }
                YearState::Done => YearState::Done,
            };
        }

        info!(
            year = %year.year,
            status = ?report.status,
            pages = report.pages_visited.len(),
            skipped_pages = report.pages_skipped.len(),
            downloads = report.downloads.len(),
            failed_downloads = report.failed_downloads(),
            relocated = report.relocation.moved.len(),
            "year finished"
        );
        report
    }

    /// Open one result page, download its links and drain the staging directory
    ///
    /// A page that cannot be opened is recorded as skipped.
    async fn visit_page(&self, page: u32, year_dir: &YearDirectory, report: &mut YearReport) {
        let year = year_dir.year();

        if page > 1
            && let Err(e) = self.open_page(page).await
        {
            warn!(year, page, error = %e, "page did not respond, skipping");
            report.pages_skipped.push(page);
            return;
        }

        let links = match self.collect_links(page).await {
            Ok(links) => links,
            Err(e) => {
                warn!(year, page, error = %e, "result listing did not load, skipping");
                report.pages_skipped.push(page);
                return;
            }
        };
        debug!(year, page, links = links.len(), "collected download links");

        let claims = ClaimSet::new();
        let ctx = DownloadContext {
            session: self.session,
            staging: self.staging.path(),
            config: &self.config.download,
            claims: &claims,
            cancel: self.cancel,
        };
        let batch = download_all(ctx, links, self.workers).await;
        report.downloads.extend(batch.outcomes);
        report.unattributed.extend(batch.unattributed);
        report.pages_visited.push(page);

        // The next batch diffs against this directory, so it must start drained
        let download = &self.config.download;
        match self
            .staging
            .relocate_matching(
                &year_dir.archive_dir(),
                |name| download.is_artifact(name),
                self.config.file_collision,
            )
            .await
        {
            Ok(moved) => report.relocation.merge(moved),
            Err(e) => warn!(year, page, error = %e, "failed to drain staging directory"),
        }
    }
}

fn abort(report: &mut YearReport, e: Error) -> YearState {
    error!(year = %report.year, error = %e, "aborting year");
    report.status = YearStatus::Aborted {
        reason: e.to_string(),
    };
    YearState::RelocateFiles
}
