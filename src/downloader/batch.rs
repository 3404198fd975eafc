//! Bounded fan-out of one page's download links

use super::task::{DownloadContext, attempt_download};
use crate::folder_watcher::DirectorySnapshot;
use crate::types::{AttemptFailure, BatchReport, DownloadLink, DownloadOutcome, DownloadStatus};
use futures::{FutureExt, StreamExt, stream};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Download every link with at most `workers` tasks in flight
///
/// Outcomes are collected in completion order. A panicking task is recorded
/// as [`AttemptFailure::Panicked`] and never affects its siblings; the batch
/// always runs every submitted link to completion.
///
/// Before returning, the batch waits for downloads whose attempts timed out
/// (`settle_stragglers`), so nothing of this batch lands in the staging
/// directory while the next one is watching it.
pub async fn download_all(
    ctx: DownloadContext<'_>,
    links: Vec<DownloadLink>,
    workers: usize,
) -> BatchReport {
    let total = links.len();
    let workers = workers.max(1);
    info!(links = total, workers, "starting download batch");

    let baseline = match DirectorySnapshot::capture(ctx.staging).await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(staging = ?ctx.staging, error = %e, "could not snapshot staging directory");
            None
        }
    };

    let outcomes: Vec<DownloadOutcome> = stream::iter(links)
        .map(|link| async move {
            let attempts = AtomicU32::new(0);
            match AssertUnwindSafe(attempt_download(ctx, &link, &attempts))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(
                        page = link.page,
                        link_index = link.index,
                        "download task panicked"
                    );
                    DownloadOutcome {
                        link_index: link.index,
                        page: link.page,
                        attempts: attempts.load(Ordering::Relaxed).max(1),
                        timed_out: 0,
                        status: DownloadStatus::ExhaustedRetries {
                            last: AttemptFailure::Panicked,
                        },
                    }
                }
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut report = BatchReport {
        outcomes,
        unattributed: Vec::new(),
    };
    if let Some(baseline) = &baseline {
        settle_stragglers(ctx, baseline, &mut report).await;
    }

    info!(
        links = total,
        succeeded = report.succeeded(),
        failed = total - report.succeeded(),
        unattributed = report.unattributed.len(),
        "download batch finished"
    );
    report
}

/// Wait for the downloads of timed-out attempts to land
///
/// Every timed-out click may still complete. Waits up to the watcher timeout
/// until one new, unclaimed artifact per timed-out click has appeared since
/// `baseline`. Arrivals go, in link order, to links that exhausted their
/// retries on a timeout and become [`DownloadStatus::LateArrival`]; the rest
/// are listed in [`BatchReport::unattributed`].
async fn settle_stragglers(
    ctx: DownloadContext<'_>,
    baseline: &DirectorySnapshot,
    report: &mut BatchReport,
) {
    let expected: u32 = report.outcomes.iter().map(|o| o.timed_out).sum();
    if expected == 0 || ctx.cancel.is_cancelled() {
        return;
    }

    let mut waiting: Vec<usize> = report
        .outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| {
            o.status
                == DownloadStatus::ExhaustedRetries {
                    last: AttemptFailure::Timeout,
                }
        })
        .map(|(i, _)| i)
        .collect();
    waiting.sort_by_key(|&i| report.outcomes[i].link_index);
    let mut waiting = waiting.into_iter();

    let watcher = &ctx.config.watcher;
    let deadline = Instant::now() + watcher.timeout;
    let mut arrived = 0u32;
    info!(expected, "waiting for late downloads");

    loop {
        let new_entries = match baseline.new_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list staging directory");
                return;
            }
        };
        for name in new_entries {
            if !ctx.config.is_artifact(&name) || !ctx.claims.claim(&name) {
                continue;
            }
            arrived += 1;
            match waiting.next() {
                Some(i) => {
                    let outcome = &mut report.outcomes[i];
                    info!(
                        page = outcome.page,
                        link_index = outcome.link_index,
                        file = %name,
                        "late download attributed"
                    );
                    outcome.status = DownloadStatus::LateArrival { file: name };
                }
                None => {
                    debug!(file = %name, "late download with no failed link left");
                    report.unattributed.push(name);
                }
            }
        }

        if arrived >= expected {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(expected, arrived, "gave up waiting for late downloads");
            return;
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = tokio::time::sleep(watcher.poll_interval.min(deadline - now)) => {}
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::test_helpers::{ClickAction, FakeCatalog};
    use crate::browser::{ElementRef, Locator};
    use crate::config::{CatalogSelectors, DownloadConfig, RetryConfig, WatcherConfig};
    use crate::downloader::ClaimSet;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn config() -> DownloadConfig {
        DownloadConfig {
            retry: RetryConfig {
                max_retries: 1,
                backoff: Duration::from_millis(10),
                ..Default::default()
            },
            watcher: WatcherConfig {
                timeout: Duration::from_millis(300),
                poll_interval: Duration::from_millis(20),
                verify_delay: Duration::from_millis(20),
            },
            ..Default::default()
        }
    }

    fn links(count: usize) -> Vec<DownloadLink> {
        let locator = Locator::xpath(CatalogSelectors::default().download_links);
        (1..=count)
            .map(|index| DownloadLink {
                index,
                page: 1,
                element: ElementRef::new(locator.clone(), index - 1),
            })
            .collect()
    }

    async fn run(catalog: &FakeCatalog, staging: &Path, count: usize, workers: usize) -> BatchReport {
        run_with(catalog, staging, count, workers, &config()).await
    }

    async fn run_with(
        catalog: &FakeCatalog,
        staging: &Path,
        count: usize,
        workers: usize,
        config: &DownloadConfig,
    ) -> BatchReport {
        let claims = ClaimSet::new();
        let cancel = CancellationToken::new();
        let ctx = DownloadContext {
            session: catalog,
            staging,
            config,
            claims: &claims,
            cancel: &cancel,
        };
        download_all(ctx, links(count), workers).await
    }

    #[tokio::test]
    async fn test_all_links_downloaded() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 5);

        let report = run(&catalog, dir.path(), 5, 2).await;

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 5);
        let mut files: Vec<&str> = report.outcomes.iter().filter_map(|o| o.file_name()).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), 5);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 3)
        .with_download_script(|ctx| match ctx.index {
            2 => ClickAction::Ignore,
            _ => ClickAction::Deliver {
                file: format!("link{}.zip", ctx.index),
                after: Duration::from_millis(10),
            },
        });

        // One worker so no sibling can claim another link's file
        let report = run(&catalog, dir.path(), 3, 1).await;
        let by_index = report.by_index();

        assert_eq!(by_index.get(&1), Some(&true));
        assert_eq!(by_index.get(&2), Some(&false));
        assert_eq!(by_index.get(&3), Some(&true));
        assert_eq!(catalog.download_clicks("2020", 1, 2), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 3)
        .with_download_script(|ctx| match ctx.index {
            1 => ClickAction::Panic,
            _ => ClickAction::Deliver {
                file: format!("link{}.zip", ctx.index),
                after: Duration::from_millis(10),
            },
        });

        let report = run(&catalog, dir.path(), 3, 2).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        let panicked = report.failures().next().unwrap();
        assert_eq!(panicked.link_index, 1);
        assert_eq!(
            panicked.status,
            DownloadStatus::ExhaustedRetries {
                last: AttemptFailure::Panicked
            }
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 0);

        let report = run(&catalog, dir.path(), 0, 0).await;
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_late_download_is_attributed_to_its_timed_out_link() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 2)
        .with_download_script(|ctx| match ctx.index {
            1 => ClickAction::Deliver {
                file: "slow.zip".into(),
                after: Duration::from_millis(450),
            },
            _ => ClickAction::Deliver {
                file: "fast.zip".into(),
                after: Duration::from_millis(10),
            },
        });
        let mut config = config();
        config.retry.max_retries = 0;

        // One worker so the fast link cannot pick up the slow link's file
        let report = run_with(&catalog, dir.path(), 2, 1, &config).await;

        let slow = report.outcomes.iter().find(|o| o.link_index == 1).unwrap();
        assert_eq!(slow.timed_out, 1);
        assert_eq!(
            slow.status,
            DownloadStatus::LateArrival {
                file: "slow.zip".into()
            }
        );
        let fast = report.outcomes.iter().find(|o| o.link_index == 2).unwrap();
        assert_eq!(fast.file_name(), Some("fast.zip"));
        assert!(report.unattributed.is_empty());
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_late_duplicate_of_retried_link_is_unattributed() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 1)
        .with_download_script(|ctx| match ctx.attempt {
            1 => ClickAction::Deliver {
                file: "first.zip".into(),
                after: Duration::from_millis(450),
            },
            _ => ClickAction::Deliver {
                file: "second.zip".into(),
                after: Duration::from_millis(10),
            },
        });

        let report = run(&catalog, dir.path(), 1, 1).await;

        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(report.outcomes[0].file_name(), Some("second.zip"));
        assert_eq!(report.unattributed, vec!["first.zip"]);
    }

    #[tokio::test]
    async fn test_batch_without_timeouts_does_not_wait() {
        let dir = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(
            "https://catalog.test/",
            CatalogSelectors::default(),
            dir.path().to_path_buf(),
        )
        .on_listing("2020", 2)
        .with_download_script(|ctx| match ctx.index {
            1 => ClickAction::Fail("detached".into()),
            _ => ClickAction::Deliver {
                file: "ok.zip".into(),
                after: Duration::from_millis(10),
            },
        });

        let started = std::time::Instant::now();
        let report = run(&catalog, dir.path(), 2, 2).await;

        assert_eq!(report.succeeded(), 1);
        // Well under one watcher timeout: nothing timed out, so nothing to settle
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
