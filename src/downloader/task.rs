//! A single link's download, retried until an artifact is confirmed on disk

use crate::browser::BrowserSession;
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::folder_watcher::DirectorySnapshot;
use crate::retry::with_retry;
use crate::types::{AttemptFailure, DownloadLink, DownloadOutcome, DownloadStatus};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Files already attributed to a task of the current batch
///
/// Concurrent tasks watch the same directory, so a file one task reports as
/// its download must not be picked up by another.
#[derive(Debug, Default)]
pub struct ClaimSet {
    claimed: Mutex<HashSet<String>>,
}

impl ClaimSet {
    /// Empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.claimed.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim `name`; false if someone already holds it
    pub fn claim(&self, name: &str) -> bool {
        self.lock().insert(name.to_string())
    }

    /// Give up a claim
    pub fn release(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Whether `name` is claimed
    pub fn is_claimed(&self, name: &str) -> bool {
        self.lock().contains(name)
    }
}

/// Everything a download task needs besides its link
#[derive(Clone, Copy)]
pub struct DownloadContext<'a> {
    /// Session whose page holds the links
    pub session: &'a dyn BrowserSession,
    /// Directory downloads land in
    pub staging: &'a Path,
    /// Suffix, retry and watcher settings
    pub config: &'a DownloadConfig,
    /// Files claimed by tasks of the same batch
    pub claims: &'a ClaimSet,
    /// Run-wide interruption signal
    pub cancel: &'a CancellationToken,
}

impl DownloadContext<'_> {
    fn is_candidate(&self, name: &str) -> bool {
        self.config.is_artifact(name) && !self.claims.is_claimed(name)
    }
}

/// Download one link, retrying per the configured policy
///
/// Never fails: exhausting every attempt yields
/// [`DownloadStatus::ExhaustedRetries`] carrying the last failure.
/// `attempts` is updated as attempts start so a caller can still report a
/// count if this future panics.
pub async fn attempt_download(
    ctx: DownloadContext<'_>,
    link: &DownloadLink,
    attempts: &AtomicU32,
) -> DownloadOutcome {
    let timed_out = AtomicU32::new(0);
    let result = with_retry(&ctx.config.retry, |attempt| {
        attempts.store(attempt, Ordering::Relaxed);
        let timed_out = &timed_out;
        async move {
            let result = single_attempt(ctx, link, attempt).await;
            if matches!(result, Err(Error::Timeout { .. })) {
                timed_out.fetch_add(1, Ordering::Relaxed);
            }
            result
        }
    })
    .await;

    let (status, attempts) = match result {
        Ok((file, attempts)) => {
            info!(
                page = link.page,
                link_index = link.index,
                file = %file,
                attempts,
                "download complete"
            );
            (DownloadStatus::Success { file }, attempts)
        }
        Err((e, attempts)) => {
            warn!(
                page = link.page,
                link_index = link.index,
                attempts,
                error = %e,
                "download failed"
            );
            (
                DownloadStatus::ExhaustedRetries {
                    last: classify(e),
                },
                attempts,
            )
        }
    };

    DownloadOutcome {
        link_index: link.index,
        page: link.page,
        attempts,
        timed_out: timed_out.into_inner(),
        status,
    }
}

/// Snapshot, click, wait for a new artifact, then confirm it is still there
async fn single_attempt(ctx: DownloadContext<'_>, link: &DownloadLink, attempt: u32) -> Result<String> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let snapshot = DirectorySnapshot::capture(ctx.staging).await?;
    debug!(page = link.page, link_index = link.index, attempt, "triggering download");
    ctx.session.click(&link.element).await?;

    let watcher = &ctx.config.watcher;
    let deadline = Instant::now() + watcher.timeout;
    let file = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let appeared = snapshot
            .wait_for_new(
                |name| ctx.is_candidate(name),
                remaining,
                watcher.poll_interval,
                ctx.cancel,
            )
            .await?;
        // Another task may have claimed the candidate since the last poll
        if let Some(file) = appeared
            .into_iter()
            .find(|name| ctx.is_candidate(name) && ctx.claims.claim(name))
        {
            break file;
        }
    };

    // External scanners may quarantine a fresh download
    tokio::time::sleep(watcher.verify_delay).await;
    if !tokio::fs::try_exists(ctx.staging.join(&file)).await? {
        ctx.claims.release(&file);
        return Err(Error::VanishedArtifact { file });
    }

    Ok(file)
}

fn classify(error: Error) -> AttemptFailure {
    match error {
        Error::Timeout { .. } => AttemptFailure::Timeout,
        Error::VanishedArtifact { file } => AttemptFailure::Vanished { file },
        Error::Cancelled => AttemptFailure::Cancelled,
        other => AttemptFailure::TriggerFailed {
            reason: other.to_string(),
        },
    }
}
