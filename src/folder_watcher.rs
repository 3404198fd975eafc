//! Polling detection of newly appeared files
//!
//! Browser-managed downloads give no completion event we can subscribe to,
//! so completion is observed by listing the staging directory against a
//! snapshot taken before the download was triggered.
//!
//! # Example
//!
//! ```no_run
//! use estat_harvest::folder_watcher::await_new_matching_file;
//! use std::path::Path;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> estat_harvest::Result<()> {
//! let new_files = await_new_matching_file(
//!     Path::new("tmp"),
//!     |name| name.ends_with(".zip"),
//!     Duration::from_secs(120),
//!     Duration::from_millis(500),
//!     &CancellationToken::new(),
//! )
//! .await?;
//! println!("downloaded: {:?}", new_files);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Entry names of a directory at one point in time
#[derive(Clone, Debug)]
pub struct DirectorySnapshot {
    dir: PathBuf,
    entries: HashSet<String>,
}

impl DirectorySnapshot {
    /// List `dir` and remember its entry names
    pub async fn capture(dir: &Path) -> Result<Self> {
        let entries = list_entries(dir).await?;
        trace!(?dir, count = entries.len(), "captured directory snapshot");
        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    /// Entries present now that were not in the snapshot
    pub async fn new_entries(&self) -> Result<BTreeSet<String>> {
        let current = list_entries(&self.dir).await?;
        Ok(current
            .into_iter()
            .filter(|name| !self.entries.contains(name))
            .collect())
    }

    /// Poll until at least one new entry satisfies `predicate`
    ///
    /// Returns every entry that appeared since the snapshot (qualifying or
    /// not). Fails with [`Error::Timeout`] if nothing qualifying appears
    /// within `timeout`, or [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_for_new<F>(
        &self,
        predicate: F,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>>
    where
        F: Fn(&str) -> bool,
    {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let new_entries = self.new_entries().await?;
            if new_entries.iter().any(|name| predicate(name)) {
                debug!(
                    dir = ?self.dir,
                    elapsed_ms = started.elapsed().as_millis(),
                    ?new_entries,
                    "qualifying file appeared"
                );
                return Ok(new_entries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    dir: self.dir.clone(),
                    waited: timeout,
                });
            }

            let nap = poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

/// Snapshot `directory`, then wait for a new entry satisfying `predicate`
///
/// Convenience wrapper over [`DirectorySnapshot::capture`] and
/// [`DirectorySnapshot::wait_for_new`] for callers whose side effect starts
/// after the call.
pub async fn await_new_matching_file<F>(
    directory: &Path,
    predicate: F,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<BTreeSet<String>>
where
    F: Fn(&str) -> bool,
{
    DirectorySnapshot::capture(directory)
        .await?
        .wait_for_new(predicate, timeout, poll_interval, cancel)
        .await
}

async fn list_entries(dir: &Path) -> Result<HashSet<String>> {
    let mut entries = HashSet::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        entries.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(entries)
}
