//! The run's staging directory
//!
//! The browser drops every download here. Completion is detected by diffing
//! listings, so the directory is recreated empty at run start and drained
//! into year directories after every batch.

use crate::config::FileCollisionAction;
use crate::error::Result;
use crate::types::RelocationReport;
use crate::utils::{move_file, resolve_destination};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Exclusively owned scratch directory receiving browser downloads
#[derive(Debug)]
pub struct StagingDirectory {
    path: PathBuf,
}

impl StagingDirectory {
    /// Delete whatever is at `path` and create it empty
    pub async fn recreate(path: &Path) -> Result<Self> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => debug!(?path, "removed stale staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the regular files currently staged, sorted
    pub async fn files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut reader = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Move every staged file into `dest`
    pub async fn relocate_all(
        &self,
        dest: &Path,
        collision: FileCollisionAction,
    ) -> Result<RelocationReport> {
        self.relocate_matching(dest, |_| true, collision).await
    }

    /// Move staged files whose name satisfies `predicate` into `dest`
    ///
    /// A file that cannot be moved is logged, reported and left in place; it
    /// never fails the whole relocation. Only listing the staging directory or
    /// creating `dest` can fail the call. Running it again on a drained
    /// directory is a no-op.
    pub async fn relocate_matching<F>(
        &self,
        dest: &Path,
        predicate: F,
        collision: FileCollisionAction,
    ) -> Result<RelocationReport>
    where
        F: Fn(&str) -> bool,
    {
        let mut report = RelocationReport::default();
        let names: Vec<String> = self
            .files()
            .await?
            .into_iter()
            .filter(|name| predicate(name))
            .collect();
        if names.is_empty() {
            return Ok(report);
        }

        tokio::fs::create_dir_all(dest).await?;

        for name in names {
            let source = self.path.join(&name);
            let target = match resolve_destination(&dest.join(&name), collision) {
                Ok(Some(target)) => target,
                Ok(None) => {
                    debug!(file = %name, ?dest, "destination exists, leaving staged file");
                    report.skipped.push(name);
                    continue;
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "could not pick a destination");
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            };

            match move_file(&source, &target).await {
                Ok(()) => {
                    debug!(file = %name, ?target, "relocated staged file");
                    report.moved.push(name);
                }
                Err(e) => {
                    warn!(file = %name, ?target, error = %e, "failed to relocate staged file");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// End of run: remove the directory if nothing is left in it
    ///
    /// Leftover entries are kept for inspection; the next run recreates the
    /// directory empty anyway. Returns whether the directory was removed.
    pub async fn finish(self) -> Result<bool> {
        let mut reader = tokio::fs::read_dir(&self.path).await?;
        let mut leftovers = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            leftovers.push(entry.file_name().to_string_lossy().into_owned());
        }

        if leftovers.is_empty() {
            tokio::fs::remove_dir(&self.path).await?;
            info!(path = ?self.path, "staging directory cleared");
            Ok(true)
        } else {
            leftovers.sort();
            warn!(
                path = ?self.path,
                count = leftovers.len(),
                ?leftovers,
                "staging directory not empty at end of run, keeping it"
            );
            Ok(false)
        }
    }
}
