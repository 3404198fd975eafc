//! Removal of conversion intermediates

use std::path::Path;
use tracing::{debug, info, warn};

/// Delete the scratch and archive directories of a converted year
///
/// Missing directories count as removed. Failures are logged, never raised.
/// Returns whether both directories are gone afterwards.
pub(crate) async fn remove_intermediates(scratch_dir: &Path, archive_dir: &Path) -> bool {
    let mut clean = true;
    for dir in [scratch_dir, archive_dir] {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!(?dir, "removed intermediate directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(?dir, error = %e, "failed to remove intermediate directory");
                clean = false;
            }
        }
    }
    if clean {
        info!(?scratch_dir, ?archive_dir, "conversion intermediates removed");
    }
    clean
}
