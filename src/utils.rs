//! Utility functions for file operations and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Resolve where a file should land, honoring the collision action
///
/// Returns `None` when the target exists and the action is
/// [`FileCollisionAction::Skip`]. For `Rename`, appends " (1)", " (2)", etc.
///
/// # Examples
///
/// ```
/// use estat_harvest::utils::resolve_destination;
/// use estat_harvest::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/nonexistent/dir/tbl.zip");
/// let target = resolve_destination(path, FileCollisionAction::Rename).unwrap();
/// assert_eq!(target.as_deref(), Some(path));
/// ```
pub fn resolve_destination(path: &Path, action: FileCollisionAction) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(Some(path.to_path_buf()));
    }

    match action {
        FileCollisionAction::Overwrite => Ok(Some(path.to_path_buf())),
        FileCollisionAction::Skip => Ok(None),
        FileCollisionAction::Rename => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::Other(format!("cannot extract file stem of {}", path.display())))?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let candidate = parent.join(new_name);
                if !candidate.exists() {
                    return Ok(Some(candidate));
                }
            }

            Err(Error::Other(format!(
                "could not find a unique name for {} after {} attempts",
                path.display(),
                MAX_RENAME_ATTEMPTS
            )))
        }
    }
}

/// Move a file, falling back to copy + delete across file systems
pub async fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(source, dest).await?;
            tokio::fs::remove_file(source).await
        }
        Err(e) => Err(e),
    }
}

/// Whether `path` has `extension` (case-insensitive, without the dot)
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

/// Regular files directly inside `dir` with the given extension, sorted
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
