//! Archive extraction
//!
//! Catalog downloads are plain ZIP archives holding one or more fixed-layout
//! text tables. Extraction is synchronous; callers run it on the blocking
//! pool.

mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests;

pub use zip::ZipExtractor;

use crate::error::ConvertError;
use std::path::{Path, PathBuf};

/// Expand all entries of one archive into `destination_dir`
///
/// Returns the files written, in archive order.
///
/// # Example
/// ```no_run
/// use estat_harvest::extraction::extract;
/// use std::path::Path;
///
/// let tables = extract(
///     Path::new("downloads/population-census-mesh/2020/zip/tblT001100S5339.zip"),
///     Path::new("downloads/population-census-mesh/2020/txt_origin"),
/// )?;
/// println!("extracted {} tables", tables.len());
/// # Ok::<(), estat_harvest::error::ConvertError>(())
/// ```
pub fn extract(archive_path: &Path, destination_dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
    ZipExtractor::extract(archive_path, destination_dir)
}
