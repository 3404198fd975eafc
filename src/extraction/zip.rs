use crate::error::ConvertError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const COPY_CHUNK: usize = 64 * 1024;

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Detect ZIP archive files directly inside a directory, sorted
    pub fn detect_zip_files(dir: &Path) -> Result<Vec<PathBuf>, ConvertError> {
        debug!(?dir, "detecting ZIP archives");
        let archives = crate::utils::files_with_extension(dir, "zip").map_err(|e| {
            ConvertError::Io {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        debug!("found {} ZIP archive(s)", archives.len());
        Ok(archives)
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>, ConvertError> {
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(?archive_path, entry = file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path).map_err(|e| ConvertError::io(&file_path, e))?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConvertError::io(parent, e))?;
        }
        let mut outfile =
            std::fs::File::create(&file_path).map_err(|e| ConvertError::io(&file_path, e))?;

        // Stream in chunks; the declared entry size is never trusted for allocation
        let mut buffer = vec![0u8; COPY_CHUNK];
        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(outfile);
                    let _ = std::fs::remove_file(&file_path);
                    return Err(ConvertError::CorruptArchive {
                        archive: archive_path.to_path_buf(),
                        reason: format!("failed to read entry {}: {}", file.name(), e),
                    });
                }
            };
            outfile
                .write_all(&buffer[..read])
                .map_err(|e| ConvertError::io(&file_path, e))?;
        }

        Ok(Some(file_path))
    }

    /// Expand every entry of `archive_path` into `dest_path`
    ///
    /// Fails with [`ConvertError::CorruptArchive`] when the archive or one of
    /// its entries cannot be read. Entries already written stay on disk.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>, ConvertError> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path).map_err(|e| ConvertError::io(dest_path, e))?;

        let file =
            std::fs::File::open(archive_path).map_err(|e| ConvertError::io(archive_path, e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| ConvertError::CorruptArchive {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to read ZIP archive: {}", e),
        })?;

        let mut extracted_files = Vec::new();
        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| ConvertError::CorruptArchive {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to read ZIP entry {}: {}", i, e),
                })?;

            if let Some(file_path) = Self::extract_zip_entry(file, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}
