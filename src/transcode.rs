//! Re-encoding of extracted tables into the canonical encoding
//!
//! Tables ship in a legacy Japanese encoding. Transcoding decodes strictly
//! (any malformed sequence fails the file), re-encodes strictly (any character
//! the destination cannot hold fails the file), and optionally prefixes a
//! UTF-8 byte-order mark. Line endings, delimiters and every other byte of
//! content pass through untouched.

use crate::error::ConvertError;
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::debug;

/// UTF-8 byte-order mark
pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Encodings and marker used for one conversion run
#[derive(Clone, Copy, Debug)]
pub struct Transcoder {
    source: &'static Encoding,
    destination: &'static Encoding,
    write_bom: bool,
}

impl Transcoder {
    /// Transcoder from `source` to `destination`
    ///
    /// The byte-order mark is only ever written for a UTF-8 destination.
    pub fn new(source: &'static Encoding, destination: &'static Encoding, write_bom: bool) -> Self {
        Self {
            source,
            destination,
            write_bom: write_bom && destination == UTF_8,
        }
    }

    /// Re-encode an in-memory table; `file` only labels errors
    pub fn transcode_bytes(&self, bytes: &[u8], file: &Path) -> Result<Vec<u8>, ConvertError> {
        let text: Cow<'_, str> = self
            .source
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or_else(|| ConvertError::Decode {
                file: file.to_path_buf(),
                encoding: self.source.name().to_string(),
            })?;

        let mut out = Vec::with_capacity(text.len() + UTF8_BOM.len());
        if self.write_bom {
            out.extend_from_slice(UTF8_BOM);
        }

        if self.destination == UTF_8 {
            out.extend_from_slice(text.as_bytes());
        } else {
            let (encoded, _, had_unmappable) = self.destination.encode(&text);
            if had_unmappable {
                return Err(ConvertError::Unmappable {
                    file: file.to_path_buf(),
                    encoding: self.destination.name().to_string(),
                });
            }
            out.extend_from_slice(&encoded);
        }
        Ok(out)
    }

    /// Read `source_path`, re-encode it and write `destination_path`
    pub fn transcode(
        &self,
        source_path: &Path,
        destination_path: &Path,
    ) -> Result<PathBuf, ConvertError> {
        let bytes = std::fs::read(source_path).map_err(|e| ConvertError::io(source_path, e))?;
        let converted = self.transcode_bytes(&bytes, source_path)?;

        if let Some(parent) = destination_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConvertError::io(parent, e))?;
        }
        std::fs::write(destination_path, &converted)
            .map_err(|e| ConvertError::io(destination_path, e))?;

        debug!(
            source = ?source_path,
            destination = ?destination_path,
            bytes_in = bytes.len(),
            bytes_out = converted.len(),
            "transcoded table"
        );
        Ok(destination_path.to_path_buf())
    }
}

/// Transcode one file with the given encodings
pub fn transcode(
    source_path: &Path,
    destination_path: &Path,
    source: &'static Encoding,
    destination: &'static Encoding,
    write_bom: bool,
) -> Result<PathBuf, ConvertError> {
    Transcoder::new(source, destination, write_bom).transcode(source_path, destination_path)
}
