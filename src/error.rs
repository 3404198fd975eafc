//! Error types for estat-harvest
//!
//! This module provides the error taxonomy shared by both pipeline halves:
//! - Crawl-side errors (watcher timeouts, vanished artifacts, navigation failures)
//! - Conversion-side per-unit errors (corrupt archives, undecodable text)
//! - Stable machine-readable codes for the JSON run report

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for estat-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for estat-harvest
///
/// Each variant carries enough context (directory, file, step) to allow a
/// manual re-run of just the failed unit.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "worker_divisor")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No qualifying file appeared in the watched directory in time
    #[error("no qualifying file appeared in {} within {:?}", dir.display(), waited)]
    Timeout {
        /// The directory that was being watched
        dir: PathBuf,
        /// How long the watcher waited
        waited: Duration,
    },

    /// A file appeared and then disappeared before it could be confirmed
    #[error("artifact {file} vanished after it appeared")]
    VanishedArtifact {
        /// Name of the file that vanished
        file: String,
    },

    /// A UI step could not be completed
    #[error("navigation failed during {step}: {reason}")]
    Navigation {
        /// The step that failed (e.g., "select year 2020")
        step: String,
        /// The reason the step failed
        reason: String,
    },

    /// The browser automation backend reported an error
    #[error("browser error: {0}")]
    Browser(String),

    /// Extraction or transcoding error
    #[error("conversion error: {0}")]
    Conversion(#[from] ConvertError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was interrupted by a shutdown request
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Navigation`] error
    pub fn navigation(step: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Navigation {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a [`Error::Config`] error bound to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code used in run reports
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Timeout { .. } => "timeout",
            Error::VanishedArtifact { .. } => "vanished_artifact",
            Error::Navigation { .. } => "navigation_failure",
            Error::Browser(_) => "browser_error",
            Error::Conversion(e) => e.error_code(),
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Per-unit conversion failures
///
/// These are cloneable so they can be stored in reports; I/O causes are
/// flattened to their message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvertError {
    /// The archive could not be opened or parsed
    #[error("corrupt archive {}: {reason}", archive.display())]
    CorruptArchive {
        /// The archive that failed to open
        archive: PathBuf,
        /// The reason parsing failed
        reason: String,
    },

    /// A byte sequence is not valid in the assumed source encoding
    #[error("{} is not valid {encoding}", file.display())]
    Decode {
        /// The text file that failed to decode
        file: PathBuf,
        /// The assumed source encoding
        encoding: String,
    },

    /// Decoded text has characters the destination encoding cannot represent
    #[error("{} has characters not representable in {encoding}", file.display())]
    Unmappable {
        /// The text file that failed to encode
        file: PathBuf,
        /// The destination encoding
        encoding: String,
    },

    /// File system failure while extracting or writing
    #[error("I/O failure on {}: {reason}", path.display())]
    Io {
        /// The path being read or written
        path: PathBuf,
        /// The underlying I/O error message
        reason: String,
    },
}

impl ConvertError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Machine-readable error code used in run reports
    pub fn error_code(&self) -> &'static str {
        match self {
            ConvertError::CorruptArchive { .. } => "corrupt_archive",
            ConvertError::Decode { .. } => "decode_error",
            ConvertError::Unmappable { .. } => "unmappable_character",
            ConvertError::Io { .. } => "io_error",
        }
    }
}
