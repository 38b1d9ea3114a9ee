//! Centralized error types for mbox2pdf.
//!
//! Only fatal conditions are errors. Problems confined to a single message
//! are reported as [`Diagnostic`](crate::model::diagnostic::Diagnostic)s and
//! never reach these types.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a conversion run.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified archive does not exist.
    #[error("MBOX file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but is not something we can read as an MBOX archive.
    #[error("Archive unreadable '{path}': {reason}")]
    ArchiveUnreadable { path: PathBuf, reason: String },

    /// Every record in the archive was skipped (or the archive was empty).
    #[error("No renderable messages found in '{0}'")]
    NothingToRender(PathBuf),

    /// Writing the output document failed.
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Errors produced while writing the final document.
#[derive(Error, Debug)]
pub enum EmitError {
    /// The output location cannot be written to.
    #[error("Output path not writable '{path}': {reason}")]
    OutputNotWritable { path: PathBuf, reason: String },

    /// The document could not be assembled (image decoding, PDF serialization).
    #[error("Rendering failed: {0}")]
    Render(String),

    /// I/O error while writing the output.
    #[error("I/O error writing '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Problems with an explicitly given configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `ArchiveUnreadable` variant.
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArchiveUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl EmitError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an `OutputNotWritable` variant.
    pub fn not_writable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OutputNotWritable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<lopdf::Error> for EmitError {
    fn from(e: lopdf::Error) -> Self {
        Self::Render(e.to_string())
    }
}
