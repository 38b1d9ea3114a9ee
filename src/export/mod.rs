//! Document emitters: PDF (default) and single-file HTML.
//!
//! Both write atomically: the document goes to a temporary file in the output
//! directory and is renamed over the target only once it is complete.

pub mod html;
pub mod pdf;

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EmitError;

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Pdf,
    Html,
}

impl OutputFormat {
    /// File name used when the caller gives no output path.
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Pdf => "emails_combined.pdf",
            Self::Html => "emails_combined.html",
        }
    }
}

/// Directory the output file will be written into.
fn output_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Check that `output` can be written before any work starts.
///
/// The directory must exist and accept new files, and `output` itself must not
/// be a directory.
pub fn preflight(output: &Path) -> Result<(), EmitError> {
    if output.is_dir() {
        return Err(EmitError::not_writable(output, "path is a directory"));
    }

    let dir = output_dir(output);
    if !dir.is_dir() {
        return Err(EmitError::not_writable(
            output,
            format!("directory '{}' does not exist", dir.display()),
        ));
    }

    // Check by creating a scratch file
    tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| EmitError::not_writable(output, e.to_string()))?;

    debug!(output = %output.display(), "Output location is writable");
    Ok(())
}

/// Write `bytes` to `output` through a temporary sibling file.
///
/// On any failure the temporary file is removed and `output` is untouched.
pub fn write_atomic(output: &Path, bytes: &[u8]) -> Result<(), EmitError> {
    let dir = output_dir(output);
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| EmitError::not_writable(output, e.to_string()))?;

    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| EmitError::io(tmp.path(), e))?;

    tmp.persist(output)
        .map_err(|e| EmitError::io(output, e.error))?;

    debug!(output = %output.display(), bytes = bytes.len(), "Document written");
    Ok(())
}
