//! Streaming MBOX reader.
//!
//! Reads the archive line by line through a large buffer and yields one
//! [`RawMessage`] at a time. Never loads the entire file into memory.
//! Tolerant of malformed input. A line longer than the message size limit is
//! read in bounded chunks.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::message::RawMessage;

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Lazy, single-pass iterator over the messages of an MBOX archive.
///
/// Splitting follows the usual `From ` separator convention and tolerates:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the file
///
/// Body lines quoted as `>From ` (mboxrd) lose one level of quoting.
pub struct MboxReader {
    path: PathBuf,
    reader: BufReader<File>,
    file_size: u64,
    max_message_size: usize,
    bytes_read: u64,
    next_index: usize,
    /// Offset and bytes of the message being accumulated.
    current: Option<(u64, Vec<u8>)>,
    truncated: bool,
    prev_line_was_empty: bool,
    finished: bool,
    line_buf: Vec<u8>,
    /// `line_buf` begins a new line rather than continuing an overlong one.
    line_start: bool,
    /// The last chunk read ended with a newline.
    line_complete: bool,
    /// The line being read is a separator; its overlong tail is dropped.
    in_separator: bool,
}

impl MboxReader {
    /// Open an archive with the default buffer and message size limits.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_limits(path, READ_BUFFER_SIZE, MAX_MESSAGE_SIZE)
    }

    /// Open an archive, checking that it exists and looks like an MBOX.
    ///
    /// The first non-blank line must be a `From ` separator. An empty file is
    /// accepted and yields no messages.
    pub fn with_limits(
        path: impl AsRef<Path>,
        buffer_size: usize,
        max_message_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConvertError::FileNotFound(path.clone())
            } else {
                ConvertError::io(&path, e)
            }
        })?;
        if !metadata.is_file() {
            return Err(ConvertError::unreadable(&path, "not a regular file"));
        }

        let file = File::open(&path).map_err(|e| ConvertError::io(&path, e))?;
        let mut mbox = Self {
            reader: BufReader::with_capacity(buffer_size.max(4096), file),
            file_size: metadata.len(),
            max_message_size,
            bytes_read: 0,
            next_index: 0,
            current: None,
            truncated: false,
            prev_line_was_empty: true,
            finished: false,
            line_buf: Vec::with_capacity(4096),
            line_start: true,
            line_complete: true,
            in_separator: false,
            path,
        };
        mbox.read_leading_separator()?;
        Ok(mbox)
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes consumed so far (for progress reporting).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Path to the MBOX file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Skip leading blank lines and require the first real line to be a separator.
    fn read_leading_separator(&mut self) -> Result<()> {
        loop {
            let offset = self.bytes_read;
            if !self.next_line()? {
                self.finished = true;
                return Ok(());
            }
            if is_blank_line(&self.line_buf) {
                continue;
            }
            if !is_mbox_separator(&self.line_buf) {
                return Err(ConvertError::unreadable(
                    &self.path,
                    "first line is not an MBOX 'From ' separator",
                ));
            }
            self.current = Some((offset, Vec::with_capacity(64 * 1024)));
            self.prev_line_was_empty = false;
            self.in_separator = true;
            return Ok(());
        }
    }

    /// Read the next line, or at most `max_message_size + 1` bytes of it,
    /// into `line_buf`. Returns `false` at EOF.
    fn next_line(&mut self) -> Result<bool> {
        self.line_buf.clear();
        let limit = (self.max_message_size as u64).saturating_add(1);
        let n = self
            .reader
            .by_ref()
            .take(limit)
            .read_until(b'\n', &mut self.line_buf)
            .map_err(|e| ConvertError::io(&self.path, e))?;
        self.bytes_read += n as u64;
        self.line_start = self.line_complete;
        self.line_complete = self.line_buf.ends_with(b"\n");
        Ok(n > 0)
    }

    /// Hand out the accumulated message and start a new one at `next_offset`.
    fn take_current(&mut self, next_offset: Option<u64>) -> Option<RawMessage> {
        let taken = match next_offset {
            Some(offset) => self
                .current
                .replace((offset, Vec::with_capacity(64 * 1024))),
            None => self.current.take(),
        };
        self.truncated = false;
        let (offset, bytes) = taken?;
        let index = self.next_index;
        self.next_index += 1;
        debug!(index, offset, len = bytes.len(), "Read message from archive");
        Some(RawMessage {
            index,
            offset,
            bytes,
        })
    }

    fn append_line(&mut self) {
        let Some((start, buf)) = self.current.as_mut() else {
            return;
        };
        let line = if self.line_start {
            unquote_from_line(&self.line_buf)
        } else {
            &self.line_buf[..]
        };
        if buf.len() + line.len() <= self.max_message_size {
            buf.extend_from_slice(line);
        } else if !self.truncated {
            // First time exceeding the limit: warn once per message
            warn!(
                offset = *start,
                max_size = self.max_message_size,
                "Message exceeds maximum size, truncating body"
            );
            self.truncated = true;
        }
    }
}

impl Iterator for MboxReader {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let line_offset = self.bytes_read;
            match self.next_line() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return self.take_current(None).map(Ok);
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            if !self.line_start {
                if !self.in_separator {
                    self.append_line();
                }
                continue;
            }
            self.in_separator = false;

            if is_mbox_separator(&self.line_buf) {
                self.in_separator = true;
                if !self.prev_line_was_empty {
                    warn!(
                        offset = line_offset,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                self.prev_line_was_empty = false;
                if let Some(message) = self.take_current(Some(line_offset)) {
                    return Some(Ok(message));
                }
                continue;
            }

            self.append_line();
            self.prev_line_was_empty = is_blank_line(&self.line_buf);
        }
    }
}

/// Check whether a line is an MBOX separator (`From ` at the start).
fn is_mbox_separator(line: &[u8]) -> bool {
    strip_bom(line).starts_with(b"From ")
}

fn strip_bom(line: &[u8]) -> &[u8] {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(line)
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Undo one level of mboxrd quoting: `>From ` → `From `, `>>From ` → `>From `.
fn unquote_from_line(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn archive(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn collect(contents: &[u8]) -> Vec<RawMessage> {
        let file = archive(contents);
        MboxReader::open(file.path())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_is_mbox_separator() {
        assert!(is_mbox_separator(
            b"From user@example.com Thu Jan 01 00:00:00 2024\n"
        ));
        assert!(!is_mbox_separator(b"from user@example.com\n")); // lowercase
        assert!(!is_mbox_separator(b">From user@example.com\n")); // escaped
        assert!(!is_mbox_separator(b"Subject: From here\n"));
    }

    #[test]
    fn test_is_mbox_separator_with_bom() {
        let mut line = vec![0xEF, 0xBB, 0xBF];
        line.extend_from_slice(b"From user@example.com Thu Jan 01 00:00:00 2024\n");
        assert!(is_mbox_separator(&line));
    }

    #[test]
    fn test_is_blank_line() {
        assert!(is_blank_line(b"\n"));
        assert!(is_blank_line(b"\r\n"));
        assert!(is_blank_line(b"  \n"));
        assert!(!is_blank_line(b"hello\n"));
    }

    #[test]
    fn test_unquote_from_line() {
        assert_eq!(unquote_from_line(b">From the start\n"), b"From the start\n");
        assert_eq!(unquote_from_line(b">>From deeper\n"), b">From deeper\n");
        assert_eq!(unquote_from_line(b"> quoted reply\n"), b"> quoted reply\n");
    }

    #[test]
    fn test_splits_messages_and_strips_separator() {
        let messages = collect(
            b"From a@x Thu Jan 01 00:00:00 2024\nSubject: one\n\nbody one\n\n\
              From b@x Thu Jan 01 00:00:00 2024\nSubject: two\n\nbody two\n",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].index, 0);
        assert_eq!(messages[0].offset, 0);
        assert!(messages[0].bytes.starts_with(b"Subject: one"));
        assert_eq!(messages[1].index, 1);
        assert!(messages[1].bytes.starts_with(b"Subject: two"));
    }

    #[test]
    fn test_quoted_from_does_not_split() {
        let messages = collect(
            b"From a@x Thu Jan 01 00:00:00 2024\nSubject: one\n\n>From the perspective\n",
        );
        assert_eq!(messages.len(), 1);
        assert!(String::from_utf8_lossy(&messages[0].bytes).contains("\nFrom the perspective"));
    }

    #[test]
    fn test_empty_file_has_no_messages() {
        assert!(collect(b"").is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = MboxReader::open("/definitely/not/here.mbox").err().unwrap();
        assert!(matches!(err, ConvertError::FileNotFound(_)));
    }

    #[test]
    fn test_non_mbox_is_unreadable() {
        let file = archive(b"%PDF-1.5\nnot an archive\n");
        let err = MboxReader::open(file.path()).err().unwrap();
        assert!(matches!(err, ConvertError::ArchiveUnreadable { .. }));
    }

    #[test]
    fn test_oversized_message_is_truncated() {
        let file = archive(b"From a@x Thu Jan 01 00:00:00 2024\nSubject: big\n\n0123456789\n");
        let messages = MboxReader::with_limits(file.path(), 4096, 20)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].bytes.len() <= 20);
    }

    #[test]
    fn test_overlong_line_is_read_in_bounded_chunks() {
        let mut contents = b"From a@x Thu Jan 01 00:00:00 2024\nSubject: one\n\n".to_vec();
        contents.extend_from_slice(&[b'A'; 21]);
        contents.extend_from_slice(b"From z@x Thu Jan 01 00:00:00 2024");
        contents.extend_from_slice(&[b'B'; 100_000]);
        contents.extend_from_slice(b"\n\nFrom b@x Thu Jan 01 00:00:00 2024\nSubject: two\n\nbody\n");
        let file = archive(&contents);

        let mut reader = MboxReader::with_limits(file.path(), 4096, 20).unwrap();
        let first = reader.next().unwrap().unwrap();
        let second = reader.next().unwrap().unwrap();
        assert!(reader.next().is_none());

        assert!(first.bytes.len() <= 20);
        assert!(first.bytes.starts_with(b"Subject: one"));
        assert_eq!(second.index, 1);
        assert!(second.bytes.starts_with(b"Subject: two"));
        assert!(reader.line_buf.capacity() < 100_000);
        assert_eq!(reader.bytes_read(), contents.len() as u64);
    }
}
