//! Streaming MBOX boundary scanner.
//!
//! Reads MBOX archives line-by-line through a large buffer.
//! Never loads the entire file into memory. Tolerant of malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MboxError, Result};

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum number of buffered bytes per message (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Byte range of one message inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    /// Offset of the `From ` separator line.
    pub start_offset: u64,
    /// Length up to the next separator or end of stream.
    pub length: u64,
}

/// A record together with its buffered bytes.
///
/// `raw` holds at most `max_message_size` bytes; `record.length` is always
/// the exact on-disk length.
#[derive(Debug, Clone)]
pub struct ScannedMessage {
    pub record: RawRecord,
    pub raw: Vec<u8>,
}

impl ScannedMessage {
    /// Whether `raw` stops short of the record because of `max_message_size`.
    pub fn is_truncated(&self) -> bool {
        (self.raw.len() as u64) < self.record.length
    }
}

/// Forward-only iterator over the messages of an MBOX stream.
///
/// A line starting with `From ` opens a new message. Lines quoted as
/// `>From ` belong to the body. The scanner is tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the stream
/// - Garbage before the first separator (skipped)
pub struct MboxScanner<R> {
    reader: R,
    position: u64,
    max_message_size: usize,
    line_buf: Vec<u8>,
    current: Option<ScannedMessage>,
    prev_line_was_empty: bool,
    skipped_preamble: u64,
    overflowed: bool,
    finished: bool,
}

impl<R: BufRead> MboxScanner<R> {
    /// Wrap a buffered reader positioned at the start of the archive.
    pub fn new(reader: R) -> Self {
        Self::with_max_message_size(reader, MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(reader: R, max_message_size: usize) -> Self {
        Self {
            reader,
            position: 0,
            max_message_size,
            line_buf: Vec::with_capacity(4096),
            current: None,
            prev_line_was_empty: true,
            skipped_preamble: 0,
            overflowed: false,
            finished: false,
        }
    }

    /// Read the next line into `line_buf`. Returns `false` at EOF.
    fn read_line(&mut self) -> std::io::Result<bool> {
        self.line_buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.line_buf)?;
        Ok(n > 0)
    }

    /// Close the message in progress at the current position.
    fn close_current(&mut self, end: u64) -> Option<ScannedMessage> {
        let mut msg = self.current.take()?;
        msg.record.length = end - msg.record.start_offset;
        Some(msg)
    }

    fn step(&mut self) -> std::io::Result<Option<ScannedMessage>> {
        loop {
            let line_start = self.position;
            if !self.read_line()? {
                if self.skipped_preamble > 0 && self.current.is_none() {
                    debug!(bytes = self.skipped_preamble, "No MBOX separator found");
                }
                return Ok(self.close_current(line_start));
            }
            self.position += self.line_buf.len() as u64;

            let mut content_start = 0usize;
            if line_start == 0 && self.line_buf.starts_with(UTF8_BOM) {
                content_start = UTF8_BOM.len();
            }
            let line = &self.line_buf[content_start..];
            let record_start = line_start + content_start as u64;

            if is_mbox_separator(line) {
                let raw = line.to_vec();
                if self.current.is_some() && !self.prev_line_was_empty {
                    warn!(
                        offset = record_start,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                let finished = self.close_current(record_start);
                self.current = Some(ScannedMessage {
                    record: RawRecord {
                        start_offset: record_start,
                        length: 0,
                    },
                    raw,
                });
                self.overflowed = false;
                self.prev_line_was_empty = false;
                if finished.is_some() {
                    return Ok(finished);
                }
                continue;
            }

            let blank = is_blank_line(line);
            match self.current.as_mut() {
                Some(msg) => {
                    if msg.raw.len() + line.len() <= self.max_message_size {
                        msg.raw.extend_from_slice(line);
                    } else if !self.overflowed {
                        warn!(
                            offset = msg.record.start_offset,
                            max_size = self.max_message_size,
                            "Message exceeds maximum size, truncating buffered bytes"
                        );
                        self.overflowed = true;
                    }
                }
                None => {
                    if self.skipped_preamble == 0 && !blank {
                        warn!(
                            offset = line_start,
                            "Skipping content before first 'From ' separator"
                        );
                    }
                    self.skipped_preamble += line.len() as u64;
                }
            }
            self.prev_line_was_empty = blank;
        }
    }
}

impl<R: BufRead> Iterator for MboxScanner<R> {
    type Item = Result<ScannedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(MboxError::from(e)))
            }
        }
    }
}

/// An MBOX archive on disk.
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
    read_buffer_size: usize,
    max_message_size: usize,
}

impl MboxParser {
    /// Create a parser for the given MBOX file.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// that it is actually an MBOX.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata =
            std::fs::metadata(&path).map_err(|e| MboxError::open_archive(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            read_buffer_size: READ_BUFFER_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    /// Override buffer sizes (from the `performance` config section).
    pub fn with_limits(mut self, read_buffer_size: usize, max_message_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(4096);
        self.max_message_size = max_message_size.max(1);
        self
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Open a fresh scan from the beginning of the file.
    pub fn scan(&self) -> Result<MboxScanner<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|e| MboxError::open_archive(&self.path, e))?;
        let reader = BufReader::with_capacity(self.read_buffer_size, file);
        Ok(MboxScanner::with_max_message_size(
            reader,
            self.max_message_size,
        ))
    }

    /// Read a single message at the given offset and length.
    ///
    /// Uses `seek` to jump directly to the message without scanning the file.
    pub fn read_message_at(path: impl AsRef<Path>, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| MboxError::open_archive(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| MboxError::io(path, e))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| MboxError::io(path, e))?;
        Ok(buffer)
    }
}

/// Check whether a line is an MBOX separator (`From ` at the start).
pub fn is_mbox_separator(line: &[u8]) -> bool {
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
pub fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
