//! MBOX store: reads individual messages by offset with LRU caching.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::error::{MboxError, Result};
use crate::model::attachment::{Attachment, ExtractedAttachment};
use crate::model::mail::IndexEntry;
use crate::parser::mime;

/// Default number of decoded bodies to keep in the LRU cache.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Reads messages from an MBOX file using index offsets.
///
/// Maintains an LRU cache of decoded body text keyed by record offset, so
/// repeated body searches and `show` calls skip MIME decoding.
pub struct MboxStore {
    path: PathBuf,
    file: File,
    cache: LruCache<u64, String>,
}

impl MboxStore {
    /// Open an MBOX file for random-access reading.
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| MboxError::open_archive(&path, e))?;
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            path,
            file,
            cache: LruCache::new(cache_size),
        })
    }

    /// Decoded, human-readable body text. Cached results are returned immediately.
    pub fn get_body(&mut self, entry: &IndexEntry) -> Result<String> {
        let Self { path, file, cache } = self;
        let body = cache.try_get_or_insert(entry.offset, || {
            let raw = read_range(file, path, entry.offset, entry.length)?;
            Ok::<_, MboxError>(mime::extract_body_text(&raw))
        })?;
        Ok(body.clone())
    }

    /// Attachments of a message in MIME traversal order, without decoding them.
    pub fn list_attachments(&mut self, entry: &IndexEntry) -> Result<Vec<Attachment>> {
        let raw = self.read_raw(entry)?;
        Ok(mime::list_attachments(&raw))
    }

    /// Decode the attachment with the given 1-based ordinal.
    pub fn extract_attachment(
        &mut self,
        entry: &IndexEntry,
        ordinal: usize,
    ) -> Result<ExtractedAttachment> {
        let raw = self.read_raw(entry)?;
        mime::extract_attachment(&raw, entry.id, ordinal)
    }

    /// Read the raw bytes of a message (not cached).
    pub fn read_raw(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        read_range(&mut self.file, &self.path, entry.offset, entry.length)
    }
}

/// Low-level: seek to offset and read `length` bytes.
fn read_range(file: &mut File, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
    debug!(offset = offset, length = length, "Reading message from MBOX");
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| MboxError::io(path, e))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)
        .map_err(|e| MboxError::io(path, e))?;
    Ok(buf)
}
