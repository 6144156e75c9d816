//! Index construction, validation, and persistence.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MboxError, Result};
use crate::index::format::{Fingerprint, IndexHeader, HEADER_SIZE};
use crate::model::mail::{IndexEntry, ParsedHeaders};
use crate::parser::header;
use crate::parser::mbox::{MboxParser, RawRecord, MAX_MESSAGE_SIZE, READ_BUFFER_SIZE};
use crate::threading::resolver::resolve_threads;

/// How often (in messages) the progress callback fires during a scan.
const PROGRESS_EVERY: usize = 500;

/// Knobs for scanning and index placement.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub read_buffer_size: usize,
    pub max_message_size: usize,
    /// Directory for the fallback index when the archive's directory is read-only.
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: READ_BUFFER_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            cache_dir: None,
        }
    }
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_buffer_size: config.performance.read_buffer_size,
            max_message_size: config.performance.max_message_size,
            cache_dir: config.general.cache_dir.clone(),
        }
    }
}

/// Load a fresh index, or build one when it is missing or stale.
pub fn build_or_load(
    mbox_path: &Path,
    options: &BuildOptions,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<Vec<IndexEntry>> {
    if let Some(entries) = load_index(mbox_path, options)? {
        debug!(
            path = %mbox_path.display(),
            count = entries.len(),
            "Loaded existing index"
        );
        return Ok(entries);
    }
    build_index(mbox_path, options, progress)
}

/// Scan the archive, parse every record, resolve threads and write the index.
///
/// Rebuilding an unchanged archive produces a byte-identical index file.
pub fn build_index(
    mbox_path: &Path,
    options: &BuildOptions,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<Vec<IndexEntry>> {
    info!(path = %mbox_path.display(), "Building index");

    let parser = MboxParser::new(mbox_path)?
        .with_limits(options.read_buffer_size, options.max_message_size);
    let total = parser.file_size();

    let mut records: Vec<RawRecord> = Vec::new();
    let mut parsed: Vec<ParsedHeaders> = Vec::new();

    for scanned in parser.scan()? {
        let scanned = scanned?;
        let mut headers = header::parse_message(&scanned.raw, scanned.record.start_offset);
        if scanned.is_truncated() {
            // Attachments past the cap are invisible here; only list_attachments sees them
            warn!(
                offset = scanned.record.start_offset,
                length = scanned.record.length,
                "Oversized message indexed without attachment detection"
            );
            headers.has_attachment = false;
        }
        parsed.push(headers);
        records.push(scanned.record);

        if let Some(cb) = progress {
            if records.len() % PROGRESS_EVERY == 0 {
                cb(scanned.record.start_offset + scanned.record.length, total);
            }
        }
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    let thread_ids = resolve_threads(&parsed);

    let entries: Vec<IndexEntry> = records
        .into_iter()
        .zip(parsed)
        .zip(thread_ids)
        .enumerate()
        .map(|(i, ((record, headers), thread_id))| {
            IndexEntry::from_headers(
                i as u64 + 1,
                record.start_offset,
                record.length,
                headers,
                thread_id,
            )
        })
        .collect();

    info!(count = entries.len(), "Index built");

    write_index(mbox_path, &entries, options)?;

    Ok(entries)
}

/// Delete any existing index for the archive and build a new one.
pub fn force_rebuild(
    mbox_path: &Path,
    options: &BuildOptions,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<Vec<IndexEntry>> {
    for path in [
        index_path_for(mbox_path),
        cache_index_path_for(mbox_path, options.cache_dir.as_deref()),
    ] {
        check_removal(&path, std::fs::remove_file(&path))?;
    }
    build_index(mbox_path, options, progress)
}

/// Classify the outcome of deleting an old index file.
///
/// A locked-down sibling is left in place: the write step then falls back to
/// the cache dir, and loading prefers a usable cache copy over it.
fn check_removal(path: &Path, outcome: std::io::Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => debug!(path = %path.display(), "Removed old index"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(path = %path.display(), error = %e, "Cannot remove old index");
        }
        Err(e) => return Err(MboxError::io(path, e)),
    }
    Ok(())
}

/// Whether the stored index no longer describes the archive.
///
/// A missing, unreadable or corrupt index counts as stale.
pub fn is_stale(mbox_path: &Path, options: &BuildOptions) -> Result<bool> {
    match read_index(mbox_path, options) {
        Ok(_) => Ok(false),
        Err(MboxError::StaleIndex { .. }) | Err(MboxError::InvalidIndex { .. }) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Attempt to load an existing index. Returns `None` if the index is missing,
/// invalid or stale.
pub fn load_index(mbox_path: &Path, options: &BuildOptions) -> Result<Option<Vec<IndexEntry>>> {
    match read_index(mbox_path, options) {
        Ok(entries) => Ok(Some(entries)),
        Err(MboxError::StaleIndex { reason }) => {
            debug!(reason = %reason, "Index is stale");
            Ok(None)
        }
        Err(MboxError::InvalidIndex { path, reason }) => {
            debug!(path = %path.display(), reason = %reason, "Index unusable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Locate and validate the index, preferring the file next to the archive.
fn read_index(mbox_path: &Path, options: &BuildOptions) -> Result<Vec<IndexEntry>> {
    let current = Fingerprint::of(mbox_path)?;

    let idx_path = index_path_for(mbox_path);
    let cache_path = cache_index_path_for(mbox_path, options.cache_dir.as_deref());
    if idx_path.is_file() {
        match load_index_from_file(&idx_path, &current) {
            Ok(entries) => return Ok(entries),
            Err(e) if !cache_path.is_file() => return Err(e),
            Err(e) => debug!(error = %e, "Sibling index unusable, trying cache"),
        }
    }
    if cache_path.is_file() {
        return load_index_from_file(&cache_path, &current);
    }
    Err(MboxError::StaleIndex {
        reason: "no index file".into(),
    })
}

/// Load and validate an index from a specific file.
fn load_index_from_file(idx_path: &Path, current: &Fingerprint) -> Result<Vec<IndexEntry>> {
    let invalid = |reason: String| MboxError::InvalidIndex {
        path: idx_path.to_path_buf(),
        reason,
    };

    let data = std::fs::read(idx_path).map_err(|e| invalid(format!("unreadable: {e}")))?;

    if data.len() < HEADER_SIZE {
        return Err(invalid("file too small".into()));
    }

    let header: IndexHeader = bincode::deserialize(&data[..HEADER_SIZE])
        .map_err(|e| invalid(format!("Header deserialization failed: {e}")))?;
    header.validate().map_err(invalid)?;

    if let Some(reason) = header.fingerprint.mismatch(current) {
        return Err(MboxError::StaleIndex { reason });
    }

    let entries: Vec<IndexEntry> = bincode::deserialize(&data[HEADER_SIZE..])
        .map_err(|e| invalid(format!("Entry deserialization failed: {e}")))?;

    if entries.len() as u64 != header.message_count {
        return Err(invalid(format!(
            "Message count mismatch: header says {}, found {}",
            header.message_count,
            entries.len()
        )));
    }

    Ok(entries)
}

/// Write the index next to the archive, or into the cache dir when that fails.
///
/// Fails only when neither location is writable.
fn write_index(mbox_path: &Path, entries: &[IndexEntry], options: &BuildOptions) -> Result<()> {
    let fingerprint = Fingerprint::of(mbox_path)?;
    let header = IndexHeader::new(entries.len() as u64, fingerprint);

    let idx_path = index_path_for(mbox_path);
    let encode_err = |e: bincode::Error| MboxError::InvalidIndex {
        path: idx_path.clone(),
        reason: format!("serialization failed: {e}"),
    };
    let header_bytes = bincode::serialize(&header).map_err(encode_err)?;
    let entries_bytes = bincode::serialize(entries).map_err(encode_err)?;

    // Pad header to HEADER_SIZE
    let mut padded_header = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

    // Try writing next to the MBOX file first
    match write_index_to_file(&idx_path, &padded_header, &entries_bytes) {
        Ok(()) => {
            info!(path = %idx_path.display(), "Index written");
            return Ok(());
        }
        Err(e) => {
            debug!(error = %e, "Cannot write index next to MBOX, trying cache dir");
        }
    }

    // Fallback: write to cache directory
    let cache_path = cache_index_path_for(mbox_path, options.cache_dir.as_deref());
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MboxError::io(parent, e))?;
    }
    write_index_to_file(&cache_path, &padded_header, &entries_bytes)?;
    info!(path = %cache_path.display(), "Index written to cache");
    Ok(())
}

/// Write header + entries to a file.
fn write_index_to_file(path: &Path, header: &[u8], entries: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| MboxError::io(path, e))?;
    file.write_all(header).map_err(|e| MboxError::io(path, e))?;
    file.write_all(entries).map_err(|e| MboxError::io(path, e))?;
    file.flush().map_err(|e| MboxError::io(path, e))?;
    Ok(())
}

/// Primary index path: hidden file next to the MBOX.
///
/// Example: `/data/mail.mbox` → `/data/.mail.mbox.mboxquery.idx`
pub fn index_path_for(mbox_path: &Path) -> PathBuf {
    let filename = mbox_path.file_name().unwrap_or_default().to_string_lossy();
    let idx_name = format!(".{filename}.mboxquery.idx");
    mbox_path.with_file_name(idx_name)
}

/// Fallback index path inside the cache directory.
///
/// Example: `~/.cache/mboxquery/<sha256_of_path>.idx`
pub fn cache_index_path_for(mbox_path: &Path, cache_dir: Option<&Path>) -> PathBuf {
    let cache_dir = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("mboxquery"),
    };

    let mut hasher = Sha256::new();
    hasher.update(mbox_path.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    cache_dir.join(format!("{hash}.idx"))
}

/// Return the size in bytes of the index file for the given MBOX (0 if missing).
pub fn index_file_size(mbox_path: &Path, options: &BuildOptions) -> u64 {
    let idx_path = index_path_for(mbox_path);
    std::fs::metadata(&idx_path)
        .or_else(|_| {
            std::fs::metadata(cache_index_path_for(
                mbox_path,
                options.cache_dir.as_deref(),
            ))
        })
        .map(|m| m.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_path_is_hidden_sibling() {
        assert_eq!(
            index_path_for(Path::new("/data/mail.mbox")),
            PathBuf::from("/data/.mail.mbox.mboxquery.idx")
        );
    }

    #[test]
    fn test_cache_path_depends_on_archive_path() {
        let dir = Path::new("/tmp/cache");
        let a = cache_index_path_for(Path::new("/a/mail.mbox"), Some(dir));
        let b = cache_index_path_for(Path::new("/b/mail.mbox"), Some(dir));
        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("idx"));
    }

    #[test]
    fn test_build_assigns_ids_and_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mbox");
        std::fs::write(
            &path,
            "From a@x Mon Jan 01 00:00:00 2024\nMessage-ID: <b@x>\nSubject: one\n\nbody\n\n\
From a@x Mon Jan 01 00:00:00 2024\nMessage-ID: <c@x>\nIn-Reply-To: <b@x>\nSubject: two\n\nbody\n",
        )
        .unwrap();

        let entries = build_index(&path, &BuildOptions::default(), None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[1].id, 2);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[0].thread_id, "b@x");
        assert_eq!(entries[1].thread_id, "b@x");
        assert!(index_path_for(&path).exists());
        assert!(!is_stale(&path, &BuildOptions::default()).unwrap());
    }

    #[test]
    fn test_oversized_message_skips_attachment_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mbox");
        let mut data = String::from(
            "From a@x Mon Jan 01 00:00:00 2024\n\
Subject: big\n\
Content-Type: application/pdf; name=big.pdf\n\
Content-Transfer-Encoding: base64\n\
\n",
        );
        for _ in 0..200 {
            data.push_str("QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVo=\n");
        }
        std::fs::write(&path, &data).unwrap();

        let options = BuildOptions {
            max_message_size: 256,
            ..Default::default()
        };
        let entries = build_index(&path, &options, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].length, data.len() as u64);
        assert_eq!(entries[0].subject, "big");
        assert!(!entries[0].has_attachment);
    }

    #[test]
    fn test_corrupt_index_is_stale_and_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mbox");
        std::fs::write(&path, "From a@x\nSubject: s\n\nbody\n").unwrap();
        std::fs::write(index_path_for(&path), b"garbage").unwrap();

        let options = BuildOptions::default();
        assert!(is_stale(&path, &options).unwrap());
        assert!(load_index(&path, &options).unwrap().is_none());
    }

    #[test]
    fn test_index_falls_back_to_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mbox");
        std::fs::write(&path, "From a@x\nSubject: s\n\nbody\n").unwrap();
        // A directory in the sibling slot makes the sibling write fail
        std::fs::create_dir(index_path_for(&path)).unwrap();

        let options = BuildOptions {
            cache_dir: Some(dir.path().join("cache")),
            ..Default::default()
        };
        build_index(&path, &options, None).unwrap();
        assert!(cache_index_path_for(&path, options.cache_dir.as_deref()).is_file());
        assert!(!is_stale(&path, &options).unwrap());
        assert_eq!(load_index(&path, &options).unwrap().map(|e| e.len()), Some(1));
    }

    #[test]
    fn test_removal_outcomes() {
        use std::io::{Error, ErrorKind};
        let path = Path::new("/data/.mail.mbox.mboxquery.idx");
        assert!(check_removal(path, Ok(())).is_ok());
        assert!(check_removal(path, Err(Error::from(ErrorKind::NotFound))).is_ok());
        assert!(check_removal(path, Err(Error::from(ErrorKind::PermissionDenied))).is_ok());
        assert!(matches!(
            check_removal(path, Err(Error::new(ErrorKind::Other, "disk on fire"))),
            Err(MboxError::Io { .. })
        ));
    }

    #[test]
    fn test_stale_sibling_yields_to_fresh_cache_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mbox");
        std::fs::write(&path, "From a@x\nSubject: s\n\nbody\n").unwrap();
        let options = BuildOptions {
            cache_dir: Some(dir.path().join("cache")),
            ..Default::default()
        };
        build_index(&path, &options, None).unwrap();
        let cache_path = cache_index_path_for(&path, options.cache_dir.as_deref());
        std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
        std::fs::copy(index_path_for(&path), &cache_path).unwrap();
        std::fs::write(index_path_for(&path), b"garbage").unwrap();

        assert!(!is_stale(&path, &options).unwrap());
    }

    #[test]
    fn test_unwritable_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mbox");
        std::fs::write(&path, "From a@x\nSubject: s\n\nbody\n").unwrap();
        std::fs::create_dir(index_path_for(&path)).unwrap();
        // The cache dir would have to live under a regular file
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let options = BuildOptions {
            cache_dir: Some(blocker.join("cache")),
            ..Default::default()
        };
        assert!(matches!(
            build_index(&path, &options, None),
            Err(MboxError::Io { .. })
        ));
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.mbox");
        assert!(matches!(
            build_index(&path, &BuildOptions::default(), None),
            Err(MboxError::ArchiveNotFound(_))
        ));
        assert!(matches!(
            is_stale(&path, &BuildOptions::default()),
            Err(MboxError::ArchiveNotFound(_))
        ));
    }
}
