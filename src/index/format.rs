//! Binary index file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"MBOXQRY\0"       │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  message_count: u64                  │
//! │  fingerprint:                        │
//! │    size: u64                         │
//! │    mtime_secs: i64                   │
//! │    mtime_nanos: u32                  │
//! │    sha256_prefix: [u8; 32]           │
//! │  (zero padding to 128 bytes)         │
//! ├──────────────────────────────────────┤
//! │ ENTRIES (variable)                   │
//! │  bincode-serialized Vec<IndexEntry>  │
//! └──────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::{MboxError, Result};

/// Magic bytes identifying an mboxquery index file.
pub const MAGIC: &[u8; 8] = b"MBOXQRY\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Size of the archive prefix hashed into the fingerprint.
pub const HASH_PREFIX_LEN: usize = 4096;

/// Identity of an archive at the time its index was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime_secs: i64,
    /// Sub-second part of the modification time.
    pub mtime_nanos: u32,
    /// SHA-256 of the first [`HASH_PREFIX_LEN`] bytes.
    pub sha256_prefix: [u8; 32],
}

impl Fingerprint {
    /// Fingerprint the archive at `path` as it is now.
    pub fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| MboxError::open_archive(path, e))?;
        let (mtime_secs, mtime_nanos) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        Ok(Self {
            size: meta.len(),
            mtime_secs,
            mtime_nanos,
            sha256_prefix: sha256_first_n(path, HASH_PREFIX_LEN)?,
        })
    }

    /// Describe the first difference from `current`, or `None` if identical.
    pub fn mismatch(&self, current: &Fingerprint) -> Option<String> {
        if self.size != current.size {
            return Some(format!(
                "archive size changed ({} -> {} bytes)",
                self.size, current.size
            ));
        }
        if (self.mtime_secs, self.mtime_nanos) != (current.mtime_secs, current.mtime_nanos) {
            return Some("archive modification time changed".into());
        }
        if self.sha256_prefix != current.sha256_prefix {
            return Some("archive content hash changed".into());
        }
        None
    }
}

/// Serializable index header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct IndexHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved flags (currently unused).
    pub flags: u32,
    /// Number of messages in the index.
    pub message_count: u64,
    /// The archive as it was when the index was built.
    pub fingerprint: Fingerprint,
}

impl IndexHeader {
    pub fn new(message_count: u64, fingerprint: Fingerprint) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            message_count,
            fingerprint,
        }
    }

    /// Validate that the header is well-formed and matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

/// Compute SHA-256 of the first `n` bytes of a file.
pub fn sha256_first_n(path: &Path, n: usize) -> Result<[u8; 32]> {
    let file = File::open(path).map_err(|e| MboxError::open_archive(path, e))?;
    let mut buf = Vec::with_capacity(n);
    file.take(n as u64)
        .read_to_end(&mut buf)
        .map_err(|e| MboxError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Ok(hasher.finalize().into())
}
