//! Write decoded attachments to disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{MboxError, Result};
use crate::model::mail::IndexEntry;
use crate::store::reader::MboxStore;

/// Longest file name we produce, in characters.
const MAX_FILENAME_LEN: usize = 150;

/// Decode attachment `ordinal` of `entry` and write it into `output_dir`.
///
/// The directory is created if needed. Existing files are never overwritten:
/// a `_1`, `_2`, … suffix is added instead. Returns the path written.
pub fn save_attachment(
    store: &mut MboxStore,
    entry: &IndexEntry,
    ordinal: usize,
    output_dir: &Path,
) -> Result<PathBuf> {
    let attachment = store.extract_attachment(entry, ordinal)?;
    std::fs::create_dir_all(output_dir).map_err(|e| MboxError::io(output_dir, e))?;

    let filename = sanitize_filename_part(&attachment.filename, MAX_FILENAME_LEN);
    let path = write_new_file(&output_dir.join(filename), &attachment.bytes)?;
    info!(
        id = entry.id,
        ordinal = ordinal,
        path = %path.display(),
        bytes = attachment.bytes.len(),
        "Attachment saved"
    );
    Ok(path)
}

/// Save every attachment of a message, in ordinal order.
pub fn save_all_attachments(
    store: &mut MboxStore,
    entry: &IndexEntry,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let count = store.list_attachments(entry)?.len();
    (1..=count)
        .map(|ordinal| save_attachment(store, entry, ordinal, output_dir))
        .collect()
}

/// Create `path`, or the first free `stem_N.ext` next to it, and write `data`.
fn write_new_file(path: &Path, data: &[u8]) -> Result<PathBuf> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 0..1000 {
        let candidate = match (i, ext.is_empty()) {
            (0, _) => path.to_path_buf(),
            (_, true) => parent.join(format!("{stem}_{i}")),
            (_, false) => parent.join(format!("{stem}_{i}.{ext}")),
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(data)
                    .map_err(|e| MboxError::io(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(MboxError::io(&candidate, e)),
        }
    }

    Err(MboxError::io(
        path,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "no free file name after 1000 attempts",
        ),
    ))
}

/// Sanitize a string for use as a file name: keep letters, digits and
/// `-._@`, replace everything else with `_`. Never returns a name made only
/// of dots or starting with one.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        return "attachment".to_string();
    }
    match sanitized.strip_prefix('.') {
        Some(rest) => format!("_{rest}"),
        None => sanitized,
    }
}
