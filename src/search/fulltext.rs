//! Body search: reads message bodies from the MBOX file.
//!
//! This is the slow path: for each candidate message, it reads and decodes
//! the MIME body, then searches the plain text. Metadata filtering runs
//! first to shrink the candidate set.

use crate::error::Result;
use crate::model::mail::IndexEntry;
use crate::store::reader::MboxStore;

/// Keep the candidates whose decoded body contains `needle`, case-insensitively.
///
/// Candidate order is preserved. Body decoding never fails, so any error is
/// the archive itself failing to read and ends the search. The progress
/// callback receives `(processed, total)`.
pub fn search_fulltext(
    store: &mut MboxStore,
    entries: &[IndexEntry],
    candidates: &[usize],
    needle: &str,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<Vec<usize>> {
    let needle = needle.to_lowercase();
    let total = candidates.len();
    let mut results = Vec::new();

    for (i, &idx) in candidates.iter().enumerate() {
        if let Some(cb) = progress {
            cb(i, total);
        }

        let entry = &entries[idx];
        let body = store.get_body(entry)?;
        if body.to_lowercase().contains(&needle) {
            results.push(idx);
        }
    }

    if let Some(cb) = progress {
        cb(total, total);
    }

    Ok(results)
}
