//! Query engine: index-level filtering, then optional body search.

pub mod filter;
pub mod fulltext;
pub mod metadata;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::mail::{cmp_newest_first, IndexEntry};
use crate::store::reader::MboxStore;

use self::filter::FilterConfig;

/// Matching entries (newest first, truncated to the limit) and the size of
/// the full match set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub entries: Vec<IndexEntry>,
    pub total_count: usize,
}

/// Run a query.
///
/// 1. Filter on indexed fields.
/// 2. Sort by date, newest first, unknown dates last, ties by ascending id.
/// 3. When a body filter is set, decode each candidate and keep substring matches.
///
/// The `progress` callback is only invoked for the body pass. An archive read
/// error during that pass aborts the query.
pub fn execute(
    store: &mut MboxStore,
    entries: &[IndexEntry],
    filter: &FilterConfig,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<QueryResult> {
    let mut candidates = metadata::search_metadata(entries, filter);
    candidates.sort_by(|&a, &b| cmp_newest_first(&entries[a], &entries[b]));
    debug!(candidates = candidates.len(), "Index filtering done");

    if let Some(ref needle) = filter.body {
        candidates = fulltext::search_fulltext(store, entries, &candidates, needle, progress)?;
        debug!(matches = candidates.len(), "Body search done");
    }

    let total_count = candidates.len();
    if filter.count_only {
        return Ok(QueryResult {
            entries: Vec::new(),
            total_count,
        });
    }

    let limit = filter.limit.unwrap_or(usize::MAX);
    Ok(QueryResult {
        entries: candidates
            .into_iter()
            .take(limit)
            .map(|i| entries[i].clone())
            .collect(),
        total_count,
    })
}
