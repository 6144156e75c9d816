//! A loaded index bound to its archive.
//!
//! [`IndexHandle`] is the one type callers need: it builds or refreshes the
//! index on open, answers queries, and reaches back into the archive for
//! bodies, threads and attachments.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::{MboxError, Result};
use crate::export::attachment::{save_all_attachments, save_attachment};
use crate::index::builder::{self, BuildOptions};
use crate::model::attachment::Attachment;
use crate::model::mail::IndexEntry;
use crate::search::{self, filter::FilterConfig, QueryResult};
use crate::store::reader::MboxStore;
use crate::threading::tree::{build_tree, ThreadTree};

/// Progress callback: `(done, total)`.
pub type Progress<'a> = Option<&'a dyn Fn(u64, u64)>;

pub struct IndexHandle {
    archive: PathBuf,
    options: BuildOptions,
    entries: Vec<IndexEntry>,
    store: MboxStore,
}

impl IndexHandle {
    /// Open an archive, reusing its index when fresh and rebuilding it otherwise.
    pub fn open(archive: impl AsRef<Path>, config: &Config) -> Result<Self> {
        Self::open_with_progress(archive, config, false, None)
    }

    /// Delete the archive's index and build it again.
    pub fn rebuild(archive: impl AsRef<Path>, config: &Config) -> Result<Self> {
        Self::open_with_progress(archive, config, true, None)
    }

    /// Like [`IndexHandle::open`], optionally forcing a rebuild and reporting
    /// scan progress in bytes.
    pub fn open_with_progress(
        archive: impl AsRef<Path>,
        config: &Config,
        force: bool,
        progress: Progress<'_>,
    ) -> Result<Self> {
        let archive = archive.as_ref().to_path_buf();
        let options = BuildOptions::from_config(config);

        let entries = if force {
            builder::force_rebuild(&archive, &options, progress)?
        } else {
            builder::build_or_load(&archive, &options, progress)?
        };
        let store = MboxStore::open(&archive, config.performance.lru_cache_size)?;

        info!(
            path = %archive.display(),
            count = entries.len(),
            "Index ready"
        );
        Ok(Self {
            archive,
            options,
            entries,
            store,
        })
    }

    /// Every entry, in scan order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size in bytes of the index file backing this handle.
    pub fn index_file_size(&self) -> u64 {
        builder::index_file_size(&self.archive, &self.options)
    }

    pub fn query(&mut self, filter: &FilterConfig) -> Result<QueryResult> {
        self.query_with_progress(filter, None)
    }

    /// Run a query; `progress` reports `(checked, candidates)` during the body pass.
    pub fn query_with_progress(
        &mut self,
        filter: &FilterConfig,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<QueryResult> {
        search::execute(&mut self.store, &self.entries, filter, progress)
    }

    pub fn get_entry(&self, id: u64) -> Result<&IndexEntry> {
        find_entry(&self.entries, id)
    }

    /// Decoded body text of a message.
    pub fn get_body(&mut self, id: u64) -> Result<String> {
        let entry = find_entry(&self.entries, id)?;
        self.store.get_body(entry)
    }

    /// Reply tree of the thread containing message `id`.
    pub fn get_thread_tree(&self, id: u64) -> Result<ThreadTree> {
        let entry = find_entry(&self.entries, id)?;
        let members: Vec<IndexEntry> = self
            .entries
            .iter()
            .filter(|e| e.thread_id == entry.thread_id)
            .cloned()
            .collect();
        Ok(build_tree(entry.thread_id.clone(), members))
    }

    pub fn list_attachments(&mut self, id: u64) -> Result<Vec<Attachment>> {
        let entry = find_entry(&self.entries, id)?;
        self.store.list_attachments(entry)
    }

    /// Decode attachment `ordinal` (1-based) of message `id` into
    /// `destination_dir` and return the written path.
    pub fn extract_attachment(
        &mut self,
        id: u64,
        ordinal: usize,
        destination_dir: &Path,
    ) -> Result<PathBuf> {
        let entry = find_entry(&self.entries, id)?;
        save_attachment(&mut self.store, entry, ordinal, destination_dir)
    }

    /// Decode every attachment of message `id` into `destination_dir`.
    pub fn extract_all_attachments(
        &mut self,
        id: u64,
        destination_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let entry = find_entry(&self.entries, id)?;
        save_all_attachments(&mut self.store, entry, destination_dir)
    }
}

/// Ids are 1-based scan positions, so the entry normally sits at `id - 1`.
fn find_entry(entries: &[IndexEntry], id: u64) -> Result<&IndexEntry> {
    let direct = id
        .checked_sub(1)
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| entries.get(i))
        .filter(|e| e.id == id);
    direct
        .or_else(|| entries.iter().find(|e| e.id == id))
        .ok_or(MboxError::EntryNotFound(id))
}
