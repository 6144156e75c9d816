//! `mboxquery`: index and query huge MBOX archives.
//!
//! The archive is scanned once into a compact binary index stored next to it.
//! Queries run against the index; bodies and attachments are read back from
//! the archive only when asked for. [`IndexHandle`] is the entry point.

pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;
pub mod threading;

pub use index::handle::IndexHandle;
