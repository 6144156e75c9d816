//! Persistent binary index: format, construction, statistics and the
//! [`handle::IndexHandle`] entry point.

pub mod builder;
pub mod format;
pub mod handle;
pub mod reader;
