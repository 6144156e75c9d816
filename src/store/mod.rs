//! Random access to message content by index offsets.

pub mod reader;
